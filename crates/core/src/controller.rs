//! Session resolution facade.
//!
//! [`DeviceController`] is the surface external callers use. It composes the
//! session tracker, the resource registry, cancellation, and the command
//! orchestrator, and is safe to share across tasks behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use devrun_protocol::{Command, DeviceId, DeviceState, DeviceSummary, ExecutionOutcome, SessionEvent, SessionId};
use devrun_runtime::{DriverHandle, ManagedBrowser};
use futures_util::Stream;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::orchestrator::run_commands;
use crate::resources::{CancelReport, ResourceRegistry, RetirePolicy, cancel_session};
use crate::session::{JsonlSessionLog, NullSessionLog, ResolvedSession, SessionLog, SessionTracker};

/// Prefix for locally created session ids when the caller gives none.
pub const DEFAULT_SESSION_PREFIX: &str = "session";

/// How a run resolves its session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
	/// Start a new session even if the device already has one.
	pub force_new: bool,
	/// Prefix for a newly generated session id.
	pub id_prefix: String,
	/// Summary registered for the device if it is not known yet.
	pub device_summary: Option<DeviceSummary>,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			force_new: false,
			id_prefix: DEFAULT_SESSION_PREFIX.to_string(),
			device_summary: None,
		}
	}
}

impl SessionOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets whether a new session is always created.
	pub fn with_force_new(mut self, force_new: bool) -> Self {
		self.force_new = force_new;
		self
	}

	/// Sets the prefix for generated session ids.
	pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.id_prefix = prefix.into();
		self
	}

	/// Sets the summary used to register an unseen device.
	pub fn with_device_summary(mut self, summary: DeviceSummary) -> Self {
		self.device_summary = Some(summary);
		self
	}
}

/// Result of [`DeviceController::run_on_device`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRun {
	pub session: ResolvedSession,
	pub outcome: ExecutionOutcome,
}

/// Entry point for session resolution, single-flight execution, and cancellation.
pub struct DeviceController {
	config: ControllerConfig,
	tracker: Arc<SessionTracker>,
	registry: Arc<ResourceRegistry>,
	browser: Option<Arc<dyn ManagedBrowser>>,
	shutdown: CancellationToken,
}

impl Default for DeviceController {
	fn default() -> Self {
		Self::with_session_log(ControllerConfig::default(), Arc::new(NullSessionLog))
	}
}

impl DeviceController {
	/// Builds a controller from `config`.
	///
	/// Session records go to `sessionLogPath` when it is set and are discarded
	/// otherwise.
	pub fn new(config: ControllerConfig) -> Result<Self> {
		config.validate()?;
		let log: Arc<dyn SessionLog> = match &config.session_log_path {
			Some(path) => {
				debug!(target = "devrun.facade", path = %path.display(), "session log enabled");
				Arc::new(JsonlSessionLog::new(path.clone()))
			}
			None => Arc::new(NullSessionLog),
		};
		Ok(Self::with_session_log(config, log))
	}

	/// Builds a controller from defaults plus environment overrides.
	pub fn from_env() -> Result<Self> {
		Self::new(ControllerConfig::from_env())
	}

	/// Builds a controller that writes session records to `log`.
	pub fn with_session_log(config: ControllerConfig, log: Arc<dyn SessionLog>) -> Self {
		let registry = ResourceRegistry::new(RetirePolicy::from(&config));
		Self {
			config,
			tracker: Arc::new(SessionTracker::new(log)),
			registry: Arc::new(registry),
			browser: None,
			shutdown: CancellationToken::new(),
		}
	}

	/// Sets the shared browser consulted during driver teardown.
	pub fn with_managed_browser(mut self, browser: Arc<dyn ManagedBrowser>) -> Self {
		self.browser = Some(browser);
		self
	}

	pub fn config(&self) -> &ControllerConfig {
		&self.config
	}

	pub fn tracker(&self) -> &Arc<SessionTracker> {
		&self.tracker
	}

	pub fn registry(&self) -> &Arc<ResourceRegistry> {
		&self.registry
	}

	pub fn get_or_create_session(&self, device: &DeviceId, options: &SessionOptions) -> ResolvedSession {
		self.tracker
			.get_or_create_session(device, options.force_new, &options.id_prefix, options.device_summary.clone())
	}

	/// Waits for the device to have a session. `None` uses the configured timeout.
	pub async fn await_session(&self, device: &DeviceId, timeout: Option<Duration>) -> Option<SessionId> {
		let timeout = timeout.unwrap_or_else(|| self.config.session_wait_timeout());
		self.tracker.await_session(device, timeout).await
	}

	/// Ends the device's session as succeeded. Resources stay registered.
	pub fn end_session(&self, device: &DeviceId) -> Option<SessionId> {
		self.tracker.end_session(device)
	}

	/// Tears down the device's driver, task context, and session. Never fails.
	pub async fn cancel_session(&self, device: &DeviceId) -> CancelReport {
		cancel_session(&self.registry, &self.tracker, self.browser.as_deref(), device).await
	}

	/// Same as [`cancel_session`](Self::cancel_session).
	pub async fn cancel(&self, device: &DeviceId) -> CancelReport {
		self.cancel_session(device).await
	}

	/// Registers `driver` for the device, closing the one it replaces.
	pub async fn attach_driver(&self, device: &DeviceId, driver: DriverHandle) {
		let Some(previous) = self.registry.set_active_driver(device, driver.clone()) else {
			return;
		};
		if Arc::ptr_eq(&previous, &driver) {
			return;
		}

		debug!(target = "devrun.facade", device = %device, driver = previous.name(), "closing replaced driver");
		if let Err(err) = previous.close().await {
			warn!(target = "devrun.facade", device = %device, driver = previous.name(), error = %err, "failed to close replaced driver");
		}
	}

	/// Runs `commands` on the device inside a fresh task context.
	///
	/// Any work already running on the device is retired first. Fails with
	/// [`ControllerError::NoDriver`] when no driver is attached, and with
	/// [`ControllerError::Cancelled`] when the context is cancelled mid-batch.
	/// A failing command is not an error; it is reported in the outcome.
	///
	/// The driver and session are resolved while holding the device slot, so
	/// a run queued behind a cancel sees the device as the cancel left it.
	pub async fn run_on_device(&self, device: &DeviceId, commands: &[Command], options: &SessionOptions) -> Result<DeviceRun> {
		let slot = self.registry.lock_device(device).await;
		let driver = self.registry.driver(device).ok_or_else(|| ControllerError::NoDriver(device.clone()))?;
		let session = self.get_or_create_session(device, options);
		let context = self.registry.replace_task_context(device, &slot).await;
		drop(slot);

		info!(
			target = "devrun.facade",
			device = %device,
			session = %session.session_id,
			context = context.id(),
			commands = commands.len(),
			"running batch"
		);

		let session_id = &session.session_id;
		let batch = run_commands(
			&*driver,
			commands,
			|index, command| {
				debug!(target = "devrun.facade", device = %device, session = %session_id, index, command = %command, "command ok");
			},
			|index, command, err| {
				warn!(target = "devrun.facade", device = %device, session = %session_id, index, command = %command, error = %err, "command failed");
			},
			|| driver.screen_state(),
		);
		let outcome = context.run(batch).await?;

		Ok(DeviceRun { session, outcome })
	}

	pub fn register_device(&self, device: &DeviceId, summary: DeviceSummary) -> bool {
		self.tracker.register_device(device, summary)
	}

	pub fn devices(&self) -> Vec<DeviceState> {
		self.tracker.devices()
	}

	pub fn visible_devices(&self, connected: &[DeviceId]) -> Vec<DeviceState> {
		self.tracker.visible_devices(connected)
	}

	pub fn active_session(&self, device: &DeviceId) -> Option<SessionId> {
		self.tracker.active_session(device)
	}

	/// Feeds `events` into the session tracker on a background task.
	///
	/// The task ends when the stream ends or [`shutdown`](Self::shutdown) is called.
	pub fn spawn_observer<S>(&self, events: S) -> JoinHandle<()>
	where
		S: Stream<Item = SessionEvent> + Send + 'static,
	{
		let tracker = self.tracker.clone();
		let shutdown = self.shutdown.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = shutdown.cancelled() => {
					debug!(target = "devrun.facade", "session observer stopped by shutdown");
				}
				_ = tracker.observe_external_sessions(events) => {}
			}
		})
	}

	/// Stops every observer started by this controller.
	pub fn shutdown(&self) {
		info!(target = "devrun.facade", "controller shutting down");
		self.shutdown.cancel();
	}
}
