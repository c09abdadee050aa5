//! Forced, best-effort teardown of a device's resources.
//!
//! Teardown runs in a fixed order:
//!
//! 1. Driver: close the native handle (or reset the shared browser) and
//!    drop it from the registry. Close failures are logged, never returned.
//! 2. Task context: cancel it with a reason, then poll its active state for a
//!    bounded window. A context still active afterwards only produces a
//!    warning; task cancellation is cooperative and cannot be forced.
//! 3. Session: clear the device's active-session mapping.
//!
//! Every step runs regardless of how the previous one went, and running the
//! whole sequence on an idle device is a no-op.

use std::time::Duration;

use devrun_protocol::{DeviceId, SessionId, SessionResult};
use devrun_runtime::ManagedBrowser;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::registry::ResourceRegistry;
use super::task::TaskContext;
use crate::config::{ControllerConfig, DEFAULT_CANCEL_POLL_ATTEMPTS, DEFAULT_CANCEL_POLL_INTERVAL_MS};
use crate::session::SessionTracker;

const CANCEL_REASON: &str = "session cancelled by user";

/// Bounded wait used to verify that a cancelled context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetirePolicy {
	pub attempts: u32,
	pub interval: Duration,
}

impl Default for RetirePolicy {
	fn default() -> Self {
		Self {
			attempts: DEFAULT_CANCEL_POLL_ATTEMPTS,
			interval: Duration::from_millis(DEFAULT_CANCEL_POLL_INTERVAL_MS),
		}
	}
}

impl From<&ControllerConfig> for RetirePolicy {
	fn from(config: &ControllerConfig) -> Self {
		Self {
			attempts: config.cancel_poll_attempts,
			interval: config.cancel_poll_interval(),
		}
	}
}

/// What happened to the device's driver handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DriverTeardown {
	NotRegistered,
	Closed,
	CloseFailed { error: String },
	/// Shared browser left running; only its session state was reset.
	BrowserReset,
	BrowserResetFailed { error: String },
}

/// What happened to the device's task context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextTeardown {
	NotRegistered,
	AlreadyInactive,
	Stopped,
	/// Cancellation was requested but the work had not stopped within the window.
	StillActive,
}

/// Summary of one `cancel_session` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReport {
	pub device: DeviceId,
	pub driver: DriverTeardown,
	pub context: ContextTeardown,
	/// Session whose mapping was cleared, if there was one.
	pub session: Option<SessionId>,
}

/// Tears down everything registered for `device`. Never fails.
pub async fn cancel_session(registry: &ResourceRegistry, tracker: &SessionTracker, browser: Option<&dyn ManagedBrowser>, device: &DeviceId) -> CancelReport {
	let _slot = registry.lock_device(device).await;

	let driver = teardown_driver(registry, browser, device).await;

	let context = match registry.take_task_context(device) {
		Some(context) => retire_context(&context, CANCEL_REASON, registry.policy()).await,
		None => {
			debug!(target = "devrun.cancel", device = %device, "no task context registered");
			ContextTeardown::NotRegistered
		}
	};

	let session = tracker.end_session_with(device, SessionResult::Failed);

	info!(
		target = "devrun.cancel",
		device = %device,
		driver = ?driver,
		context = ?context,
		session = ?session.as_ref().map(SessionId::as_str),
		"session cancelled"
	);

	CancelReport {
		device: device.clone(),
		driver,
		context,
		session,
	}
}

/// Closes or resets the device's driver and drops it from the registry.
pub(crate) async fn teardown_driver(registry: &ResourceRegistry, browser: Option<&dyn ManagedBrowser>, device: &DeviceId) -> DriverTeardown {
	let Some(driver) = registry.take_driver(device) else {
		debug!(target = "devrun.cancel", device = %device, "no driver registered");
		return DriverTeardown::NotRegistered;
	};

	if let Some(browser) = browser.filter(|b| b.is_managed(device) && b.is_running()) {
		return match browser.reset_session().await {
			Ok(()) => {
				debug!(target = "devrun.cancel", device = %device, "shared browser reset for reuse");
				DriverTeardown::BrowserReset
			}
			Err(err) => {
				warn!(target = "devrun.cancel", device = %device, error = %err, "failed to reset shared browser");
				DriverTeardown::BrowserResetFailed { error: err.to_string() }
			}
		};
	}

	match driver.close().await {
		Ok(()) => {
			debug!(target = "devrun.cancel", device = %device, driver = driver.name(), "driver closed");
			DriverTeardown::Closed
		}
		Err(err) => {
			warn!(target = "devrun.cancel", device = %device, driver = driver.name(), error = %err, "failed to close driver");
			DriverTeardown::CloseFailed { error: err.to_string() }
		}
	}
}

/// Cancels `context` and waits a bounded time for it to become inactive.
pub(crate) async fn retire_context(context: &TaskContext, reason: &str, policy: &RetirePolicy) -> ContextTeardown {
	let device = context.device();
	if !context.is_active() {
		debug!(target = "devrun.cancel", device = %device, context = context.id(), "task context already inactive");
		return ContextTeardown::AlreadyInactive;
	}

	context.cancel(reason);

	for attempt in 0..policy.attempts {
		if !context.is_active() {
			debug!(target = "devrun.cancel", device = %device, context = context.id(), attempt, "task context stopped");
			return ContextTeardown::Stopped;
		}
		tokio::time::sleep(policy.interval).await;
	}

	if context.is_active() {
		warn!(
			target = "devrun.cancel",
			device = %device,
			context = context.id(),
			window = ?policy.interval * policy.attempts,
			"task context still active after cancellation; work may not have stopped"
		);
		ContextTeardown::StillActive
	} else {
		ContextTeardown::Stopped
	}
}
