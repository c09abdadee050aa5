//! Authoritative device → active-session mapping.
//!
//! Two paths mutate the mapping: direct calls from the controller, and the
//! observer loop reading the external session-event stream. Both go through
//! the same lock, and every read-modify-write of a device's entry happens
//! inside a single critical section. Session records are appended inside that
//! same critical section, so the log sees transitions in the order they happened.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use devrun_protocol::{DeviceId, DeviceState, DeviceSummary, SessionEvent, SessionId, SessionRecord, SessionResult, SessionStatus};
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::log::{NullSessionLog, SessionLog};

/// Result of [`SessionTracker::get_or_create_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSession {
	pub session_id: SessionId,
	pub is_new_session: bool,
}

#[derive(Debug, Default)]
struct TrackerState {
	/// Every device seen so far; the summary is filled in once one is supplied.
	devices: HashMap<DeviceId, Option<DeviceSummary>>,
	active: HashMap<DeviceId, SessionId>,
	/// Every session id this tracker has created, tracked, or observed.
	seen: HashSet<SessionId>,
}

impl TrackerState {
	fn register(&mut self, device: &DeviceId, summary: Option<DeviceSummary>) {
		let known = self.devices.entry(device.clone()).or_default();
		if known.is_none() {
			*known = summary;
		}
	}

	fn track(&mut self, device: &DeviceId, session: &SessionId, summary: Option<DeviceSummary>) -> Option<SessionId> {
		self.seen.insert(session.clone());
		self.register(device, summary);
		self.active.insert(device.clone(), session.clone())
	}

	fn device_of(&self, session: &SessionId) -> Option<DeviceId> {
		self.active.iter().find(|(_, active)| *active == session).map(|(device, _)| device.clone())
	}
}

/// Tracks which device is running which session.
pub struct SessionTracker {
	state: Mutex<TrackerState>,
	changes: watch::Sender<u64>,
	log: Arc<dyn SessionLog>,
}

impl Default for SessionTracker {
	fn default() -> Self {
		Self::new(Arc::new(NullSessionLog))
	}
}

impl SessionTracker {
	pub fn new(log: Arc<dyn SessionLog>) -> Self {
		let (changes, _) = watch::channel(0);
		Self {
			state: Mutex::new(TrackerState::default()),
			changes,
			log,
		}
	}

	/// Returns the device's session, creating one when none exists or `force_new` is set.
	///
	/// A new id is stored before this returns, so concurrent callers for the same
	/// device observe the same id and exactly one of them sees `is_new_session`.
	pub fn get_or_create_session(&self, device: &DeviceId, force_new: bool, id_prefix: &str, summary: Option<DeviceSummary>) -> ResolvedSession {
		let (session_id, superseded) = {
			let mut state = self.state.lock();
			if !force_new {
				if let Some(existing) = state.active.get(device).cloned() {
					state.register(device, summary);
					return ResolvedSession {
						session_id: existing,
						is_new_session: false,
					};
				}
			}

			let session_id = SessionId::generate(id_prefix);
			let superseded = state.track(device, &session_id, summary);
			self.persist(&session_id, device, SessionStatus::Started);
			(session_id, superseded)
		};

		if let Some(old) = superseded {
			debug!(target = "devrun.session", device = %device, session = %old, "session superseded by forced new session");
		}
		info!(target = "devrun.session", device = %device, session = %session_id, "session created");

		self.notify();

		ResolvedSession {
			session_id,
			is_new_session: true,
		}
	}

	/// Sets the device's session unconditionally, e.g. for a session discovered elsewhere.
	pub fn track_active_session(&self, device: &DeviceId, session: &SessionId, summary: Option<DeviceSummary>) {
		let previous = self.state.lock().track(device, session, summary);
		if previous.as_ref() != Some(session) {
			info!(target = "devrun.session", device = %device, session = %session, "tracking active session");
			self.notify();
		}
	}

	/// Clears the device's session and records it as succeeded.
	pub fn end_session(&self, device: &DeviceId) -> Option<SessionId> {
		self.end_session_with(device, SessionResult::Succeeded)
	}

	/// Clears the device's session and records `result`.
	///
	/// Returns `None` when the device had no session. A failed log append is
	/// logged and never prevents the mapping from being cleared.
	pub fn end_session_with(&self, device: &DeviceId, result: SessionResult) -> Option<SessionId> {
		let session = {
			let mut state = self.state.lock();
			let Some(session) = state.active.remove(device) else {
				debug!(target = "devrun.session", device = %device, "no active session to end");
				return None;
			};
			self.persist(&session, device, SessionStatus::Ended(result));
			session
		};

		info!(target = "devrun.session", device = %device, session = %session, ?result, "session ended");
		self.notify();
		Some(session)
	}

	pub fn active_session(&self, device: &DeviceId) -> Option<SessionId> {
		self.state.lock().active.get(device).cloned()
	}

	/// Records or refreshes a device's summary. Returns `true` for a first sighting.
	pub fn register_device(&self, device: &DeviceId, summary: DeviceSummary) -> bool {
		let previous = self.state.lock().devices.insert(device.clone(), Some(summary));
		if previous.is_none() {
			debug!(target = "devrun.session", device = %device, "device registered");
		}
		previous.is_none()
	}

	/// Snapshot of every known device, ordered by id.
	pub fn devices(&self) -> Vec<DeviceState> {
		let state = self.state.lock();
		let mut devices: Vec<DeviceState> = state
			.devices
			.iter()
			.map(|(device, summary)| DeviceState {
				device: device.clone(),
				summary: summary.clone(),
				active_session: state.active.get(device).cloned(),
			})
			.collect();
		devices.sort_by(|a, b| a.device.cmp(&b.device));
		devices
	}

	/// Known devices that are currently connected. History for the rest is kept.
	pub fn visible_devices(&self, connected: &[DeviceId]) -> Vec<DeviceState> {
		self.devices().into_iter().filter(|state| connected.contains(&state.device)).collect()
	}

	/// Applies one external session event.
	///
	/// A newly seen, not-yet-ended session becomes its device's active session.
	/// An `Ended` event clears a mapping only while that session is still the
	/// device's current one; ends of superseded sessions are ignored.
	pub fn apply_event(&self, event: &SessionEvent) {
		let mut changed = false;
		{
			let mut state = self.state.lock();
			let newly_seen = !state.seen.contains(&event.session_id);

			if newly_seen && !event.status.is_ended() {
				if let Some(device) = &event.device_id {
					state.track(device, &event.session_id, None);
					info!(target = "devrun.session", device = %device, session = %event.session_id, "session discovered");
					changed = true;
				}
			}
			state.seen.insert(event.session_id.clone());

			if event.status.is_ended() {
				match state.device_of(&event.session_id) {
					Some(device) => {
						state.active.remove(&device);
						info!(target = "devrun.session", device = %device, session = %event.session_id, "session ended externally");
						changed = true;
					}
					None => {
						debug!(target = "devrun.session", session = %event.session_id, "ignoring end of inactive session");
					}
				}
			}
		}

		if changed {
			self.notify();
		}
	}

	/// Applies events until the stream ends.
	pub async fn observe_external_sessions<S>(&self, events: S)
	where
		S: Stream<Item = SessionEvent>,
	{
		let mut events = std::pin::pin!(events);
		while let Some(event) = events.next().await {
			self.apply_event(&event);
		}
		debug!(target = "devrun.session", "session event stream ended");
	}

	/// Waits up to `timeout` for the device to have a session.
	pub async fn await_session(&self, device: &DeviceId, timeout: Duration) -> Option<SessionId> {
		let mut changes = self.changes.subscribe();
		if let Some(session) = self.active_session(device) {
			return Some(session);
		}

		let wait = async {
			while changes.changed().await.is_ok() {
				if let Some(session) = self.active_session(device) {
					return Some(session);
				}
			}
			None
		};

		match tokio::time::timeout(timeout, wait).await {
			Ok(found) => found,
			Err(_) => {
				debug!(target = "devrun.session", device = %device, ?timeout, "timed out waiting for session");
				None
			}
		}
	}

	fn notify(&self) {
		self.changes.send_modify(|version| *version = version.wrapping_add(1));
	}

	/// Appends a record. Callers hold the state lock.
	fn persist(&self, session: &SessionId, device: &DeviceId, status: SessionStatus) {
		let record = SessionRecord::new(session.clone(), device.clone(), status);
		if let Err(err) = self.log.append(&record) {
			warn!(
				target = "devrun.session",
				device = %device,
				session = %session,
				error = %err,
				"failed to persist session record"
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use devrun_protocol::Platform;

	use super::*;
	use crate::error::{ControllerError, Result};
	use crate::session::log::MemorySessionLog;

	struct FailingLog;

	impl SessionLog for FailingLog {
		fn append(&self, _record: &SessionRecord) -> Result<()> {
			Err(ControllerError::Io(std::io::Error::other("disk full")))
		}
	}

	fn dev(id: &str) -> DeviceId {
		DeviceId::from(id)
	}

	#[test]
	fn get_or_create_reuses_existing_session() {
		let tracker = SessionTracker::default();
		let first = tracker.get_or_create_session(&dev("dev-1"), false, "tool", None);
		assert!(first.is_new_session);
		assert!(first.session_id.as_str().starts_with("tool-"));

		let second = tracker.get_or_create_session(&dev("dev-1"), false, "tool", None);
		assert_eq!(second.session_id, first.session_id);
		assert!(!second.is_new_session);
	}

	#[test]
	fn force_new_replaces_session() {
		let tracker = SessionTracker::default();
		let first = tracker.get_or_create_session(&dev("dev-1"), false, "tool", None);
		let forced = tracker.get_or_create_session(&dev("dev-1"), true, "tool", None);
		assert!(forced.is_new_session);
		assert_ne!(forced.session_id, first.session_id);
		assert_eq!(tracker.active_session(&dev("dev-1")), Some(forced.session_id));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_callers_share_one_new_session() {
		let tracker = Arc::new(SessionTracker::default());
		let mut tasks = Vec::new();
		for _ in 0..16 {
			let tracker = tracker.clone();
			tasks.push(tokio::spawn(async move { tracker.get_or_create_session(&dev("fresh"), false, "tool", None) }));
		}

		let mut results = Vec::new();
		for task in tasks {
			results.push(task.await.unwrap());
		}

		let first = &results[0].session_id;
		assert!(results.iter().all(|r| &r.session_id == first));
		assert_eq!(results.iter().filter(|r| r.is_new_session).count(), 1);
	}

	#[test]
	fn summary_registers_device_with_session() {
		let tracker = SessionTracker::default();
		let summary = DeviceSummary::new(Platform::Android, "uiautomator").with_description("Pixel 8");
		let resolved = tracker.get_or_create_session(&dev("emulator-5554"), false, "studio", Some(summary.clone()));

		let devices = tracker.devices();
		assert_eq!(devices.len(), 1);
		assert_eq!(devices[0].summary, Some(summary));
		assert_eq!(devices[0].active_session, Some(resolved.session_id));
	}

	#[test]
	fn end_session_clears_and_persists() {
		let log = Arc::new(MemorySessionLog::new());
		let tracker = SessionTracker::new(log.clone());
		let resolved = tracker.get_or_create_session(&dev("dev-1"), false, "tool", None);

		assert_eq!(tracker.end_session(&dev("dev-1")), Some(resolved.session_id.clone()));
		assert_eq!(tracker.active_session(&dev("dev-1")), None);
		assert_eq!(tracker.end_session(&dev("dev-1")), None);

		let statuses: Vec<_> = log.records().into_iter().map(|r| r.status).collect();
		assert_eq!(statuses, vec![SessionStatus::Started, SessionStatus::Ended(SessionResult::Succeeded)]);
	}

	#[test]
	fn persistence_failure_does_not_block_end() {
		let tracker = SessionTracker::new(Arc::new(FailingLog));
		let resolved = tracker.get_or_create_session(&dev("dev-1"), false, "tool", None);
		assert_eq!(tracker.end_session(&dev("dev-1")), Some(resolved.session_id));
		assert_eq!(tracker.active_session(&dev("dev-1")), None);
	}

	#[test]
	fn stale_end_event_keeps_newer_session() {
		let tracker = SessionTracker::default();
		tracker.apply_event(&SessionEvent::started("s1", "dev-d"));
		tracker.apply_event(&SessionEvent::ended("s1", "dev-d", SessionResult::Succeeded));
		assert_eq!(tracker.active_session(&dev("dev-d")), None);

		let s2 = tracker.get_or_create_session(&dev("dev-d"), false, "tool", None);
		tracker.apply_event(&SessionEvent::ended("s1", "dev-d", SessionResult::Failed));
		tracker.apply_event(&SessionEvent::started("s1", "dev-d"));

		assert_eq!(tracker.active_session(&dev("dev-d")), Some(s2.session_id));
	}

	#[test]
	fn end_event_for_current_session_clears_it() {
		let tracker = SessionTracker::default();
		let resolved = tracker.get_or_create_session(&dev("dev-1"), false, "tool", None);
		tracker.apply_event(&SessionEvent::ended(resolved.session_id.clone(), "dev-1", SessionResult::Failed));
		assert_eq!(tracker.active_session(&dev("dev-1")), None);
	}

	#[test]
	fn already_ended_unseen_session_is_not_tracked() {
		let tracker = SessionTracker::default();
		tracker.apply_event(&SessionEvent::ended("old", "dev-1", SessionResult::Succeeded));
		assert_eq!(tracker.active_session(&dev("dev-1")), None);
	}

	#[test]
	fn event_without_device_tracks_nothing() {
		let tracker = SessionTracker::default();
		tracker.apply_event(&SessionEvent {
			session_id: SessionId::from("orphan"),
			device_id: None,
			status: SessionStatus::Started,
		});
		assert!(tracker.devices().is_empty());

		tracker.apply_event(&SessionEvent::started("orphan", "dev-1"));
		assert_eq!(tracker.active_session(&dev("dev-1")), None);
	}

	#[test]
	fn end_event_without_device_clears_current_session() {
		let tracker = SessionTracker::default();
		tracker.apply_event(&SessionEvent::started("s1", "dev-1"));
		tracker.apply_event(&SessionEvent {
			session_id: SessionId::from("s1"),
			device_id: None,
			status: SessionStatus::Ended(SessionResult::Succeeded),
		});
		assert_eq!(tracker.active_session(&dev("dev-1")), None);
	}

	#[test]
	fn replayed_events_for_seen_session_change_nothing() {
		let tracker = SessionTracker::default();
		tracker.apply_event(&SessionEvent::started("s1", "dev-1"));
		let s2 = tracker.get_or_create_session(&dev("dev-1"), true, "tool", None);

		tracker.apply_event(&SessionEvent::started("s1", "dev-1"));
		tracker.apply_event(&SessionEvent {
			session_id: SessionId::from("s1"),
			device_id: Some(dev("dev-2")),
			status: SessionStatus::Unknown,
		});

		assert_eq!(tracker.active_session(&dev("dev-1")), Some(s2.session_id));
		assert_eq!(tracker.active_session(&dev("dev-2")), None);
	}

	#[test]
	fn discovered_session_lists_its_device() {
		let tracker = SessionTracker::default();
		tracker.apply_event(&SessionEvent::started("ext-1", "pixel-8"));

		let devices = tracker.devices();
		assert_eq!(devices.len(), 1);
		assert_eq!(devices[0].device, dev("pixel-8"));
		assert_eq!(devices[0].summary, None);
		assert_eq!(devices[0].active_session, Some(SessionId::from("ext-1")));
		assert_eq!(tracker.visible_devices(&[dev("pixel-8")]).len(), 1);
	}

	/// Holds the first `Started` append open until another thread has had a
	/// chance to race an end for the same device.
	struct SlowStartLog {
		inner: MemorySessionLog,
		entered: std::sync::atomic::AtomicBool,
	}

	impl SessionLog for SlowStartLog {
		fn append(&self, record: &SessionRecord) -> Result<()> {
			if record.status == SessionStatus::Started {
				self.entered.store(true, std::sync::atomic::Ordering::SeqCst);
				std::thread::sleep(Duration::from_millis(50));
			}
			self.inner.append(record)
		}
	}

	#[test]
	fn log_records_follow_transition_order() {
		let log = Arc::new(SlowStartLog {
			inner: MemorySessionLog::new(),
			entered: std::sync::atomic::AtomicBool::new(false),
		});
		let tracker = SessionTracker::new(log.clone());

		std::thread::scope(|scope| {
			scope.spawn(|| tracker.get_or_create_session(&dev("dev-1"), false, "tool", None));
			scope.spawn(|| {
				while !log.entered.load(std::sync::atomic::Ordering::SeqCst) {
					std::thread::yield_now();
				}
				tracker.end_session(&dev("dev-1"))
			});
		});

		let statuses: Vec<SessionStatus> = log.inner.records().into_iter().map(|r| r.status).collect();
		assert_eq!(statuses, vec![SessionStatus::Started, SessionStatus::Ended(SessionResult::Succeeded)]);
		assert_eq!(tracker.active_session(&dev("dev-1")), None);
	}

	#[tokio::test]
	async fn observer_applies_stream_in_order() {
		let tracker = SessionTracker::default();
		let events = futures_util::stream::iter(vec![
			SessionEvent::started("a", "dev-1"),
			SessionEvent::started("b", "dev-2"),
			SessionEvent::ended("a", "dev-1", SessionResult::Succeeded),
		]);
		tracker.observe_external_sessions(events).await;

		assert_eq!(tracker.active_session(&dev("dev-1")), None);
		assert_eq!(tracker.active_session(&dev("dev-2")), Some(SessionId::from("b")));
	}

	#[tokio::test]
	async fn await_session_returns_existing_immediately() {
		let tracker = SessionTracker::default();
		tracker.track_active_session(&dev("dev-1"), &SessionId::from("known"), None);
		let found = tracker.await_session(&dev("dev-1"), Duration::from_millis(1)).await;
		assert_eq!(found, Some(SessionId::from("known")));
	}

	#[tokio::test]
	async fn await_session_wakes_on_discovery() {
		let tracker = Arc::new(SessionTracker::default());
		let waiter = tokio::spawn({
			let tracker = tracker.clone();
			async move { tracker.await_session(&dev("dev-1"), Duration::from_secs(5)).await }
		});

		tokio::time::sleep(Duration::from_millis(20)).await;
		tracker.apply_event(&SessionEvent::started("other", "dev-2"));
		tracker.apply_event(&SessionEvent::started("mine", "dev-1"));

		assert_eq!(waiter.await.unwrap(), Some(SessionId::from("mine")));
	}

	#[tokio::test(start_paused = true)]
	async fn await_session_times_out() {
		let tracker = SessionTracker::default();
		assert_eq!(tracker.await_session(&dev("dev-1"), Duration::from_secs(1)).await, None);
	}

	#[test]
	fn visible_devices_filters_without_forgetting() {
		let tracker = SessionTracker::default();
		assert!(tracker.register_device(&dev("a"), DeviceSummary::new(Platform::Ios, "xctest")));
		assert!(tracker.register_device(&dev("b"), DeviceSummary::new(Platform::Web, "chromium")));
		assert!(!tracker.register_device(&dev("a"), DeviceSummary::new(Platform::Ios, "xctest").with_description("iPhone 15")));

		let visible = tracker.visible_devices(&[dev("b")]);
		assert_eq!(visible.len(), 1);
		assert_eq!(visible[0].device, dev("b"));
		assert_eq!(tracker.devices().len(), 2);
		assert_eq!(tracker.devices()[0].summary.as_ref().map(|s| s.description.as_str()), Some("iPhone 15"));
	}
}
