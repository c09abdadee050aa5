//! Session status lifecycle and the records exchanged with the session log.

use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, SessionId};

/// How an ended session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionResult {
	Succeeded,
	Failed,
}

/// Status of a session as reported by the session log.
///
/// Transitions are monotonic: once a session is `Ended`, no later status for
/// the same id is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
	Started,
	Ended(SessionResult),
	Unknown,
}

impl SessionStatus {
	pub fn is_ended(&self) -> bool {
		matches!(self, SessionStatus::Ended(_))
	}
}

/// One entry of the external, append-only session-event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
	pub session_id: SessionId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_id: Option<DeviceId>,
	pub status: SessionStatus,
}

impl SessionEvent {
	pub fn started(session_id: impl Into<SessionId>, device_id: impl Into<DeviceId>) -> Self {
		Self {
			session_id: session_id.into(),
			device_id: Some(device_id.into()),
			status: SessionStatus::Started,
		}
	}

	pub fn ended(session_id: impl Into<SessionId>, device_id: impl Into<DeviceId>, result: SessionResult) -> Self {
		Self {
			session_id: session_id.into(),
			device_id: Some(device_id.into()),
			status: SessionStatus::Ended(result),
		}
	}
}

/// Status record persisted to the session log by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
	pub session_id: SessionId,
	pub device_id: DeviceId,
	pub status: SessionStatus,
	/// Unix timestamp in milliseconds.
	pub timestamp: u64,
}

impl SessionRecord {
	pub fn new(session_id: SessionId, device_id: DeviceId, status: SessionStatus) -> Self {
		let timestamp = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map(|d| d.as_millis() as u64)
			.unwrap_or(0);
		Self {
			session_id,
			device_id,
			status,
			timestamp,
		}
	}
}
