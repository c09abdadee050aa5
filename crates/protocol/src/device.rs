//! Device summaries and state records.

use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, SessionId};

/// Platform family of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
	Android,
	Ios,
	Web,
}

impl std::fmt::Display for Platform {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Platform::Android => write!(f, "android"),
			Platform::Ios => write!(f, "ios"),
			Platform::Web => write!(f, "web"),
		}
	}
}

/// Last-known description of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
	pub platform: Platform,
	/// Native backend kind, e.g. `uiautomator`, `xctest`, `chromium`.
	pub driver_type: String,
	#[serde(default)]
	pub description: String,
}

impl DeviceSummary {
	pub fn new(platform: Platform, driver_type: impl Into<String>) -> Self {
		Self {
			platform,
			driver_type: driver_type.into(),
			description: String::new(),
		}
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = description.into();
		self
	}
}

/// Read-only view of a known device and its active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
	pub device: DeviceId,
	/// `None` for a device only known from a session it ran, e.g. one
	/// discovered through the external event stream.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub summary: Option<DeviceSummary>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub active_session: Option<SessionId>,
}
