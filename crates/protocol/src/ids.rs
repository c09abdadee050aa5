//! Device and session identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stable identifier of an emulator, simulator, physical unit, or managed browser.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for DeviceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for DeviceId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl From<String> for DeviceId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Identifier of one logical test run on one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// Generates `<prefix>-<millis>-<seq>`.
	///
	/// The sequence number is process-wide, so two ids generated in the same
	/// millisecond still differ.
	pub fn generate(prefix: &str) -> Self {
		let millis = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
		let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
		Self(format!("{prefix}-{millis}-{seq}"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for SessionId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
