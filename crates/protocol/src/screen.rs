//! Screen state snapshots and batch execution outcomes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::command::CommandFailure;

/// Screenshot, dimensions, and UI hierarchy captured after a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenState {
	/// PNG bytes; base64 on the wire.
	#[serde(with = "base64_bytes", default)]
	pub screenshot: Vec<u8>,
	pub width: u32,
	pub height: u32,
	/// UI hierarchy snapshot as produced by the driver.
	#[serde(default)]
	pub hierarchy: Value,
}

impl ScreenState {
	/// Placeholder used when the driver could not capture anything.
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.screenshot.is_empty() && self.width == 0 && self.height == 0 && self.hierarchy.is_null()
	}
}

/// Result of running one command batch on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failure: Option<CommandFailure>,
	pub screen: ScreenState,
}

impl ExecutionOutcome {
	pub fn succeeded(screen: ScreenState) -> Self {
		Self {
			success: true,
			failure: None,
			screen,
		}
	}

	pub fn failed(failure: CommandFailure, screen: ScreenState) -> Self {
		Self {
			success: false,
			failure: Some(failure),
			screen,
		}
	}

	/// Index of the failing command, if any.
	pub fn failed_index(&self) -> Option<usize> {
		self.failure.as_ref().map(|f| f.index)
	}
}

mod base64_bytes {
	use super::*;

	pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let encoded = String::deserialize(deserializer)?;
		STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
	}
}
