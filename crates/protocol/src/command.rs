//! Opaque test commands and per-command failure records.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single externally defined action.
///
/// The controller never interprets `args`; it only forwards the command to the
/// driver and reports it back in callbacks and outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
	pub command: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub args: Value,
}

impl Command {
	pub fn new(command: impl Into<String>, args: Value) -> Self {
		Self {
			command: command.into(),
			args,
		}
	}

	/// A command without arguments.
	pub fn named(command: impl Into<String>) -> Self {
		Self::new(command, Value::Null)
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.command)
	}
}

/// The first failing command of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailure {
	pub index: usize,
	pub command: Command,
	pub cause: String,
}
