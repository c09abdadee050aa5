//! Controller configuration.
//!
//! Values load from an optional JSON file and can be overridden from the
//! environment:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `DEVRUN_SESSION_LOG` | `sessionLogPath` | none (records discarded) |
//! | `DEVRUN_SESSION_WAIT_MS` | `sessionWaitTimeoutMs` | `30000` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};

pub const ENV_SESSION_LOG: &str = "DEVRUN_SESSION_LOG";
pub const ENV_SESSION_WAIT_MS: &str = "DEVRUN_SESSION_WAIT_MS";

pub const DEFAULT_SESSION_WAIT_MS: u64 = 30_000;
pub const DEFAULT_CANCEL_POLL_ATTEMPTS: u32 = 5;
pub const DEFAULT_CANCEL_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
	/// Default wait for `await_session`.
	pub session_wait_timeout_ms: u64,
	/// How many times cancellation checks whether a task context stopped.
	pub cancel_poll_attempts: u32,
	pub cancel_poll_interval_ms: u64,
	/// JSONL file receiving session status records.
	pub session_log_path: Option<PathBuf>,
}

impl Default for ControllerConfig {
	fn default() -> Self {
		Self {
			session_wait_timeout_ms: DEFAULT_SESSION_WAIT_MS,
			cancel_poll_attempts: DEFAULT_CANCEL_POLL_ATTEMPTS,
			cancel_poll_interval_ms: DEFAULT_CANCEL_POLL_INTERVAL_MS,
			session_log_path: None,
		}
	}
}

impl ControllerConfig {
	/// Loads a JSON config file. Missing keys take their defaults.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)?;
		let config: Self = serde_json::from_str(&content)?;
		config.validate()?;
		Ok(config)
	}

	/// Defaults with environment overrides applied.
	pub fn from_env() -> Self {
		Self::default().with_env_overrides()
	}

	pub fn with_env_overrides(mut self) -> Self {
		if let Ok(path) = std::env::var(ENV_SESSION_LOG) {
			if !path.trim().is_empty() {
				self.session_log_path = Some(PathBuf::from(path));
			}
		}
		if let Some(ms) = std::env::var(ENV_SESSION_WAIT_MS).ok().and_then(|v| v.parse().ok()) {
			self.session_wait_timeout_ms = ms;
		}
		self
	}

	pub fn validate(&self) -> Result<()> {
		if self.cancel_poll_attempts == 0 {
			return Err(ControllerError::Config("cancelPollAttempts must be at least 1".to_string()));
		}
		Ok(())
	}

	pub fn session_wait_timeout(&self) -> Duration {
		Duration::from_millis(self.session_wait_timeout_ms)
	}

	pub fn cancel_poll_interval(&self) -> Duration {
		Duration::from_millis(self.cancel_poll_interval_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_cancellation_window() {
		let config = ControllerConfig::default();
		assert_eq!(config.session_wait_timeout(), Duration::from_secs(30));
		assert_eq!(config.cancel_poll_attempts, 5);
		assert_eq!(config.cancel_poll_interval() * config.cancel_poll_attempts, Duration::from_millis(500));
	}

	#[test]
	fn load_fills_missing_keys() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("devrun.json");
		std::fs::write(&path, r#"{"sessionWaitTimeoutMs":1000,"sessionLogPath":"/var/log/devrun/sessions.jsonl"}"#).unwrap();

		let config = ControllerConfig::load(&path).unwrap();
		assert_eq!(config.session_wait_timeout_ms, 1000);
		assert_eq!(config.cancel_poll_attempts, DEFAULT_CANCEL_POLL_ATTEMPTS);
		assert_eq!(config.session_log_path, Some(PathBuf::from("/var/log/devrun/sessions.jsonl")));
	}

	#[test]
	fn load_rejects_zero_poll_attempts() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("devrun.json");
		std::fs::write(&path, r#"{"cancelPollAttempts":0}"#).unwrap();

		let err = ControllerConfig::load(&path).unwrap_err();
		assert!(matches!(err, ControllerError::Config(_)));
	}
}
