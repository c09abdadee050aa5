use devrun_protocol::DeviceId;
use devrun_runtime::DriverError;
use thiserror::Error;

/// Errors surfaced by the controller.
///
/// Teardown never produces these: cancellation and session end absorb their
/// own failures and only log them.
#[derive(Debug, Error)]
pub enum ControllerError {
	#[error("no driver registered for device {0}")]
	NoDriver(DeviceId),

	#[error("work on device {device} was cancelled: {reason}")]
	Cancelled { device: DeviceId, reason: String },

	#[error(transparent)]
	Driver(#[from] DriverError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("invalid configuration: {0}")]
	Config(String),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
