use thiserror::Error;

/// Errors raised by native drivers.
#[derive(Debug, Error)]
pub enum DriverError {
	#[error("failed to spawn driver process `{program}`: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("driver I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("driver protocol error: {0}")]
	Protocol(String),

	#[error("driver is closed")]
	Closed,

	/// The device rejected or failed a command.
	#[error("{0}")]
	Command(String),
}

impl From<serde_json::Error> for DriverError {
	fn from(err: serde_json::Error) -> Self {
		DriverError::Protocol(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, DriverError>;
