//! Session status persistence.
//!
//! The tracker appends a record whenever it starts or ends a session. Appends
//! are best effort: callers log failures and carry on with the in-memory
//! transition.
//!
//! `append` runs synchronously under the tracker's state lock, on whatever
//! task made the transition. Sinks must return quickly and must not call back
//! into the tracker. A sink that needs slow I/O should hand records to its own
//! writer task.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use devrun_protocol::SessionRecord;
use parking_lot::Mutex;

use crate::error::Result;

/// Sink for session status records.
pub trait SessionLog: Send + Sync {
	fn append(&self, record: &SessionRecord) -> Result<()>;
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSessionLog;

impl SessionLog for NullSessionLog {
	fn append(&self, _record: &SessionRecord) -> Result<()> {
		Ok(())
	}
}

/// Append-only JSON-lines file.
///
/// The file is opened on the first append and kept open, so each later record
/// costs a single write.
#[derive(Debug)]
pub struct JsonlSessionLog {
	path: PathBuf,
	file: Mutex<Option<File>>,
}

impl JsonlSessionLog {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			file: Mutex::new(None),
		}
	}

	fn open(&self) -> Result<File> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		Ok(OpenOptions::new().create(true).append(true).open(&self.path)?)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Reads every record back, skipping lines that do not parse.
	pub fn load(&self) -> Result<Vec<SessionRecord>> {
		let content = match std::fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(err) => return Err(err.into()),
		};
		Ok(content
			.lines()
			.filter(|line| !line.trim().is_empty())
			.filter_map(|line| serde_json::from_str(line).ok())
			.collect())
	}
}

impl SessionLog for JsonlSessionLog {
	fn append(&self, record: &SessionRecord) -> Result<()> {
		let line = format!("{}\n", serde_json::to_string(record)?);
		let mut file = self.file.lock();
		let mut handle = match file.take() {
			Some(handle) => handle,
			None => self.open()?,
		};
		// A failed write drops the handle so the next append reopens the path.
		handle.write_all(line.as_bytes())?;
		*file = Some(handle);
		Ok(())
	}
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySessionLog {
	records: Mutex<Vec<SessionRecord>>,
}

impl MemorySessionLog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn records(&self) -> Vec<SessionRecord> {
		self.records.lock().clone()
	}
}

impl SessionLog for MemorySessionLog {
	fn append(&self, record: &SessionRecord) -> Result<()> {
		self.records.lock().push(record.clone());
		Ok(())
	}
}
