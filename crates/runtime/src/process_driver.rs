//! Driver backed by a native automation agent speaking NDJSON over stdio.
//!
//! Each request is one JSON line on the agent's stdin; the agent answers with
//! one JSON line on stdout:
//!
//! ```text
//! -> {"type":"execute","id":3,"index":0,"command":{"command":"tapOn","args":{"text":"Login"}}}
//! <- {"id":3,"ok":true}
//! -> {"type":"screen","id":4}
//! <- {"id":4,"ok":true,"screen":{"screenshot":"iVBO...","width":1080,"height":2400,"hierarchy":{}}}
//! ```
//!
//! [`ProcessDriver::close`] kills the agent without waiting for the in-flight
//! request, so a command stuck inside the native layer is interrupted and its
//! caller sees [`DriverError::Closed`].
//!
//! Replies without an `id` are taken as the answer to the current request
//! only while every earlier request was read to completion. Once a caller
//! abandons a request mid-exchange, its late reply could be mistaken for the
//! next one, so from then on only replies carrying the matching `id` count.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use devrun_protocol::{Command, ScreenState};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

use crate::driver::DeviceDriver;
use crate::error::{DriverError, Result};
use crate::process::{force_kill, pid_is_alive};

const CLOSE_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DriverRequest<'a> {
	Execute { id: u64, index: usize, command: &'a Command },
	Screen { id: u64 },
}

#[derive(Debug, Deserialize)]
struct DriverResponse {
	#[serde(default)]
	id: Option<u64>,
	ok: bool,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	screen: Option<ScreenState>,
}

struct AgentIo {
	stdin: ChildStdin,
	stdout: Lines<BufReader<ChildStdout>>,
	/// Request written but not yet answered.
	in_flight: Option<u64>,
	/// Set once a request was dropped before its reply was read.
	abandoned: bool,
}

/// Driver that owns a native agent subprocess.
pub struct ProcessDriver {
	name: String,
	pid: Option<u32>,
	child: parking_lot::Mutex<Option<Child>>,
	io: tokio::sync::Mutex<AgentIo>,
	next_id: AtomicU64,
	closed: AtomicBool,
}

impl ProcessDriver {
	/// Spawns `program` with `args` and takes ownership of its stdio.
	pub fn spawn(name: impl Into<String>, program: &str, args: &[String]) -> Result<Self> {
		let name = name.into();
		let mut child = tokio::process::Command::new(program)
			.args(args)
			.stdin(std::process::Stdio::piped())
			.stdout(std::process::Stdio::piped())
			.stderr(std::process::Stdio::null())
			.kill_on_drop(true)
			.spawn()
			.map_err(|source| DriverError::Spawn {
				program: program.to_string(),
				source,
			})?;

		let stdin = child.stdin.take().ok_or_else(|| DriverError::Protocol("agent stdin unavailable".to_string()))?;
		let stdout = child.stdout.take().ok_or_else(|| DriverError::Protocol("agent stdout unavailable".to_string()))?;
		let pid = child.id();

		info!(target = "devrun.driver", driver = %name, program, pid = ?pid, "driver agent started");

		Ok(Self {
			name,
			pid,
			child: parking_lot::Mutex::new(Some(child)),
			io: tokio::sync::Mutex::new(AgentIo {
				stdin,
				stdout: BufReader::new(stdout).lines(),
				in_flight: None,
				abandoned: false,
			}),
			next_id: AtomicU64::new(1),
			closed: AtomicBool::new(false),
		})
	}

	/// OS process id of the agent, when known.
	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	async fn request<'c>(&self, build: impl FnOnce(u64) -> DriverRequest<'c>) -> Result<DriverResponse> {
		if self.is_closed() {
			return Err(DriverError::Closed);
		}

		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let payload = serde_json::to_string(&build(id))?;

		let mut io = self.io.lock().await;
		// A kill during the exchange surfaces as a broken pipe or EOF; report it as closed.
		exchange(&mut io, &self.name, id, &payload)
			.await
			.map_err(|err| if self.is_closed() { DriverError::Closed } else { err })
	}
}

async fn exchange(io: &mut AgentIo, driver: &str, id: u64, payload: &str) -> Result<DriverResponse> {
	if let Some(previous) = io.in_flight.take() {
		debug!(target = "devrun.driver", driver, request = previous, "previous request was abandoned");
		io.abandoned = true;
	}
	io.in_flight = Some(id);

	io.stdin.write_all(format!("{payload}\n").as_bytes()).await?;
	io.stdin.flush().await?;
	loop {
		let Some(line) = io.stdout.next_line().await? else {
			return Err(DriverError::Protocol("agent closed its output".to_string()));
		};
		if line.trim().is_empty() {
			continue;
		}
		let response: DriverResponse = serde_json::from_str(&line)?;
		match response.id {
			Some(got) if got != id => {
				debug!(target = "devrun.driver", driver, expected = id, got, "skipping stale response");
			}
			None if io.abandoned => {
				return Err(DriverError::Protocol(format!("reply without id to request {id} after an abandoned request")));
			}
			_ => {
				io.in_flight = None;
				return Ok(response);
			}
		}
	}
}

#[async_trait]
impl DeviceDriver for ProcessDriver {
	fn name(&self) -> &str {
		&self.name
	}

	async fn execute(&self, index: usize, command: &Command) -> Result<()> {
		let response = self.request(|id| DriverRequest::Execute { id, index, command }).await?;
		if response.ok {
			Ok(())
		} else {
			Err(DriverError::Command(response.error.unwrap_or_else(|| format!("command `{command}` failed"))))
		}
	}

	async fn screen_state(&self) -> Result<ScreenState> {
		let response = self.request(|id| DriverRequest::Screen { id }).await?;
		if !response.ok {
			return Err(DriverError::Command(response.error.unwrap_or_else(|| "screen capture failed".to_string())));
		}
		response
			.screen
			.ok_or_else(|| DriverError::Protocol("screen response without screen state".to_string()))
	}

	async fn close(&self) -> Result<()> {
		if self.closed.swap(true, Ordering::AcqRel) {
			debug!(target = "devrun.driver", driver = %self.name, "driver already closed");
			return Ok(());
		}

		let Some(mut child) = self.child.lock().take() else {
			return Ok(());
		};

		child.start_kill()?;
		match tokio::time::timeout(CLOSE_WAIT, child.wait()).await {
			Ok(Ok(status)) => {
				info!(target = "devrun.driver", driver = %self.name, %status, "driver agent killed");
				Ok(())
			}
			Ok(Err(err)) => Err(err.into()),
			Err(_) => {
				let pid = self.pid.unwrap_or(0);
				warn!(target = "devrun.driver", driver = %self.name, pid, "agent did not exit after kill; forcing");
				if force_kill(pid) || !pid_is_alive(pid) {
					Ok(())
				} else {
					Err(DriverError::Protocol(format!("agent process {pid} survived kill")))
				}
			}
		}
	}
}
