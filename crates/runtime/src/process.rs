//! Liveness and termination helpers for native driver processes.
//!
//! Both helpers shell out to the platform's own tools (`kill`, `tasklist`,
//! `taskkill`) so they also work on agents the driver did not spawn itself.

use tracing::debug;

/// Returns `true` when a process with `pid` appears alive on this platform.
pub fn pid_is_alive(pid: u32) -> bool {
	if pid == 0 {
		return false;
	}
	platform::is_alive(pid).unwrap_or(pid == std::process::id())
}

/// Sends an unconditional kill to `pid`. Returns `true` when the signal was delivered.
///
/// Used when a driver agent survives the kill of its child handle, e.g. because
/// it re-parented a helper. Refuses to target pid 0 or the current process.
pub fn force_kill(pid: u32) -> bool {
	if pid == 0 || pid == std::process::id() {
		return false;
	}

	match platform::kill(pid) {
		Ok(true) => true,
		Ok(false) => {
			debug!(target = "devrun.driver", pid, "kill returned non-zero");
			false
		}
		Err(err) => {
			debug!(target = "devrun.driver", pid, error = %err, "failed to run kill");
			false
		}
	}
}

#[cfg(unix)]
mod platform {
	use std::io;
	use std::process::Command;

	/// `None` when the check itself could not run.
	pub(super) fn is_alive(pid: u32) -> Option<bool> {
		if std::path::Path::new("/proc").join(pid.to_string()).exists() {
			return Some(true);
		}
		Command::new("kill").args(["-0", &pid.to_string()]).status().ok().map(|s| s.success())
	}

	pub(super) fn kill(pid: u32) -> io::Result<bool> {
		Command::new("kill").args(["-KILL", &pid.to_string()]).status().map(|s| s.success())
	}
}

#[cfg(windows)]
mod platform {
	use std::io;
	use std::process::Command;

	pub(super) fn is_alive(pid: u32) -> Option<bool> {
		let filter = format!("PID eq {pid}");
		let output = Command::new("tasklist").args(["/FI", &filter, "/FO", "CSV", "/NH"]).output().ok()?;
		if !output.status.success() {
			return None;
		}
		Some(super::csv_lists_pid(&String::from_utf8_lossy(&output.stdout), pid))
	}

	pub(super) fn kill(pid: u32) -> io::Result<bool> {
		Command::new("taskkill").args(["/PID", &pid.to_string(), "/T", "/F"]).status().map(|s| s.success())
	}
}

#[cfg(not(any(unix, windows)))]
mod platform {
	use std::io;

	pub(super) fn is_alive(_pid: u32) -> Option<bool> {
		None
	}

	pub(super) fn kill(_pid: u32) -> io::Result<bool> {
		Err(io::Error::other("process kill is unsupported on this platform"))
	}
}

/// Whether `tasklist /FO CSV` output has a row whose PID column is `pid`.
#[cfg(any(test, windows))]
fn csv_lists_pid(output: &str, pid: u32) -> bool {
	let wanted = pid.to_string();
	output
		.lines()
		.map(str::trim)
		.filter(|row| row.starts_with('"'))
		.filter_map(|row| row.trim_matches('"').split("\",\"").nth(1))
		.any(|column| column.trim() == wanted)
}
