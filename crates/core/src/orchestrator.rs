//! Fail-stop execution of a command batch against one driver.
//!
//! Commands run strictly in order. The first failure ends the batch; nothing
//! after it is attempted and nothing is retried. The screen is captured once
//! after the batch halts, whichever way it halted.
//!
//! Single-flight per driver is the caller's job; the facade gets it from the
//! resource registry.

use std::future::Future;

use devrun_protocol::{Command, CommandFailure, ExecutionOutcome, ScreenState};
use devrun_runtime::{DeviceDriver, DriverError};
use tracing::{debug, info, warn};

/// Runs `commands` on `driver` and folds the result with a final screen capture.
///
/// `on_complete` fires after every successful command and `on_failed` fires
/// for the single command that stopped the batch. `screen_state` is invoked
/// exactly once. A capture error is logged and replaced with an empty screen,
/// so the outcome always carries one.
pub async fn run_commands<C, F, S, Fut>(driver: &dyn DeviceDriver, commands: &[Command], mut on_complete: C, mut on_failed: F, screen_state: S) -> ExecutionOutcome
where
	C: FnMut(usize, &Command),
	F: FnMut(usize, &Command, &DriverError),
	S: FnOnce() -> Fut,
	Fut: Future<Output = devrun_runtime::Result<ScreenState>>,
{
	let mut failure = None;

	for (index, command) in commands.iter().enumerate() {
		match driver.execute(index, command).await {
			Ok(()) => {
				debug!(target = "devrun.orchestrator", driver = driver.name(), index, command = %command, "command completed");
				on_complete(index, command);
			}
			Err(err) => {
				warn!(target = "devrun.orchestrator", driver = driver.name(), index, command = %command, error = %err, "command failed; stopping batch");
				on_failed(index, command, &err);
				failure = Some(CommandFailure {
					index,
					command: command.clone(),
					cause: err.to_string(),
				});
				break;
			}
		}
	}

	let screen = match screen_state().await {
		Ok(screen) => screen,
		Err(err) => {
			warn!(target = "devrun.orchestrator", driver = driver.name(), error = %err, "screen capture failed");
			ScreenState::empty()
		}
	};

	match failure {
		Some(failure) => ExecutionOutcome::failed(failure, screen),
		None => {
			info!(target = "devrun.orchestrator", driver = driver.name(), commands = commands.len(), "batch completed");
			ExecutionOutcome::succeeded(screen)
		}
	}
}
