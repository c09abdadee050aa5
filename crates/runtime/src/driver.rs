//! Driver and managed-browser abstractions consumed by the controller.

use std::sync::Arc;

use async_trait::async_trait;
use devrun_protocol::{Command, DeviceId, ScreenState};

use crate::error::Result;

/// Live connection to a device's native automation backend.
///
/// Implementations must allow [`close`](DeviceDriver::close) to be called
/// concurrently with an in-flight [`execute`](DeviceDriver::execute); closing
/// is how a stuck native operation gets interrupted.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
	/// Backend kind, used in logs.
	fn name(&self) -> &str;

	/// Executes a single command. `index` is the command's position in its batch.
	async fn execute(&self, index: usize, command: &Command) -> Result<()>;

	/// Captures screenshot, dimensions, and UI hierarchy.
	async fn screen_state(&self) -> Result<ScreenState>;

	/// Releases the native backend. May fail; callers log and continue.
	async fn close(&self) -> Result<()>;
}

/// Shared reference to a registered driver.
pub type DriverHandle = Arc<dyn DeviceDriver>;

/// Status and control of the single shared browser instance.
#[async_trait]
pub trait ManagedBrowser: Send + Sync {
	/// Whether `device` is the shared browser.
	fn is_managed(&self, device: &DeviceId) -> bool;

	/// Whether the shared browser is currently running.
	fn is_running(&self) -> bool;

	/// Clears cookies and navigates to a blank page so the browser can be reused.
	async fn reset_session(&self) -> Result<()>;
}
