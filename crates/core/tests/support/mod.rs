//! In-memory drivers for exercising the controller without native backends.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use devrun::protocol::{Command, DeviceId, ScreenState};
use devrun::runtime::{DeviceDriver, DriverError, ManagedBrowser, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Command name that blocks until the driver is closed.
pub const HANG: &str = "hang";

/// Scriptable driver recording every call it receives.
#[derive(Default)]
pub struct FakeDriver {
	failing: HashSet<String>,
	fail_close: bool,
	executed: Mutex<Vec<(usize, String)>>,
	screens: AtomicUsize,
	closes: AtomicUsize,
	closed: AtomicBool,
	close_signal: Notify,
	hanging: Notify,
}

impl FakeDriver {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Driver where every command named in `names` fails.
	pub fn failing_on(names: &[&str]) -> Arc<Self> {
		Arc::new(Self {
			failing: names.iter().map(|n| n.to_string()).collect(),
			..Self::default()
		})
	}

	/// Driver whose `close` always errors.
	pub fn broken_close() -> Arc<Self> {
		Arc::new(Self {
			fail_close: true,
			..Self::default()
		})
	}

	pub fn executed(&self) -> Vec<(usize, String)> {
		self.executed.lock().clone()
	}

	pub fn screens(&self) -> usize {
		self.screens.load(Ordering::SeqCst)
	}

	pub fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}

	/// Resolves once a `hang` command has started.
	pub async fn wait_until_hanging(&self) {
		tokio::time::timeout(Duration::from_secs(5), self.hanging.notified())
			.await
			.expect("driver never started hanging");
	}
}

#[async_trait]
impl DeviceDriver for FakeDriver {
	fn name(&self) -> &str {
		"fake"
	}

	async fn execute(&self, index: usize, command: &Command) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(DriverError::Closed);
		}
		self.executed.lock().push((index, command.command.clone()));

		if command.command == HANG {
			let closed = self.close_signal.notified();
			if self.closed.load(Ordering::SeqCst) {
				return Err(DriverError::Closed);
			}
			self.hanging.notify_one();
			closed.await;
			return Err(DriverError::Closed);
		}
		if self.failing.contains(&command.command) {
			return Err(DriverError::Command(format!("{} failed", command.command)));
		}
		Ok(())
	}

	async fn screen_state(&self) -> Result<ScreenState> {
		self.screens.fetch_add(1, Ordering::SeqCst);
		Ok(ScreenState {
			screenshot: b"fake-png".to_vec(),
			width: 390,
			height: 844,
			hierarchy: serde_json::json!({ "root": [] }),
		})
	}

	async fn close(&self) -> Result<()> {
		self.closes.fetch_add(1, Ordering::SeqCst);
		self.closed.store(true, Ordering::SeqCst);
		self.close_signal.notify_waiters();
		if self.fail_close {
			return Err(DriverError::Command("bridge refused to close".to_string()));
		}
		Ok(())
	}
}

/// Shared browser bound to a single device id.
pub struct FakeBrowser {
	device: DeviceId,
	running: AtomicBool,
	resets: AtomicUsize,
}

impl FakeBrowser {
	pub fn running(device: &str) -> Arc<Self> {
		Arc::new(Self {
			device: DeviceId::from(device),
			running: AtomicBool::new(true),
			resets: AtomicUsize::new(0),
		})
	}

	pub fn resets(&self) -> usize {
		self.resets.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl ManagedBrowser for FakeBrowser {
	fn is_managed(&self, device: &DeviceId) -> bool {
		*device == self.device
	}

	fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	async fn reset_session(&self) -> Result<()> {
		self.resets.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

pub fn commands(names: &[&str]) -> Vec<Command> {
	names.iter().map(|name| Command::named(*name)).collect()
}

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}
