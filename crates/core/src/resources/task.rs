//! Cancellable unit of work executing one command batch on a device.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use devrun_protocol::DeviceId;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{ControllerError, Result};

static CONTEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Task context for a device.
///
/// A context is active from creation until its single run finishes, or until
/// it is cancelled while idle. Cancellation is cooperative: a running future
/// stops at its next await point, which is why the cancellation protocol
/// polls [`is_active`](TaskContext::is_active) afterwards.
#[derive(Debug)]
pub struct TaskContext {
	id: u64,
	device: DeviceId,
	token: CancellationToken,
	running: AtomicBool,
	finished: AtomicBool,
	reason: Mutex<Option<String>>,
}

impl TaskContext {
	pub fn new(device: DeviceId) -> Self {
		Self {
			id: CONTEXT_SEQ.fetch_add(1, Ordering::Relaxed),
			device,
			token: CancellationToken::new(),
			running: AtomicBool::new(false),
			finished: AtomicBool::new(false),
			reason: Mutex::new(None),
		}
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn device(&self) -> &DeviceId {
		&self.device
	}

	pub fn is_active(&self) -> bool {
		!self.finished.load(Ordering::Acquire)
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Token that fires when this context is cancelled.
	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	/// Requests cancellation. An idle context becomes inactive immediately.
	pub fn cancel(&self, reason: &str) {
		self.reason.lock().get_or_insert_with(|| reason.to_string());
		self.token.cancel();
		if !self.running.load(Ordering::Acquire) {
			self.finished.store(true, Ordering::Release);
		}
	}

	/// Runs `work` unless the context is cancelled first.
	///
	/// The context becomes inactive when this returns, whichever way it ends.
	pub async fn run<F, T>(&self, work: F) -> Result<T>
	where
		F: Future<Output = T>,
	{
		self.running.store(true, Ordering::Release);
		let _finish = FinishGuard(self);

		tokio::select! {
			biased;
			_ = self.token.cancelled() => Err(self.cancelled_error()),
			out = work => Ok(out),
		}
	}

	fn cancelled_error(&self) -> ControllerError {
		ControllerError::Cancelled {
			device: self.device.clone(),
			reason: self.reason.lock().clone().unwrap_or_else(|| "cancelled".to_string()),
		}
	}
}

struct FinishGuard<'a>(&'a TaskContext);

impl Drop for FinishGuard<'_> {
	fn drop(&mut self) {
		self.0.running.store(false, Ordering::Release);
		self.0.finished.store(true, Ordering::Release);
	}
}
