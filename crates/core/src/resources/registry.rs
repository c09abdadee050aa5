//! Exclusive per-device ownership of driver handles and task contexts.

use std::collections::HashMap;
use std::sync::Arc;

use devrun_protocol::DeviceId;
use devrun_runtime::DriverHandle;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use super::cancel::{RetirePolicy, retire_context};
use super::task::TaskContext;

/// Single writer of driver-handle and task-context state.
///
/// Each device has at most one driver handle and at most one task context in
/// the registry at any instant. Creating a context and cancelling a device are
/// serialized per device through a device slot, so a new context is only
/// stored once the previous one has been retired.
pub struct ResourceRegistry {
	drivers: Mutex<HashMap<DeviceId, DriverHandle>>,
	contexts: Mutex<HashMap<DeviceId, Arc<TaskContext>>>,
	slots: Mutex<HashMap<DeviceId, Arc<tokio::sync::Mutex<()>>>>,
	policy: RetirePolicy,
}

impl Default for ResourceRegistry {
	fn default() -> Self {
		Self::new(RetirePolicy::default())
	}
}

impl ResourceRegistry {
	pub fn new(policy: RetirePolicy) -> Self {
		Self {
			drivers: Mutex::new(HashMap::new()),
			contexts: Mutex::new(HashMap::new()),
			slots: Mutex::new(HashMap::new()),
			policy,
		}
	}

	pub fn policy(&self) -> &RetirePolicy {
		&self.policy
	}

	/// Retires the device's current context, then stores and returns a fresh one.
	pub async fn create_task_context(&self, device: &DeviceId) -> Arc<TaskContext> {
		let slot = self.lock_device(device).await;
		self.replace_task_context(device, &slot).await
	}

	/// [`Self::create_task_context`] for a caller already holding the device slot.
	pub(crate) async fn replace_task_context(&self, device: &DeviceId, _slot: &OwnedMutexGuard<()>) -> Arc<TaskContext> {
		if let Some(previous) = self.take_task_context(device) {
			debug!(target = "devrun.registry", device = %device, context = previous.id(), "retiring previous task context");
			retire_context(&previous, "superseded by new work on the device", &self.policy).await;
		}

		let context = Arc::new(TaskContext::new(device.clone()));
		self.contexts.lock().insert(device.clone(), context.clone());
		debug!(target = "devrun.registry", device = %device, context = context.id(), "task context created");
		context
	}

	/// Stores `driver` for the device and returns the handle it replaced.
	///
	/// The replaced handle is not closed here.
	pub fn set_active_driver(&self, device: &DeviceId, driver: DriverHandle) -> Option<DriverHandle> {
		info!(target = "devrun.registry", device = %device, driver = driver.name(), "driver registered");
		self.drivers.lock().insert(device.clone(), driver)
	}

	pub fn driver(&self, device: &DeviceId) -> Option<DriverHandle> {
		self.drivers.lock().get(device).cloned()
	}

	pub fn task_context(&self, device: &DeviceId) -> Option<Arc<TaskContext>> {
		self.contexts.lock().get(device).cloned()
	}

	/// `true` when the device has neither a driver nor a task context.
	pub fn is_idle(&self, device: &DeviceId) -> bool {
		self.driver(device).is_none() && self.task_context(device).is_none()
	}

	pub(crate) fn take_driver(&self, device: &DeviceId) -> Option<DriverHandle> {
		self.drivers.lock().remove(device)
	}

	pub(crate) fn take_task_context(&self, device: &DeviceId) -> Option<Arc<TaskContext>> {
		self.contexts.lock().remove(device)
	}

	/// Serializes context creation and cancellation for one device.
	pub(crate) async fn lock_device(&self, device: &DeviceId) -> OwnedMutexGuard<()> {
		let slot = self.slots.lock().entry(device.clone()).or_default().clone();
		slot.lock_owned().await
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	fn quick_registry() -> ResourceRegistry {
		ResourceRegistry::new(RetirePolicy {
			attempts: 3,
			interval: Duration::from_millis(10),
		})
	}

	#[tokio::test]
	async fn new_context_retires_previous() {
		let registry = quick_registry();
		let device = DeviceId::from("dev-1");

		let first = registry.create_task_context(&device).await;
		let second = registry.create_task_context(&device).await;

		assert!(first.is_cancelled());
		assert!(!first.is_active());
		assert!(second.is_active());
		assert_eq!(registry.task_context(&device).map(|c| c.id()), Some(second.id()));
	}

	#[tokio::test]
	async fn contexts_are_per_device() {
		let registry = quick_registry();
		let a = registry.create_task_context(&DeviceId::from("a")).await;
		let b = registry.create_task_context(&DeviceId::from("b")).await;
		assert!(a.is_active());
		assert!(b.is_active());
	}

	#[tokio::test]
	async fn lookups_miss_without_error() {
		let registry = quick_registry();
		let device = DeviceId::from("unknown");
		assert!(registry.driver(&device).is_none());
		assert!(registry.task_context(&device).is_none());
		assert!(registry.is_idle(&device));
	}
}
