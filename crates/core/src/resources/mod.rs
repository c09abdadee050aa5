//! Per-device execution resources.
//!
//! The registry owns the driver handle and task context of every device.
//! Cancellation tears both down, then clears the device's session.

/// Forced teardown of a device's driver, context, and session.
pub mod cancel;
/// Driver handle and task context ownership.
pub mod registry;
/// Cancellable task contexts.
pub mod task;

pub use cancel::{CancelReport, ContextTeardown, DriverTeardown, RetirePolicy, cancel_session};
pub use registry::ResourceRegistry;
pub use task::TaskContext;
