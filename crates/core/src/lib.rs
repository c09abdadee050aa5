//! Device session control for test automation.
//!
//! Tracks which session each device is running, runs command batches with at
//! most one unit of work per device, and tears a device's resources down on
//! demand. Callers go through [`DeviceController`]; the building blocks are
//! public for embedding and testing.
//!
//! ```text
//! DeviceController
//!   ├─ SessionTracker     device → active session, external event stream
//!   ├─ ResourceRegistry   device → driver handle + task context
//!   ├─ cancel_session     driver, then context, then session teardown
//!   └─ run_commands       fail-stop batch + final screen capture
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod orchestrator;
pub mod resources;
pub mod session;

pub use config::ControllerConfig;
pub use controller::{DEFAULT_SESSION_PREFIX, DeviceController, DeviceRun, SessionOptions};
pub use error::{ControllerError, Result};
pub use orchestrator::run_commands;
pub use resources::{CancelReport, ContextTeardown, DriverTeardown, ResourceRegistry, RetirePolicy, TaskContext, cancel_session};
pub use session::{JsonlSessionLog, MemorySessionLog, NullSessionLog, ResolvedSession, SessionLog, SessionTracker};

pub use devrun_protocol as protocol;
pub use devrun_runtime as runtime;
