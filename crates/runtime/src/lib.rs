//! Native driver lifecycle for device sessions.
//!
//! A driver handle is the live connection to a device's automation backend.
//! The controller only needs three things from it: run one command, capture
//! the current screen, and close. Closing must release native resources even
//! when a command is still in flight, which is why [`ProcessDriver`] kills its
//! subprocess rather than asking it to exit.

pub mod driver;
pub mod error;
pub mod process;
pub mod process_driver;

pub use driver::{DeviceDriver, DriverHandle, ManagedBrowser};
pub use error::{DriverError, Result};
pub use process_driver::ProcessDriver;
