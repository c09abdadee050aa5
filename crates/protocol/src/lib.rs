//! Wire types for device sessions and command execution.
//!
//! This crate contains the serde-serializable types shared between the
//! session controller, native drivers, and the external session-event log.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * Opaque where the controller is agnostic: commands and UI hierarchies
//!   are carried as JSON without interpretation
//! * Stable: Changes only when the event-log or driver wire format changes
//!
//! Lifecycle logic is built on top of these types in `devrun`.

pub mod command;
pub mod device;
pub mod ids;
pub mod screen;
pub mod session;

pub use command::*;
pub use device::*;
pub use ids::*;
pub use screen::*;
pub use session::*;
