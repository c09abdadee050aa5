//! Device to session mapping and its persistence.

/// Session status sinks.
pub mod log;
/// Authoritative device to active-session map.
pub mod tracker;

pub use log::{JsonlSessionLog, MemorySessionLog, NullSessionLog, SessionLog};
pub use tracker::{ResolvedSession, SessionTracker};
