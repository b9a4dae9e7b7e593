//! Domain layer for the scheduling core.
//!
//! Contains the data model (§3), error types (§7), and the port traits
//! describing the external collaborators the core consumes (§6).

pub mod error;
pub mod models;
pub mod ports;

pub use error::{AuthCacheError, QueueError, SchedulerError, SubagentError, TimerError};
