//! Infrastructure layer
//!
//! Concrete implementations of ambient concerns that sit outside the
//! scheduling domain proper: configuration loading, structured logging, and
//! the subagent registry's on-disk persistence.

pub mod config;
pub mod logging;
pub mod persistence;
