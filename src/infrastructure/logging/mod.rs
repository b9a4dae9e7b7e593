//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON or pretty log formatting
//! - Optional rolling file output

pub mod config;
pub mod logger;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
