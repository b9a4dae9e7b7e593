//! Configuration loading infrastructure.
//!
//! Hierarchical configuration using figment: defaults, YAML file, then
//! environment variable overrides, with post-load validation.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
