//! Runtime scheduling and coordination core for a long-running agent gateway.
//!
//! Five coupled subsystems, wired by an orchestrator:
//! - [`services::priority_queue`]: named lanes + per-session lanes with
//!   priority buckets and a global concurrent-session cap.
//! - [`services::auth_cache`]: TTL+LRU credential cache with background
//!   refresh and cooldown-aware failover.
//! - [`services::coalescer`]: per-session sliding windows that batch
//!   messages before dispatch.
//! - [`services::subagent_registry`]: parent/child run tracking,
//!   event-driven completion, disk persistence, archival sweep.
//! - [`services::timer_registry`]: tracked timers with deterministic
//!   bulk-cancel on shutdown.
//!
//! [`services::event_bus`] is the sole channel between worker completion and
//! the subagent registry / orchestrator. [`services::orchestrator`] wires
//! everything together into the single surface a host application drives.

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use config::SchedulerConfig;
pub use domain::error::SchedulerError;
