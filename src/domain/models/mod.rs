//! Domain models (§3).
//!
//! Pure data types for the scheduling core. No service carries its own
//! copy of these structs; each owns a collection of them behind a mutex.

pub mod auth;
pub mod coalesce;
pub mod event;
pub mod lane;
pub mod subagent;
pub mod task;
pub mod timer;

pub use auth::{normalize, AuthCacheEntry, AuthCacheKey, AuthProfileState, Credential};
pub use coalesce::{combine, CoalesceMessage, CoalesceWindow, CombinedMessage};
pub use event::{AgentEvent, EventStream, LifecyclePayload, LifecyclePhase};
pub use lane::{NamedLane, SessionLane};
pub use subagent::{CleanupPolicy, RegisterRunParams, RunOutcome, SubagentRun};
pub use task::{Priority, TaskMeta};
pub use timer::{is_probe_lane, TimerEntry, TimerKind, TimerStats};
