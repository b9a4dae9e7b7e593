//! Application services implementing the five core subsystems (§4) plus
//! the orchestrator that wires them together (§4.G).

pub mod auth_cache;
pub mod coalescer;
pub mod event_bus;
pub mod orchestrator;
pub mod priority_queue;
pub mod subagent_registry;
pub mod timer_registry;

pub use auth_cache::{AuthCache, AuthCacheStats, PreloadRequest};
pub use coalescer::{Coalescer, CoalesceStats};
pub use event_bus::{EventBus, SubscriptionId};
pub use orchestrator::{
    DispatchError, MessageHints, MessageWorkerFn, Orchestrator, SubagentWorkerFn,
};
pub use priority_queue::{
    DrainOutcome, EnqueueOptions, LaneStats, PriorityCounts, PriorityQueue, QueueStats, SessionStats,
    TaskFn,
};
pub use subagent_registry::{SubagentRegistry, ANNOUNCE_TIMEOUT_MS};
pub use timer_registry::{TimerCallback, TimerRegistry};
