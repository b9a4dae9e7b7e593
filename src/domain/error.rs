//! Domain error types for the scheduling core.
//!
//! Each enum maps directly onto a row of the error-handling table: the
//! kind of failure, where it originates, and whether it is recoverable.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the named-lane and session-lane priority queue.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// The user callable rejected; surfaced to the caller's future, the
    /// pump continues regardless.
    #[error("task failed in lane {lane}: {message}")]
    TaskFailure { lane: String, message: String },

    /// `waitForActiveTasks` deadline elapsed before the snapshotted set drained.
    #[error("drain timed out waiting for {remaining} active task(s)")]
    DrainTimeout { remaining: usize },
}

/// Errors surfaced by the auth preload cache.
#[derive(Error, Debug, Clone)]
pub enum AuthCacheError {
    /// Resolver or network failure while resolving a credential.
    #[error("auth resolution failed for {provider} (profile {profile_id:?}): {message}")]
    Resolution {
        provider: String,
        profile_id: Option<String>,
        message: String,
    },

    /// All candidate profiles were exhausted during `findAvailable`.
    #[error("no available profile for provider {provider}: {last_error}")]
    ProfilesExhausted { provider: String, last_error: String },
}

impl AuthCacheError {
    /// Resolution failures are transient until the profile list is exhausted.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Resolution { .. })
    }
}

/// Errors surfaced by the subagent registry.
#[derive(Error, Debug, Clone)]
pub enum SubagentError {
    /// `waitForRun` deadline elapsed before the run ended.
    #[error("wait for run {0} timed out")]
    WaiterTimeout(Uuid),

    /// The worker aborted before reaching a natural end.
    #[error("run {0} timed out before completion")]
    SubagentTimeout(Uuid),

    /// The announce flow returned `didAnnounce=false`; cleanup is retried on next wake.
    #[error("announce failed for run {0}, will retry on next wake")]
    AnnounceFailed(Uuid),

    /// Writing the registry's snapshot to disk failed; in-memory state wins.
    #[error("persistence failed for run {run_id:?}: {message}")]
    PersistenceFailure {
        run_id: Option<Uuid>,
        message: String,
    },

    /// Reading the registry's snapshot from disk on init failed.
    #[error("restore from disk failed: {0}")]
    RestoreFailure(String),
}

/// Errors surfaced by the timer registry.
#[derive(Error, Debug, Clone)]
pub enum TimerError {
    /// `clear` was called with an id that is not (or no longer) registered.
    #[error("unknown timer id {0}")]
    UnknownTimer(String),
}

/// Crate-wide error type public API functions return.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    AuthCache(#[from] AuthCacheError),

    #[error(transparent)]
    Subagent(#[from] SubagentError),

    #[error(transparent)]
    Timer(#[from] TimerError),
}
