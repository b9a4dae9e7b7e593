//! Orchestrator (§4.G): the wiring layer that ties the coalescer, auth
//! cache, priority queue, subagent registry, and event bus into the single
//! surface a host application drives a session through.
//!
//! Grounded on the teacher's `swarm_orchestrator.rs`: a single struct owning
//! `Arc` handles to every collaborator service, with no business logic of
//! its own beyond sequencing calls between them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use futures::future::BoxFuture;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::domain::error::AuthCacheError;
use crate::domain::models::{
    combine, AgentEvent, CoalesceMessage, Credential, LifecyclePayload, LifecyclePhase, Priority,
    RegisterRunParams,
};
use crate::domain::ports::{AnnounceFlow, AuthResolver, ProfileStore, SessionStore};
use crate::services::auth_cache::AuthCache;
use crate::services::coalescer::Coalescer;
use crate::services::event_bus::EventBus;
use crate::services::priority_queue::{EnqueueOptions, PriorityQueue, TaskFn};
use crate::services::subagent_registry::SubagentRegistry;

/// A unit of work dispatched through a session lane once its coalesce
/// window closes and its auth has resolved. Invoked exactly once, on the
/// batch's combined message and the credential selected for it.
pub type MessageWorkerFn<T, E> = Box<
    dyn FnOnce(crate::domain::models::CombinedMessage, Credential) -> BoxFuture<'static, Result<T, E>> + Send,
>;

/// A subagent's body. Its `Ok`/`Err` maps directly to the `end`/`error`
/// lifecycle events the registry listens for (§4.F, §4.G).
pub type SubagentWorkerFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

/// Priority-resolution hints for an incoming message (§4.G "Priority
/// resolution"). Precedence: explicit override, then the urgent trio, then
/// the background pair, else `Normal`. `is_subagent` carries no special
/// case beyond that default (§11 decision).
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageHints {
    pub explicit_priority: Option<Priority>,
    pub is_mention: bool,
    pub is_reply: bool,
    pub is_urgent: bool,
    pub is_heartbeat: bool,
    pub is_cron: bool,
    pub is_subagent: bool,
}

impl MessageHints {
    #[must_use]
    pub fn resolve(&self) -> Priority {
        if let Some(priority) = self.explicit_priority {
            return priority;
        }
        if self.is_mention || self.is_reply || self.is_urgent {
            return Priority::Urgent;
        }
        if self.is_heartbeat || self.is_cron {
            return Priority::Background;
        }
        Priority::Normal
    }
}

/// Error wrapper bridging the auth cache's own error type with a caller's
/// opaque task error type `E`, so a single `PriorityQueue<T, DispatchError<E>>`
/// can carry both kinds of failure.
#[derive(Debug)]
pub enum DispatchError<E> {
    Auth(AuthCacheError),
    Task(E),
}

impl<E: fmt::Display> fmt::Display for DispatchError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Auth(err) => write!(f, "auth resolution failed: {err}"),
            DispatchError::Task(err) => write!(f, "{err}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for DispatchError<E> {}

impl<E> From<AuthCacheError> for DispatchError<E> {
    fn from(err: AuthCacheError) -> Self {
        DispatchError::Auth(err)
    }
}

/// Required so a dropped/cancelled task in [`PriorityQueue`] can still
/// settle the caller's future (§4.C "oneshot responder").
impl<E: From<&'static str>> From<&'static str> for DispatchError<E> {
    fn from(s: &'static str) -> Self {
        DispatchError::Task(E::from(s))
    }
}

/// Wires the coalescer, auth cache, priority queue, subagent registry, and
/// event bus together. Constructed behind an `Arc` because `handle_message`
/// spawns a dispatch task that re-enters `self` once a coalesce window
/// closes.
pub struct Orchestrator<R, P, A, S, T, E> {
    coalescer: Arc<Coalescer>,
    auth_cache: Arc<AuthCache<R, P>>,
    queue: Arc<PriorityQueue<T, DispatchError<E>>>,
    registry: Arc<SubagentRegistry<A, S>>,
    events: Arc<EventBus>,
    // Keyed by (session_key, coalesce window id) rather than bare session
    // key: a second window for the same session can open and close while
    // the first window's dispatch is still in flight, and without the
    // window id a caller from the second window would be misrouted onto
    // the first window's still-pending waiter list.
    dispatch_waiters: Mutex<HashMap<(String, u64), Vec<oneshot::Sender<Arc<Result<T, DispatchError<E>>>>>>>,
}

impl<R, P, A, S, T, E> Orchestrator<R, P, A, S, T, E>
where
    R: AuthResolver + 'static,
    P: ProfileStore + 'static,
    A: AnnounceFlow + 'static,
    S: SessionStore + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    #[must_use]
    pub fn new(
        coalescer: Arc<Coalescer>,
        auth_cache: Arc<AuthCache<R, P>>,
        queue: Arc<PriorityQueue<T, DispatchError<E>>>,
        registry: Arc<SubagentRegistry<A, S>>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            coalescer,
            auth_cache,
            queue,
            registry,
            events,
            dispatch_waiters: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn coalescer(&self) -> Arc<Coalescer> {
        self.coalescer.clone()
    }

    #[must_use]
    pub fn auth_cache(&self) -> Arc<AuthCache<R, P>> {
        self.auth_cache.clone()
    }

    #[must_use]
    pub fn queue(&self) -> Arc<PriorityQueue<T, DispatchError<E>>> {
        self.queue.clone()
    }

    #[must_use]
    pub fn registry(&self) -> Arc<SubagentRegistry<A, S>> {
        self.registry.clone()
    }

    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Accept one incoming message for `session_key`. Coalesces it with any
    /// other messages arriving in the same window, resolves the auth
    /// credential for `provider`/`preferred_profile` (§4.D, via the
    /// bounded-retry [`Self::resolve_auth`]), then dispatches the combined
    /// batch and its credential through the session lane exactly once —
    /// every caller whose message landed in the same window shares the
    /// dispatch's outcome via the returned `Arc` rather than each re-running
    /// `worker` or re-resolving auth (§4.E, §4.G: "combine the batch, select
    /// the target provider/profile … `findAvailable` an auth, and enqueue a
    /// session task").
    #[tracing::instrument(skip(self, message, worker), fields(session = %session_key))]
    pub async fn handle_message(
        self: &Arc<Self>,
        session_key: &str,
        message: CoalesceMessage,
        hints: MessageHints,
        provider: &str,
        preferred_profile: Option<&str>,
        max_auth_retries: usize,
        worker: MessageWorkerFn<T, E>,
    ) -> Arc<Result<T, DispatchError<E>>>
    where
        E: From<&'static str>,
    {
        let (window_id, messages) = self.coalescer.coalesce(session_key, message).await;
        let dispatch_key = (session_key.to_string(), window_id);

        let (tx, rx) = oneshot::channel();
        let should_dispatch = {
            let mut waiters = self.dispatch_waiters.lock().await;
            let list = waiters.entry(dispatch_key.clone()).or_default();
            let first = list.is_empty();
            list.push(tx);
            first
        };

        if should_dispatch {
            let this = self.clone();
            let session_key_owned = session_key.to_string();
            let provider = provider.to_string();
            let preferred_profile = preferred_profile.map(str::to_string);
            let priority = hints.resolve();
            tokio::spawn(async move {
                let combined = combine(&messages);
                let result = match this.resolve_auth(&provider, preferred_profile.as_deref(), max_auth_retries).await {
                    Ok(credential) => {
                        let task: TaskFn<T, DispatchError<E>> = Box::new(move || {
                            Box::pin(async move { worker(combined, credential).await.map_err(DispatchError::Task) })
                        });
                        let opts = EnqueueOptions { priority, ..EnqueueOptions::default() };
                        this.queue.enqueue_session(&session_key_owned, task, opts).await
                    }
                    Err(err) => Err(DispatchError::Auth(err)),
                };
                this.resolve_dispatch_waiters(&dispatch_key, Arc::new(result)).await;
            });
        }

        rx.await
            .unwrap_or_else(|_| Arc::new(Err(DispatchError::Task(E::from("dispatch dropped before settling")))))
    }

    async fn resolve_dispatch_waiters(&self, dispatch_key: &(String, u64), result: Arc<Result<T, DispatchError<E>>>) {
        let waiters = self.dispatch_waiters.lock().await.remove(dispatch_key);
        let Some(waiters) = waiters else { return };
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
    }

    /// Register and run a subagent, emitting the `start`/`end`/`error`
    /// lifecycle events the registry listens for around `worker`'s
    /// execution (§4.G "the orchestrator ensures the worker emits the
    /// lifecycle events").
    pub async fn spawn_subagent(&self, params: RegisterRunParams, worker: SubagentWorkerFn) -> Uuid {
        let run_id = self.registry.register(params).await;
        let events = self.events.clone();

        tokio::spawn(async move {
            events
                .emit(AgentEvent::lifecycle(
                    run_id,
                    None,
                    LifecyclePayload { phase: LifecyclePhase::Start, error_message: None, aborted: false },
                ))
                .await;

            match worker().await {
                Ok(()) => {
                    events
                        .emit(AgentEvent::lifecycle(
                            run_id,
                            None,
                            LifecyclePayload { phase: LifecyclePhase::End, error_message: None, aborted: false },
                        ))
                        .await;
                }
                Err(message) => {
                    events
                        .emit(AgentEvent::lifecycle(
                            run_id,
                            None,
                            LifecyclePayload { phase: LifecyclePhase::Error, error_message: Some(message), aborted: false },
                        ))
                        .await;
                }
            }
        });

        run_id
    }

    /// Resolve a credential with bounded exponential-backoff retry,
    /// retrying only while the failure is transient (§4.D, §7
    /// `AuthResolution`). Returns the last error once `max_retries` or the
    /// backoff policy's own elapsed-time budget is exhausted.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_auth(
        self: &Arc<Self>,
        provider: &str,
        preferred_profile: Option<&str>,
        max_retries: usize,
    ) -> Result<Credential, AuthCacheError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0usize;
        loop {
            match self.auth_cache.find_available(provider, preferred_profile).await {
                Ok(credential) => return Ok(credential),
                Err(err) if err.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    let Some(delay) = backoff.next_backoff() else { return Err(err) };
                    tracing::warn!(provider, attempt, "transient auth failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn invalidate_auth(&self, provider: &str, profile_id: Option<&str>) {
        self.auth_cache.invalidate(provider, profile_id).await;
    }
}
