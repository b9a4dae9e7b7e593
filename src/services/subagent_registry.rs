//! Subagent registry (§4.F): parent-tracked child runs, event-driven
//! completion, disk persistence, deadline-scheduled archival sweep.
//!
//! The registry never calls the event bus's `emit`; it only `subscribe`s,
//! per §9 "Cyclic references" (the bus stays a leaf component).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::domain::models::{
    AgentEvent, CleanupPolicy, EventStream, LifecyclePayload, LifecyclePhase, RegisterRunParams,
    RunOutcome, SubagentRun,
};
use crate::domain::ports::{AnnounceFlow, SessionStore};
use crate::infrastructure::persistence::subagent_store::SubagentStore;
use crate::services::event_bus::{EventBus, SubscriptionId};
use crate::services::timer_registry::TimerRegistry;

/// The announce flow's own deadline (§4.F, §5 "Cancellation and timeouts").
pub const ANNOUNCE_TIMEOUT_MS: u64 = 120_000;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Option<SubagentRun>>,
}

/// Parent-tracked child run registry. Constructed behind an `Arc` because
/// its event-bus subscription closure and sweep timer callback both need
/// to re-enter `self` from spawned tasks (§9 "Global mutable state").
pub struct SubagentRegistry<A, S> {
    runs: Mutex<HashMap<Uuid, SubagentRun>>,
    waiters: Mutex<HashMap<Uuid, Vec<Waiter>>>,
    waiter_counter: AtomicU64,

    store: SubagentStore,
    events: Arc<EventBus>,
    timers: Arc<TimerRegistry>,
    announce: A,
    sessions: S,

    subscription: Mutex<Option<SubscriptionId>>,
    sweep_timer_id: Mutex<Option<String>>,
    initialized: AtomicBool,
}

impl<A, S> SubagentRegistry<A, S>
where
    A: AnnounceFlow + 'static,
    S: SessionStore + 'static,
{
    #[must_use]
    pub fn new(store: SubagentStore, events: Arc<EventBus>, timers: Arc<TimerRegistry>, announce: A, sessions: S) -> Arc<Self> {
        Arc::new(Self {
            runs: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            waiter_counter: AtomicU64::new(0),
            store,
            events,
            timers,
            announce,
            sessions,
            subscription: Mutex::new(None),
            sweep_timer_id: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    /// Load persisted state, ensure the event subscription is active,
    /// schedule the archival sweep, and attempt to resume any run that
    /// ended before the process restarted. Idempotent: a second call is a
    /// no-op (§4.F "Persistence").
    pub async fn init(self: &Arc<Self>) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.store.load().await {
            Ok(restored) => {
                let mut runs = self.runs.lock().await;
                for (run_id, run) in restored {
                    match runs.get(&run_id) {
                        Some(existing) if existing.created_at >= run.created_at => {}
                        _ => {
                            runs.insert(run_id, run);
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to restore subagent registry from disk, starting empty");
            }
        }

        self.ensure_subscribed().await;
        self.reschedule_sweep().await;

        let to_resume: Vec<Uuid> = {
            let runs = self.runs.lock().await;
            runs.values()
                .filter(|r| r.is_ended() && !r.cleanup_handled && !r.is_archived())
                .map(|r| r.run_id)
                .collect()
        };
        for run_id in to_resume {
            let this = self.clone();
            // waitForCompletion=false: don't block init on the announce flow.
            tokio::spawn(async move { this.attempt_cleanup(run_id).await });
        }
    }

    /// Register a new run and persist it. Ensures the event subscription
    /// is active and reschedules the archival sweep in case this run's
    /// deadline is now the earliest outstanding one.
    pub async fn register(self: &Arc<Self>, params: RegisterRunParams) -> Uuid {
        self.ensure_subscribed().await;

        let now = Utc::now();
        let run_id = params.run_id;
        let run = SubagentRun::register(params, now);
        self.runs.lock().await.insert(run_id, run);

        self.persist().await;
        self.reschedule_sweep().await;
        run_id
    }

    /// Resolve immediately if the run has already ended or is unknown;
    /// otherwise register a waiter and a deadline. Multiple concurrent
    /// waiters on the same run all receive the same record (§4.F "Waiters").
    pub async fn wait_for_run(self: &Arc<Self>, run_id: Uuid, timeout_ms: u64) -> Option<SubagentRun> {
        {
            let runs = self.runs.lock().await;
            match runs.get(&run_id) {
                Some(run) if run.is_ended() => return Some(run.clone()),
                None => return None,
                Some(_) => {}
            }
        }

        let (tx, rx) = oneshot::channel();
        let waiter_id = self.waiter_counter.fetch_add(1, Ordering::Relaxed);
        {
            let mut waiters = self.waiters.lock().await;
            waiters.entry(run_id).or_default().push(Waiter { id: waiter_id, tx });
        }

        let this = self.clone();
        self.timers
            .create_timeout(
                Box::new(move || {
                    let this = this.clone();
                    tokio::spawn(async move { this.resolve_waiter_timeout(run_id, waiter_id).await });
                }),
                timeout_ms,
                format!("subagent-wait:{run_id}"),
            )
            .await;

        rx.await.ok().flatten()
    }

    pub async fn get_run(&self, run_id: Uuid) -> Option<SubagentRun> {
        self.runs.lock().await.get(&run_id).cloned()
    }

    /// Runs for `parent_key` that have not yet ended.
    pub async fn get_active_for_requester(&self, parent_key: &str) -> Vec<SubagentRun> {
        self.runs
            .lock()
            .await
            .values()
            .filter(|r| r.parent_session_key == parent_key && !r.is_ended())
            .cloned()
            .collect()
    }

    /// All runs (ended or not) for `parent_key`.
    pub async fn list_for_requester(&self, parent_key: &str) -> Vec<SubagentRun> {
        self.runs
            .lock()
            .await
            .values()
            .filter(|r| r.parent_session_key == parent_key)
            .cloned()
            .collect()
    }

    /// Drop a run's record and any outstanding waiters without going
    /// through the announce/cleanup flow. For callers that manage their
    /// own lifecycle and just need the bookkeeping entry gone.
    pub async fn release(&self, run_id: Uuid) {
        self.runs.lock().await.remove(&run_id);
        self.waiters.lock().await.remove(&run_id);
        self.persist().await;
    }

    async fn resolve_waiter_timeout(&self, run_id: Uuid, waiter_id: u64) {
        let mut waiters = self.waiters.lock().await;
        if let Some(list) = waiters.get_mut(&run_id) {
            if let Some(pos) = list.iter().position(|w| w.id == waiter_id) {
                let waiter = list.remove(pos);
                let _ = waiter.tx.send(None);
            }
            if list.is_empty() {
                waiters.remove(&run_id);
            }
        }
    }

    /// Send the ended record to every waiter on `run_id`, in registration
    /// order, then drop the waiter list (§4.F "notify all waiters
    /// synchronously").
    async fn notify_waiters(&self, run_id: Uuid, record: &SubagentRun) {
        let waiters = self.waiters.lock().await.remove(&run_id);
        let Some(waiters) = waiters else { return };
        for waiter in waiters {
            let _ = waiter.tx.send(Some(record.clone()));
        }
    }

    async fn ensure_subscribed(self: &Arc<Self>) {
        let mut subscription = self.subscription.lock().await;
        if subscription.is_some() {
            return;
        }

        let this = self.clone();
        let id = self
            .events
            .subscribe(move |event| {
                if event.stream != EventStream::Lifecycle {
                    return;
                }
                let Some(payload) = event.as_lifecycle() else { return };
                if matches!(payload.phase, LifecyclePhase::SubagentComplete) {
                    // Our own synthetic fan-out event; not a worker lifecycle signal.
                    return;
                }
                let this = this.clone();
                let run_id = event.run_id;
                tokio::spawn(async move { this.handle_lifecycle(run_id, payload).await });
            })
            .await;
        *subscription = Some(id);
    }

    async fn handle_lifecycle(self: Arc<Self>, run_id: Uuid, payload: LifecyclePayload) {
        match payload.phase {
            LifecyclePhase::Start => {
                let now = Utc::now();
                let found = {
                    let mut runs = self.runs.lock().await;
                    if let Some(run) = runs.get_mut(&run_id) {
                        run.mark_started(now);
                        true
                    } else {
                        false
                    }
                };
                if found {
                    self.persist().await;
                }
            }
            LifecyclePhase::End | LifecyclePhase::Error => {
                let now = Utc::now();
                let outcome = if matches!(payload.phase, LifecyclePhase::Error) {
                    RunOutcome::Error(payload.error_message.unwrap_or_else(|| "unknown error".to_string()))
                } else if payload.aborted {
                    RunOutcome::Timeout
                } else {
                    RunOutcome::Ok
                };

                let record = {
                    let mut runs = self.runs.lock().await;
                    let Some(run) = runs.get_mut(&run_id) else { return };
                    run.mark_ended(outcome, now);
                    run.clone()
                };

                self.persist().await;
                self.notify_waiters(run_id, &record).await;
                self.events
                    .emit(AgentEvent::lifecycle(
                        run_id,
                        Some(record.parent_session_key.clone()),
                        LifecyclePayload {
                            phase: LifecyclePhase::SubagentComplete,
                            error_message: None,
                            aborted: false,
                        },
                    ))
                    .await;
                self.reschedule_sweep().await;
                self.attempt_cleanup(run_id).await;
            }
            LifecyclePhase::SubagentComplete => {}
        }
    }

    /// Attempt the announce-then-cleanup flow for an ended run. Skips if
    /// already handled or archived (exactly-once announce under
    /// concurrent restart+event, §4.F "Invariants").
    async fn attempt_cleanup(&self, run_id: Uuid) {
        let record = {
            let mut runs = self.runs.lock().await;
            let Some(run) = runs.get_mut(&run_id) else { return };
            if run.cleanup_handled || run.is_archived() {
                return;
            }
            run.cleanup_handled = true;
            run.clone()
        };
        self.persist().await;

        let announce_result = tokio::time::timeout(
            std::time::Duration::from_millis(ANNOUNCE_TIMEOUT_MS),
            self.announce.announce(&record),
        )
        .await;

        let did_announce = matches!(announce_result, Ok(Ok(true)));

        if did_announce {
            match record.cleanup {
                CleanupPolicy::Delete => {
                    self.runs.lock().await.remove(&run_id);
                    self.waiters.lock().await.remove(&run_id);
                }
                CleanupPolicy::Keep => {
                    let mut runs = self.runs.lock().await;
                    if let Some(run) = runs.get_mut(&run_id) {
                        run.cleanup_completed_at = Some(Utc::now());
                    }
                }
            }
            self.persist().await;
        } else {
            tracing::warn!(%run_id, "announce failed or timed out, will retry on next wake");
            let mut runs = self.runs.lock().await;
            if let Some(run) = runs.get_mut(&run_id) {
                run.cleanup_handled = false;
            }
            drop(runs);
            self.persist().await;
        }

        self.reschedule_sweep().await;
    }

    /// Cancel the pending sweep timer and schedule a new one at
    /// `max(1s, earliestArchiveAtMs - now)`, or leave it unscheduled if no
    /// run currently has an archive deadline (§4.F "Archival sweep").
    async fn reschedule_sweep(self: &Arc<Self>) {
        let earliest = {
            let runs = self.runs.lock().await;
            runs.values().filter_map(|r| r.archive_at_ms).min()
        };

        let mut sweep_timer = self.sweep_timer_id.lock().await;
        if let Some(id) = sweep_timer.take() {
            self.timers.clear(&id).await;
        }

        let Some(earliest) = earliest else { return };
        let now = Utc::now();
        let delay_ms = (earliest - now).num_milliseconds().max(1_000) as u64;

        let this = self.clone();
        let id = self
            .timers
            .create_timeout(
                Box::new(move || {
                    let this = this.clone();
                    tokio::spawn(async move { this.run_sweep().await });
                }),
                delay_ms,
                "subagent-sweep",
            )
            .await;
        *sweep_timer = Some(id);
    }

    async fn run_sweep(self: Arc<Self>) {
        let now = Utc::now();
        let due: Vec<SubagentRun> = {
            let runs = self.runs.lock().await;
            runs.values()
                .filter(|r| r.archive_at_ms.is_some_and(|at| at <= now))
                .cloned()
                .collect()
        };

        for run in &due {
            if let Err(err) = self.sessions.delete(&run.child_session_key, true).await {
                tracing::warn!(run_id = %run.run_id, error = %err, "best-effort child session delete failed during archive sweep");
            }
        }

        if !due.is_empty() {
            let mut runs = self.runs.lock().await;
            for run in &due {
                runs.remove(&run.run_id);
            }
            drop(runs);
            self.persist().await;
        }

        self.reschedule_sweep().await;
    }

    async fn persist(&self) {
        let snapshot = self.runs.lock().await.clone();
        if let Err(err) = self.store.save(&snapshot).await {
            tracing::error!(error = %err, "failed to persist subagent registry snapshot");
        }
    }
}
