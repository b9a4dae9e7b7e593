//! Timer registry (§4.A): tracked timeouts/intervals with label-based clear.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::domain::models::{TimerEntry, TimerKind, TimerStats};

/// A boxed synchronous callback. User callbacks never see `&mut` state
/// outside their own closure; exceptions (panics) are caught per §4.A(b).
pub type TimerCallback = Box<dyn FnMut() + Send + 'static>;

struct RegisteredTimer {
    entry: TimerEntry,
    handle: JoinHandle<()>,
}

/// Process-wide singleton tracking every outstanding timeout/interval.
///
/// Single mutex per §5 guards the whole entry map; the actual `tokio`
/// sleep/interval tasks run independently and remove themselves from the
/// map on timeout firing (interval entries stay registered until cleared).
pub struct TimerRegistry {
    timers: Arc<Mutex<HashMap<String, RegisteredTimer>>>,
    counter: AtomicU64,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            counter: AtomicU64::new(0),
        }
    }

    fn next_id(&self, label: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{label}#{n}")
    }

    /// Schedule a one-shot callback. The entry is removed from the registry
    /// *before* the user callback runs (§4.A(a)); a panicking callback is
    /// caught and logged, never propagated to the scheduler (§4.A(b)).
    #[tracing::instrument(skip(self, callback))]
    pub async fn create_timeout(
        &self,
        mut callback: TimerCallback,
        delay_ms: u64,
        label: impl Into<String>,
    ) -> String {
        let label = label.into();
        let id = self.next_id(&label);
        let entry = TimerEntry::new(id.clone(), TimerKind::Timeout, label.clone(), delay_ms);

        let timers = self.timers.clone();
        let fire_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            timers.lock().await.remove(&fire_id);
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback())) {
                tracing::error!(timer_id = %fire_id, ?panic, "timer callback panicked");
            }
        });

        self.timers.lock().await.insert(id.clone(), RegisteredTimer { entry, handle });
        id
    }

    /// Schedule a repeating callback. The entry remains registered until
    /// explicitly cleared.
    #[tracing::instrument(skip(self, callback))]
    pub async fn create_interval(
        &self,
        mut callback: TimerCallback,
        period_ms: u64,
        label: impl Into<String>,
    ) -> String {
        let label = label.into();
        let id = self.next_id(&label);
        let entry = TimerEntry::new(id.clone(), TimerKind::Interval, label.clone(), period_ms);

        let tick_id = id.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(period_ms));
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback())) {
                    tracing::error!(timer_id = %tick_id, ?panic, "interval callback panicked");
                }
            }
        });

        self.timers.lock().await.insert(id.clone(), RegisteredTimer { entry, handle });
        id
    }

    /// Cancel a timer by id. Returns `false` (recoverable `UnknownTimer`,
    /// per §4.A) rather than an error if the id is unregistered.
    pub async fn clear(&self, id: &str) -> bool {
        let mut timers = self.timers.lock().await;
        match timers.remove(id) {
            Some(registered) => {
                registered.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding timer. Idempotent: a second call returns 0.
    pub async fn clear_all(&self) -> usize {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, registered) in timers.drain() {
            registered.handle.abort();
        }
        count
    }

    /// Cancel every timer whose label matches `pattern` as a prefix.
    pub async fn clear_by_label(&self, pattern: &str) -> usize {
        let mut timers = self.timers.lock().await;
        let matching: Vec<String> = timers
            .iter()
            .filter(|(_, registered)| registered.entry.label.starts_with(pattern))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &matching {
            if let Some(registered) = timers.remove(id) {
                registered.handle.abort();
            }
        }
        matching.len()
    }

    pub async fn list(&self) -> Vec<TimerEntry> {
        self.timers.lock().await.values().map(|r| r.entry.clone()).collect()
    }

    pub async fn stats(&self) -> TimerStats {
        let timers = self.timers.lock().await;
        let mut stats = TimerStats::default();
        for registered in timers.values() {
            match registered.entry.kind {
                TimerKind::Timeout => stats.timeouts += 1,
                TimerKind::Interval => stats.intervals += 1,
            }
        }
        stats.total = stats.timeouts + stats.intervals;
        stats
    }
}
