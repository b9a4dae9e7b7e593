//! Request coalescer (§4.E): per-session sliding windows batching messages
//! before dispatch. Built on the timer registry (§4.A) for window closure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::config::CoalesceConfig;
use crate::domain::models::{combine, CoalesceMessage, CoalesceWindow, CombinedMessage};
use crate::services::timer_registry::TimerRegistry;

struct WindowState {
    window: CoalesceWindow,
    timer_id: String,
    waiters: Vec<oneshot::Sender<Vec<CoalesceMessage>>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoalesceStats {
    pub active_windows: usize,
    pub total_pending: usize,
}

/// The request coalescer. Constructed behind an `Arc` because the timer
/// callback that closes a window re-enters `self` from a spawned task.
pub struct Coalescer {
    config: Mutex<CoalesceConfig>,
    windows: Mutex<HashMap<String, WindowState>>,
    timers: Arc<TimerRegistry>,
    window_counter: AtomicU64,
}

impl Coalescer {
    #[must_use]
    pub fn new(timers: Arc<TimerRegistry>, config: CoalesceConfig) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(config),
            windows: Mutex::new(HashMap::new()),
            timers,
            window_counter: AtomicU64::new(0),
        })
    }

    pub async fn configure(&self, config: CoalesceConfig) {
        *self.config.lock().await = config;
    }

    /// Accept `message` into `session_key`'s window. Resolves once the
    /// window closes — by message count, by its timer, or by `flush` — with
    /// every message accumulated in that window (§4.E "Window protocol").
    ///
    /// Returns the window's id alongside its messages so a caller can tell
    /// two back-to-back windows for the same session apart — every caller
    /// that lands in the same window gets back the same id.
    #[tracing::instrument(skip(self, message), fields(session = %session_key))]
    pub async fn coalesce(
        self: &Arc<Self>,
        session_key: &str,
        message: CoalesceMessage,
    ) -> (u64, Vec<CoalesceMessage>) {
        let config = self.config.lock().await.clone();
        if !config.enabled || config.exclude_patterns.iter().any(|pattern| session_key.contains(pattern.as_str())) {
            let id = self.window_counter.fetch_add(1, Ordering::Relaxed);
            return (id, vec![message]);
        }

        let (tx, rx) = oneshot::channel();
        let mut close_now = false;
        let window_id;
        {
            let mut windows = self.windows.lock().await;
            match windows.get_mut(session_key) {
                Some(state) => {
                    window_id = state.window.id;
                    state.window.push(message);
                    state.waiters.push(tx);
                    close_now = state.window.len() >= config.max_messages;
                }
                None => {
                    window_id = self.window_counter.fetch_add(1, Ordering::Relaxed);
                    let window = CoalesceWindow::new(window_id, session_key.to_string(), message);
                    let this = self.clone();
                    let key = session_key.to_string();
                    let timer_id = self
                        .timers
                        .create_timeout(
                            Box::new(move || {
                                let this = this.clone();
                                let key = key.clone();
                                tokio::spawn(async move { this.close_window(&key).await });
                            }),
                            config.clamped_window_ms(),
                            format!("coalesce:{session_key}"),
                        )
                        .await;
                    windows.insert(
                        session_key.to_string(),
                        WindowState { window, timer_id, waiters: vec![tx] },
                    );
                }
            }
        }

        if close_now {
            self.close_window(session_key).await;
        }

        (window_id, rx.await.unwrap_or_default())
    }

    /// Force-close `session_key`'s window if one is open, resolving all its
    /// waiters immediately.
    pub async fn flush(self: &Arc<Self>, session_key: &str) {
        self.close_window(session_key).await;
    }

    async fn close_window(self: &Arc<Self>, session_key: &str) {
        let state = self.windows.lock().await.remove(session_key);
        let Some(state) = state else { return };
        self.timers.clear(&state.timer_id).await;

        let messages = state.window.messages;
        for waiter in state.waiters {
            let _ = waiter.send(messages.clone());
        }
    }

    #[must_use]
    pub fn combine(&self, messages: &[CoalesceMessage]) -> CombinedMessage {
        combine(messages)
    }

    pub async fn has_active(&self, session_key: &str) -> bool {
        self.windows.lock().await.contains_key(session_key)
    }

    pub async fn pending_count(&self, session_key: &str) -> usize {
        self.windows.lock().await.get(session_key).map_or(0, CoalesceWindow::len)
    }

    pub async fn stats(&self) -> CoalesceStats {
        let windows = self.windows.lock().await;
        CoalesceStats {
            active_windows: windows.len(),
            total_pending: windows.values().map(|state| state.window.len()).sum(),
        }
    }

    /// Drop every open window without resolving its waiters (shutdown path).
    pub async fn clear_all(&self) {
        let mut windows = self.windows.lock().await;
        for (_, state) in windows.drain() {
            self.timers.clear(&state.timer_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn msg(text: &str) -> CoalesceMessage {
        CoalesceMessage { text: text.to_string(), images: Vec::new() }
    }

    fn config(window_ms: u64, max_messages: usize) -> CoalesceConfig {
        CoalesceConfig {
            enabled: true,
            window_ms,
            max_messages,
            exclude_patterns: vec!["subagent:".to_string()],
        }
    }

    #[tokio::test]
    async fn disabled_returns_singleton_immediately() {
        let timers = Arc::new(TimerRegistry::new());
        let mut cfg = config(1_000, 10);
        cfg.enabled = false;
        let coalescer = Coalescer::new(timers, cfg);

        let result = coalescer.coalesce("s1", msg("hi")).await;
        assert_eq!(result.1.len(), 1);
    }

    #[tokio::test]
    async fn excluded_session_bypasses_window() {
        let timers = Arc::new(TimerRegistry::new());
        let coalescer = Coalescer::new(timers, config(1_000, 10));

        let result = coalescer.coalesce("subagent:child-1", msg("hi")).await;
        assert_eq!(result.1.len(), 1);
        assert!(!coalescer.has_active("subagent:child-1").await);
    }

    #[tokio::test]
    async fn messages_batch_until_timer_fires() {
        let timers = Arc::new(TimerRegistry::new());
        let coalescer = Coalescer::new(timers, config(30, 10));

        let c1 = coalescer.clone();
        let h1 = tokio::spawn(async move { c1.coalesce("s1", msg("a")).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let c2 = coalescer.clone();
        let h2 = tokio::spawn(async move { c2.coalesce("s1", msg("b")).await });

        let (r1, r2) = tokio::join!(h1, h2);
        let r1 = r1.unwrap();
        let r2 = r2.unwrap();
        assert_eq!(r1.0, r2.0);
        assert_eq!(r1.1.len(), 2);
        assert_eq!(r2.1.len(), 2);
    }

    #[tokio::test]
    async fn window_closes_immediately_at_max_messages() {
        let timers = Arc::new(TimerRegistry::new());
        let coalescer = Coalescer::new(timers, config(5_000, 2));

        let c1 = coalescer.clone();
        let h1 = tokio::spawn(async move { c1.coalesce("s1", msg("a")).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = coalescer.coalesce("s1", msg("b")).await;
        assert_eq!(result.1.len(), 2);
        assert_eq!(h1.await.unwrap().1.len(), 2);
    }

    #[tokio::test]
    async fn flush_closes_window_before_timer() {
        let timers = Arc::new(TimerRegistry::new());
        let coalescer = Coalescer::new(timers, config(5_000, 10));

        let c1 = coalescer.clone();
        let h1 = tokio::spawn(async move { c1.coalesce("s1", msg("a")).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        coalescer.flush("s1").await;

        assert_eq!(h1.await.unwrap().1.len(), 1);
        assert!(!coalescer.has_active("s1").await);
    }

    #[tokio::test]
    async fn pending_count_and_has_active_reflect_window_state() {
        let timers = Arc::new(TimerRegistry::new());
        let coalescer = Coalescer::new(timers, config(5_000, 10));

        let c1 = coalescer.clone();
        tokio::spawn(async move { c1.coalesce("s1", msg("a")).await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(coalescer.has_active("s1").await);
        assert_eq!(coalescer.pending_count("s1").await, 1);
        coalescer.flush("s1").await;
    }

    #[tokio::test]
    async fn clear_all_drops_windows_without_resolving() {
        let timers = Arc::new(TimerRegistry::new());
        let coalescer = Coalescer::new(timers, config(5_000, 10));

        let c1 = coalescer.clone();
        let h1 = tokio::spawn(async move { c1.coalesce("s1", msg("a")).await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        coalescer.clear_all().await;
        assert_eq!(h1.await.unwrap().1.len(), 0);
        assert_eq!(coalescer.stats().await.active_windows, 0);
    }
}
