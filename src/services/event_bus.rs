//! Agent event bus (§4.B): synchronous, order-preserving, panic-isolated
//! fan-out. The sole channel between worker completion and the subagent
//! registry/orchestrator (§9 "Cyclic references").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::models::AgentEvent;

/// Handle returned by `subscribe`; dropping it does not unsubscribe —
/// callers must call `unsubscribe` explicitly (matches the spec's
/// `subscribe(handler) -> unsubscribe` surface, not Rust's Drop-based RAII).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn Fn(&AgentEvent) + Send + Sync + 'static>;

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

/// Process-wide singleton event bus.
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a handler. Handlers are invoked in registration order on
    /// every subsequent `emit`.
    pub async fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().await.push(Subscriber {
            id,
            handler: Box::new(handler),
        });
        id
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().await.retain(|s| s.id != id);
    }

    /// Walk the subscriber set in registration order, invoking each
    /// handler. A handler that panics is isolated: delivery continues to
    /// the rest (§4.B).
    #[tracing::instrument(skip(self, event), fields(run_id = %event.run_id))]
    pub async fn emit(&self, event: AgentEvent) {
        let subscribers = self.subscribers.lock().await;
        for subscriber in subscribers.iter() {
            let handler = &subscriber.handler;
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&event)))
            {
                tracing::error!(?panic, subscription = subscriber.id.0, "event subscriber panicked");
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::EventStream;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn sample_event() -> AgentEvent {
        AgentEvent {
            run_id: Uuid::new_v4(),
            stream: EventStream::Other,
            session_key: None,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn emit_invokes_subscribers_in_registration_order() {
        let bus = EventBus::new();
        let order: Arc<std::sync::Mutex<Vec<u8>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(move |_| o1.lock().unwrap().push(1)).await;
        let o2 = order.clone();
        bus.subscribe(move |_| o2.lock().unwrap().push(2)).await;

        bus.emit(sample_event()).await;
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let id = bus.subscribe(move |_| { hits_clone.fetch_add(1, Ordering::SeqCst); }).await;

        bus.emit(sample_event()).await;
        bus.unsubscribe(id).await;
        bus.emit(sample_event()).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        bus.subscribe(|_| panic!("boom")).await;
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        bus.subscribe(move |_| { hits_clone.fetch_add(1, Ordering::SeqCst); }).await;

        bus.emit(sample_event()).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscriber_count_reflects_subscriptions() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count().await, 0);
        let id = bus.subscribe(|_| {}).await;
        assert_eq!(bus.subscriber_count().await, 1);
        bus.unsubscribe(id).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }
}
