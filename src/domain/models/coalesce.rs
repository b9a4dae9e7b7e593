//! Coalesce window accumulator (§3 "Coalesce Window").

use tokio::time::Instant;

/// An inbound message accepted by the coalescer. The core does not
/// interpret `text`; it only concatenates and counts.
#[derive(Debug, Clone)]
pub struct CoalesceMessage {
    pub text: String,
    pub images: Vec<String>,
}

/// A combined batch ready for dispatch (§4.E `combine`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinedMessage {
    pub text: String,
    pub images: Vec<String>,
}

/// Concatenate trimmed texts with a blank-line separator; concatenate
/// image lists in order across messages.
#[must_use]
pub fn combine(messages: &[CoalesceMessage]) -> CombinedMessage {
    match messages {
        [] => CombinedMessage::default(),
        [single] => CombinedMessage {
            text: single.text.trim().to_string(),
            images: single.images.clone(),
        },
        many => {
            let text = many
                .iter()
                .map(|m| m.text.trim())
                .collect::<Vec<_>>()
                .join("\n\n");
            let images = many.iter().flat_map(|m| m.images.clone()).collect();
            CombinedMessage { text, images }
        }
    }
}

/// Per-session accumulator. The service layer pairs this with a deadline
/// timer id and a list of waiter channels; this struct holds only the
/// data the invariants in §3 govern directly.
#[derive(Debug)]
pub struct CoalesceWindow {
    pub id: u64,
    pub session_key: String,
    pub messages: Vec<CoalesceMessage>,
    pub started_at: Instant,
}

impl CoalesceWindow {
    #[must_use]
    pub fn new(id: u64, session_key: impl Into<String>, first: CoalesceMessage) -> Self {
        Self {
            id,
            session_key: session_key.into(),
            messages: vec![first],
            started_at: Instant::now(),
        }
    }

    pub fn push(&mut self, message: CoalesceMessage) {
        self.messages.push(message);
    }

    #[must_use]
    pub fn age_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Window should close: age has crossed `window_ms` or count reached `max_messages`.
    #[must_use]
    pub fn should_close(&self, window_ms: u64, max_messages: usize) -> bool {
        self.age_ms() >= window_ms || self.len() >= max_messages
    }
}
