//! Agent event envelope (§3 "Agent Event", §4.B).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which stream an event belongs to. `Lifecycle` is the only stream the
/// subagent registry subscribes to; `Other` covers everything else a
/// producer might publish on the same bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStream {
    Lifecycle,
    Other,
}

/// Lifecycle phase carried by `stream = Lifecycle` events (§9 GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Start,
    End,
    Error,
    SubagentComplete,
}

/// Payload carried by a lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecyclePayload {
    pub phase: LifecyclePhase,
    /// Present on `error`: the failure message.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Present on `end`/`error`: whether the worker was aborted (maps to
    /// outcome = timeout rather than error).
    #[serde(default)]
    pub aborted: bool,
}

/// A process-wide event fanned out by the event bus (§3, §4.B).
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub run_id: Uuid,
    pub stream: EventStream,
    pub session_key: Option<String>,
    pub payload: serde_json::Value,
}

impl AgentEvent {
    #[must_use]
    pub fn lifecycle(run_id: Uuid, session_key: Option<String>, payload: LifecyclePayload) -> Self {
        Self {
            run_id,
            stream: EventStream::Lifecycle,
            session_key,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Parse `payload` back into a [`LifecyclePayload`] if this is a
    /// lifecycle event with a well-formed payload.
    #[must_use]
    pub fn as_lifecycle(&self) -> Option<LifecyclePayload> {
        if self.stream != EventStream::Lifecycle {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}
