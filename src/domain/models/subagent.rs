//! Subagent run record and its state machine (§3 "Subagent Run Record", §4.F).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happens to a run's record after its announce flow completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    /// Remove the record entirely once announced.
    Delete,
    /// Keep the record, stamped with `cleanup_completed_at`.
    Keep,
}

/// Terminal outcome of a run (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "message")]
pub enum RunOutcome {
    Ok,
    Error(String),
    Timeout,
}

/// A parent-tracked child run (§3 "Subagent Run Record").
///
/// Monotonic phase: `created -> started -> ended(ok|error|timeout) ->
/// cleanup-handled -> (delete | keep -> archived)`. All fields round-trip
/// through `serde_json` for the single-file persistence store; unknown
/// fields on read are tolerated by `#[serde(default)]` on optional ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentRun {
    pub run_id: Uuid,
    pub child_session_key: String,
    pub parent_session_key: String,
    pub parent_display_key: String,
    /// Opaque transport descriptor for the parent's origin; the core never
    /// interprets it, only hands it to the announce flow.
    pub parent_origin: serde_json::Value,
    pub task: String,
    pub cleanup: CleanupPolicy,
    #[serde(default)]
    pub label: Option<String>,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcome: Option<RunOutcome>,
    #[serde(default)]
    pub archive_at_ms: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cleanup_handled: bool,
    #[serde(default)]
    pub cleanup_completed_at: Option<DateTime<Utc>>,
}

/// Parameters for registering a new run (§4.F `register`).
#[derive(Debug, Clone)]
pub struct RegisterRunParams {
    pub run_id: Uuid,
    pub child_session_key: String,
    pub requester_session_key: String,
    pub requester_origin: serde_json::Value,
    pub requester_display_key: String,
    pub task: String,
    pub cleanup: CleanupPolicy,
    pub label: Option<String>,
    pub archive_after_minutes: Option<u32>,
}

impl SubagentRun {
    #[must_use]
    pub fn register(params: RegisterRunParams, now: DateTime<Utc>) -> Self {
        let archive_at_ms = params
            .archive_after_minutes
            .map(|minutes| now + chrono::Duration::minutes(i64::from(minutes)));
        Self {
            run_id: params.run_id,
            child_session_key: params.child_session_key,
            parent_session_key: params.requester_session_key,
            parent_display_key: params.requester_display_key,
            parent_origin: params.requester_origin,
            task: params.task,
            cleanup: params.cleanup,
            label: params.label,
            created_at: now,
            started_at: Some(now),
            ended_at: None,
            outcome: None,
            archive_at_ms,
            cleanup_handled: false,
            cleanup_completed_at: None,
        }
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.cleanup == CleanupPolicy::Keep
            && self.cleanup_handled
            && self.cleanup_completed_at.is_some()
    }

    /// Apply a `started` lifecycle event, if not already started distinctly.
    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.started_at = Some(at);
    }

    /// Apply an `ended`/`error` lifecycle event. No-op if already ended
    /// (§3 invariant: `endedAt` is set exactly once).
    pub fn mark_ended(&mut self, outcome: RunOutcome, at: DateTime<Utc>) {
        if self.ended_at.is_some() {
            return;
        }
        self.ended_at = Some(at);
        self.outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> RegisterRunParams {
        RegisterRunParams {
            run_id: Uuid::new_v4(),
            child_session_key: "child".into(),
            requester_session_key: "parent".into(),
            requester_origin: serde_json::json!({"channel": "slack"}),
            requester_display_key: "parent-display".into(),
            task: "summarize".into(),
            cleanup: CleanupPolicy::Delete,
            label: None,
            archive_after_minutes: Some(60),
        }
    }

    #[test]
    fn register_sets_created_and_started_together() {
        let now = Utc::now();
        let run = SubagentRun::register(sample_params(), now);
        assert_eq!(run.created_at, now);
        assert_eq!(run.started_at, Some(now));
        assert!(!run.is_ended());
    }

    #[test]
    fn register_computes_archive_deadline() {
        let now = Utc::now();
        let run = SubagentRun::register(sample_params(), now);
        assert_eq!(run.archive_at_ms, Some(now + chrono::Duration::minutes(60)));
    }

    #[test]
    fn ended_at_is_set_exactly_once() {
        let now = Utc::now();
        let mut run = SubagentRun::register(sample_params(), now);
        let t1 = now + chrono::Duration::seconds(5);
        let t2 = now + chrono::Duration::seconds(10);

        run.mark_ended(RunOutcome::Ok, t1);
        run.mark_ended(RunOutcome::Timeout, t2);

        assert_eq!(run.ended_at, Some(t1));
        assert_eq!(run.outcome, Some(RunOutcome::Ok));
    }

    #[test]
    fn round_trips_through_json() {
        let now = Utc::now();
        let mut run = SubagentRun::register(sample_params(), now);
        run.mark_ended(RunOutcome::Error("boom".into()), now);
        run.cleanup_handled = true;
        run.cleanup_completed_at = Some(now);

        let json = serde_json::to_string(&run).unwrap();
        let restored: SubagentRun = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.run_id, run.run_id);
        assert_eq!(restored.outcome, run.outcome);
        assert_eq!(restored.cleanup_completed_at, run.cleanup_completed_at);
    }

    #[test]
    fn tolerates_unknown_fields_on_restore() {
        let now = Utc::now();
        let run = SubagentRun::register(sample_params(), now);
        let mut value = serde_json::to_value(&run).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("future_field".into(), serde_json::json!("ignored"));

        let restored: SubagentRun = serde_json::from_value(value).unwrap();
        assert_eq!(restored.run_id, run.run_id);
    }
}
