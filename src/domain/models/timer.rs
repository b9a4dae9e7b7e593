//! Timer entry bookkeeping (§3 "Timer Entry", §4.A).

use chrono::{DateTime, Utc};

/// One-shot vs. repeating timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Timeout,
    Interval,
}

/// A registered timer's metadata. The handle that actually cancels the
/// underlying `tokio` task lives in the service layer (`JoinHandle` isn't
/// `Clone`/inspectable the way this bookkeeping struct needs to be).
#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub id: String,
    pub kind: TimerKind,
    pub label: String,
    pub delay_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl TimerEntry {
    #[must_use]
    pub fn new(id: String, kind: TimerKind, label: impl Into<String>, delay_ms: u64) -> Self {
        Self {
            id,
            kind,
            label: label.into(),
            delay_ms,
            created_at: Utc::now(),
        }
    }
}

/// Aggregate counts returned by `TimerRegistry::stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TimerStats {
    pub timeouts: usize,
    pub intervals: usize,
    pub total: usize,
}

/// `auth-probe:*` and `session:probe-*` lane names suppress error-level
/// logging for task failures (§9 "probe lane name prefixes", a logging
/// suppression rule only, no scheduling effect).
#[must_use]
pub fn is_probe_lane(name: &str) -> bool {
    name.starts_with("auth-probe:") || name.starts_with("session:probe-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_lane_prefixes_are_recognized() {
        assert!(is_probe_lane("auth-probe:anthropic"));
        assert!(is_probe_lane("session:probe-1"));
        assert!(!is_probe_lane("main"));
        assert!(!is_probe_lane("cron"));
    }
}
