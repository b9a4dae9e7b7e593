//! Announce flow port (§6, §4.F).

use async_trait::async_trait;

use crate::domain::models::SubagentRun;

/// Delivers a completed subagent's outcome to its parent. The registry
/// wraps every call with a 120 s timeout (§4.F, §5 "Cancellation and
/// timeouts"); the trait itself carries no timeout so mock implementations
/// stay simple.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnnounceFlow: Send + Sync {
    /// Returns whether delivery actually reached the parent. `false`
    /// triggers a retry on the registry's next wake (§7 `AnnounceFailed`).
    async fn announce(&self, run: &SubagentRun) -> anyhow::Result<bool>;
}
