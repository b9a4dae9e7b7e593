//! Session store port (§6).

use async_trait::async_trait;

/// Best-effort deletion of a child session used by the subagent registry's
/// archival sweep. Errors are swallowed by the caller (§4.F "Archival sweep").
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn delete(&self, session_key: &str, delete_transcript: bool) -> anyhow::Result<()>;
}
