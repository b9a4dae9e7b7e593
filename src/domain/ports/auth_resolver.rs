//! Auth resolver port (§6 "Collaborator contracts consumed by the core").

use async_trait::async_trait;

use crate::domain::error::AuthCacheError;
use crate::domain::models::Credential;

/// Resolves a credential for a `(provider, profileId?)` pair. Implemented
/// by the host application; the core only calls it, never interprets the
/// returned blob.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(
        &self,
        provider: &str,
        profile_id: Option<&str>,
    ) -> Result<Credential, AuthCacheError>;
}
