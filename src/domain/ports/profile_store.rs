//! Profile store port (§6).

use async_trait::async_trait;

use crate::domain::models::AuthProfileState;

/// Lists configured profiles for a provider and checks cooldown state.
/// `findAvailable` (§4.D) consults this to decide resolution order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Profiles for `provider`, preferred-first then configured order.
    async fn profiles_for(&self, provider: &str) -> Vec<AuthProfileState>;

    /// Whether `profile_id` is currently in cooldown for `provider`.
    async fn is_in_cooldown(&self, provider: &str, profile_id: Option<&str>) -> bool;
}
