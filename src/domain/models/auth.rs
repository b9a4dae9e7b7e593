//! Auth preload cache entry and profile bookkeeping (§3 "Auth Cache Entry").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key into the auth cache: `(provider, profileId?)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthCacheKey {
    pub provider: String,
    pub profile_id: Option<String>,
}

impl AuthCacheKey {
    #[must_use]
    pub fn new(provider: impl Into<String>, profile_id: Option<String>) -> Self {
        Self {
            provider: normalize(&provider.into()),
            profile_id,
        }
    }
}

/// Lowercase/trim a provider name so cache keys are stable regardless of
/// caller casing.
#[must_use]
pub fn normalize(provider: &str) -> String {
    provider.trim().to_ascii_lowercase()
}

impl std::fmt::Display for AuthCacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.profile_id {
            Some(profile) => write!(f, "{}:{profile}", self.provider),
            None => write!(f, "{}", self.provider),
        }
    }
}

/// Opaque resolved credential blob. The core never interprets its contents;
/// it is returned to callers and invalidated wholesale on 401.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub blob: serde_json::Value,
    /// Where the credential came from (e.g. "env", "keychain", "oauth-refresh").
    pub source: String,
}

/// A cached, resolved credential with TTL and LRU bookkeeping.
#[derive(Debug, Clone)]
pub struct AuthCacheEntry {
    pub credential: Credential,
    pub resolved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthCacheEntry {
    #[must_use]
    pub fn new(credential: Credential, resolved_at: DateTime<Utc>, ttl_ms: u64) -> Self {
        let expires_at = resolved_at + chrono::Duration::milliseconds(ttl_ms as i64);
        Self {
            credential,
            resolved_at,
            expires_at,
        }
    }

    /// True while `now < expires_at`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// True once inside the refresh-ahead window but still fresh.
    #[must_use]
    pub fn in_refresh_window(&self, now: DateTime<Utc>, refresh_ahead_ms: u64) -> bool {
        let refresh_at = self.expires_at - chrono::Duration::milliseconds(refresh_ahead_ms as i64);
        self.is_fresh(now) && now >= refresh_at
    }
}

/// A configured auth profile and its cooldown state (§4.D `findAvailable`).
#[derive(Debug, Clone)]
pub struct AuthProfileState {
    pub provider: String,
    pub profile_id: Option<String>,
    pub preferred: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl AuthProfileState {
    #[must_use]
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(normalize("  Anthropic  "), "anthropic");
    }

    #[test]
    fn cache_key_display_includes_profile_when_present() {
        let key = AuthCacheKey::new("openai", Some("work".to_string()));
        assert_eq!(key.to_string(), "openai:work");

        let key = AuthCacheKey::new("openai", None);
        assert_eq!(key.to_string(), "openai");
    }

    #[test]
    fn entry_is_fresh_before_expiry_only() {
        let resolved = Utc::now();
        let entry = AuthCacheEntry::new(
            Credential {
                blob: serde_json::json!({}),
                source: "test".into(),
            },
            resolved,
            1000,
        );
        assert!(entry.is_fresh(resolved + chrono::Duration::milliseconds(500)));
        assert!(!entry.is_fresh(resolved + chrono::Duration::milliseconds(1500)));
    }

    #[test]
    fn entry_enters_refresh_window_before_expiry() {
        let resolved = Utc::now();
        let entry = AuthCacheEntry::new(
            Credential {
                blob: serde_json::json!({}),
                source: "test".into(),
            },
            resolved,
            1000,
        );
        // refresh-ahead of 400ms means the window opens at t=600ms
        assert!(!entry.in_refresh_window(resolved + chrono::Duration::milliseconds(500), 400));
        assert!(entry.in_refresh_window(resolved + chrono::Duration::milliseconds(700), 400));
        assert!(!entry.in_refresh_window(resolved + chrono::Duration::milliseconds(1500), 400));
    }

    #[test]
    fn profile_cooldown_expires() {
        let now = Utc::now();
        let mut profile = AuthProfileState {
            provider: "openai".into(),
            profile_id: Some("p1".into()),
            preferred: false,
            cooldown_until: Some(now + chrono::Duration::seconds(30)),
        };
        assert!(profile.in_cooldown(now));
        profile.cooldown_until = Some(now - chrono::Duration::seconds(1));
        assert!(!profile.in_cooldown(now));
    }
}
