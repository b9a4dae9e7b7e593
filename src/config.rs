//! Typed configuration for the scheduling core.
//!
//! Mirrors the "Config" section of the external-interfaces spec: every
//! field here is a recognized option read at startup (and, via
//! [`crate::infrastructure::config::ConfigLoader`], reloadable).

use serde::{Deserialize, Serialize};

/// Top-level configuration for the scheduling core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub agents: AgentDefaultsConfig,
    pub cron: CronConfig,
    /// Per-provider auth profiles, in resolution order.
    #[serde(default)]
    pub auth_profiles: Vec<AuthProfileConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            agents: AgentDefaultsConfig::default(),
            cron: CronConfig::default(),
            auth_profiles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaultsConfig {
    /// Global cap on concurrently active session lanes.
    pub max_concurrent_sessions: u32,
    pub auth_cache: AuthCacheConfig,
    pub coalesce: CoalesceConfig,
    pub subagents: SubagentsConfig,
}

impl Default for AgentDefaultsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 16,
            auth_cache: AuthCacheConfig::default(),
            coalesce: CoalesceConfig::default(),
            subagents: SubagentsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthCacheConfig {
    pub ttl_ms: u64,
    pub max_size: usize,
}

impl Default for AuthCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 300_000,
            max_size: 50,
        }
    }
}

/// Background refresh fires this many milliseconds before expiry.
pub const REFRESH_AHEAD_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalesceConfig {
    pub enabled: bool,
    pub window_ms: u64,
    pub max_messages: usize,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Coalesce windows are clamped to this ceiling regardless of config.
pub const MAX_WINDOW_MS: u64 = 5_000;

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 1_500,
            max_messages: 10,
            exclude_patterns: vec!["subagent:".to_string()],
        }
    }
}

impl CoalesceConfig {
    /// Window duration clamped to [`MAX_WINDOW_MS`].
    #[must_use]
    pub fn clamped_window_ms(&self) -> u64 {
        self.window_ms.min(MAX_WINDOW_MS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubagentsConfig {
    pub archive_after_minutes: u32,
}

impl Default for SubagentsConfig {
    fn default() -> Self {
        Self {
            archive_after_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    /// Maps directly to the `cron` named lane's `maxConcurrent`.
    pub max_concurrent_runs: u32,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 1,
        }
    }
}

/// A single auth profile entry in a provider's resolution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthProfileConfig {
    pub provider: String,
    pub profile_id: Option<String>,
    /// Preferred profile for its provider tries first regardless of list order.
    #[serde(default)]
    pub preferred: bool,
}
