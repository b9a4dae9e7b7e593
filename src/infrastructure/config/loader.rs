use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::config::SchedulerConfig;

/// Configuration validation error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("agents.defaults.max_concurrent_sessions must be >= 1, got {0}")]
    InvalidMaxConcurrentSessions(u32),

    #[error("agents.defaults.subagents.archive_after_minutes must be >= 1, got {0}")]
    InvalidArchiveAfterMinutes(u32),

    #[error("auth profile at index {0} has an empty provider name")]
    EmptyAuthProviderName(usize),
}

/// Loads [`SchedulerConfig`] with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults ([`SchedulerConfig::default`])
    /// 2. `.scheduler/config.yaml` (project config)
    /// 3. `.scheduler/local.yaml` (project local overrides, optional)
    /// 4. Environment variables (`SCHEDULER_*` prefix, highest priority)
    pub fn load() -> Result<SchedulerConfig> {
        let config: SchedulerConfig = Figment::new()
            .merge(Serialized::defaults(SchedulerConfig::default()))
            .merge(Yaml::file(".scheduler/config.yaml"))
            .merge(Yaml::file(".scheduler/local.yaml"))
            .merge(Env::prefixed("SCHEDULER_").split("__"))
            .extract()
            .context("failed to extract scheduler configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific YAML file, defaults merged beneath it.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<SchedulerConfig> {
        let config: SchedulerConfig = Figment::new()
            .merge(Serialized::defaults(SchedulerConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate a loaded configuration against the invariants in §6.
    pub fn validate(config: &SchedulerConfig) -> Result<(), ConfigError> {
        if config.agents.max_concurrent_sessions == 0 {
            return Err(ConfigError::InvalidMaxConcurrentSessions(
                config.agents.max_concurrent_sessions,
            ));
        }

        if config.agents.subagents.archive_after_minutes == 0 {
            return Err(ConfigError::InvalidArchiveAfterMinutes(
                config.agents.subagents.archive_after_minutes,
            ));
        }

        for (idx, profile) in config.auth_profiles.iter().enumerate() {
            if profile.provider.is_empty() {
                return Err(ConfigError::EmptyAuthProviderName(idx));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = SchedulerConfig::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn rejects_zero_max_concurrent_sessions() {
        let mut config = SchedulerConfig::default();
        config.agents.max_concurrent_sessions = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConcurrentSessions(0))
        ));
    }

    #[test]
    fn rejects_zero_archive_after_minutes() {
        let mut config = SchedulerConfig::default();
        config.agents.subagents.archive_after_minutes = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidArchiveAfterMinutes(0))
        ));
    }

    #[test]
    fn load_from_file_merges_over_defaults() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "agents:\n  max_concurrent_sessions: 4\ncron:\n  max_concurrent_runs: 2"
        )
        .unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.agents.max_concurrent_sessions, 4);
        assert_eq!(config.cron.max_concurrent_runs, 2);
        // defaults still populate untouched nested fields
        assert_eq!(config.agents.auth_cache.ttl_ms, 300_000);
    }

    #[test]
    fn env_override_takes_precedence() {
        // SAFETY: test-local env mutation, single-threaded test execution assumed.
        unsafe {
            std::env::set_var("SCHEDULER_AGENTS__MAX_CONCURRENT_SESSIONS", "7");
        }

        let config: SchedulerConfig = Figment::new()
            .merge(Serialized::defaults(SchedulerConfig::default()))
            .merge(Env::prefixed("SCHEDULER_").split("__"))
            .extract()
            .unwrap();

        assert_eq!(config.agents.max_concurrent_sessions, 7);

        unsafe {
            std::env::remove_var("SCHEDULER_AGENTS__MAX_CONCURRENT_SESSIONS");
        }
    }
}
