//! Whole-file JSON store for the subagent registry's run map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::domain::models::SubagentRun;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Reads and rewrites `path` as a single JSON object keyed by run id.
/// Every mutation in the registry triggers a full rewrite — the map is
/// small (bounded by concurrently-outstanding subagent runs) so there is no
/// need for append-only or row-level storage here.
pub struct SubagentStore {
    path: PathBuf,
}

impl SubagentStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the persisted map. Returns an empty map if the file does not
    /// exist yet (first run).
    pub async fn load(&self) -> Result<HashMap<Uuid, SubagentRun>, PersistenceError> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Parse {
                path: self.path.clone(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(source) => Err(PersistenceError::Read { path: self.path.clone(), source }),
        }
    }

    /// Rewrite the file with the full map, creating parent directories if
    /// they do not exist.
    pub async fn save(&self, runs: &HashMap<Uuid, SubagentRun>) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|source| PersistenceError::Write {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }

        let json = serde_json::to_vec_pretty(runs).map_err(|source| PersistenceError::Parse {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, json).await.map_err(|source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CleanupPolicy, RegisterRunParams};

    fn sample_run() -> SubagentRun {
        SubagentRun::register(
            RegisterRunParams {
                run_id: Uuid::new_v4(),
                child_session_key: "child".into(),
                requester_session_key: "parent".into(),
                requester_origin: serde_json::json!({}),
                requester_display_key: "parent-display".into(),
                task: "summarize".into(),
                cleanup: CleanupPolicy::Delete,
                label: None,
                archive_after_minutes: Some(60),
            },
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn load_missing_file_returns_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubagentStore::new(dir.path().join("runs.json"));
        let runs = store.load().await.unwrap();
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubagentStore::new(dir.path().join("nested").join("runs.json"));

        let run = sample_run();
        let mut runs = HashMap::new();
        runs.insert(run.run_id, run.clone());
        store.save(&runs).await.unwrap();

        let restored = store.load().await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[&run.run_id].run_id, run.run_id);
    }

    #[tokio::test]
    async fn save_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubagentStore::new(dir.path().join("runs.json"));

        let run1 = sample_run();
        let mut runs = HashMap::new();
        runs.insert(run1.run_id, run1);
        store.save(&runs).await.unwrap();

        let run2 = sample_run();
        let mut runs2 = HashMap::new();
        runs2.insert(run2.run_id, run2.clone());
        store.save(&runs2).await.unwrap();

        let restored = store.load().await.unwrap();
        assert_eq!(restored.len(), 1);
        assert!(restored.contains_key(&run2.run_id));
    }
}
