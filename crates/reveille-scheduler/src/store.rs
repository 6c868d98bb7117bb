//! Atomic persistence of the full schedule-state snapshot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::SchedulerError;
use crate::state::ScheduleState;

/// The only layout this build reads or writes. The version field is
/// authoritative: any other value is treated as an unreadable file, not
/// inferred from field presence.
const SCHEMA_VERSION: u32 = 1;

#[derive(Deserialize)]
struct StateFile {
    schema_version: u32,
    providers: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct StateFileRef<'a> {
    schema_version: u32,
    providers: &'a BTreeMap<String, ScheduleState>,
}

/// Durable load/save of all providers' schedule state as one atomic unit.
///
/// Saves write a sibling temp file and rename it over the canonical path, so
/// a crash mid-write never leaves a corrupt or partial snapshot. Writers are
/// serialized through an internal lock.
pub struct StateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted state for the given configured providers.
    ///
    /// Tolerates a missing file (empty result), malformed content or an
    /// unknown schema version (logged, empty result), records for providers
    /// no longer configured (silently dropped), and individually invalid
    /// records (dropped without affecting siblings).
    pub async fn load(&self, configured: &HashSet<String>) -> HashMap<String, ScheduleState> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read scheduler state, using defaults");
                return HashMap::new();
            }
        };

        let file: StateFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "scheduler state malformed, using defaults");
                return HashMap::new();
            }
        };

        if file.schema_version != SCHEMA_VERSION {
            warn!(
                found = file.schema_version,
                expected = SCHEMA_VERSION,
                "unknown scheduler state schema version, using defaults"
            );
            return HashMap::new();
        }

        let mut loaded = HashMap::new();
        for (name, value) in file.providers {
            if !configured.contains(&name) {
                continue;
            }
            match serde_json::from_value::<ScheduleState>(value) {
                Ok(state) => {
                    loaded.insert(name, state);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "invalid persisted state for provider, using default");
                }
            }
        }

        loaded
    }

    /// Atomically write the full snapshot: temp file in the same directory,
    /// then rename over the canonical path.
    pub async fn save(
        &self,
        states: &BTreeMap<String, ScheduleState>,
    ) -> Result<(), SchedulerError> {
        let _guard = self.write_lock.lock().await;

        let payload = serde_json::to_string_pretty(&StateFileRef {
            schema_version: SCHEMA_VERSION,
            providers: states,
        })?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SchedulerError::Persist {
                    path: self.path.clone(),
                    source,
                })?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, payload)
            .await
            .map_err(|source| SchedulerError::Persist {
                path: tmp_path.clone(),
                source,
            })?;

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| SchedulerError::Persist {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use reveille_provider::{ProviderConfig, ResetMode};

    use crate::state::PauseReason;

    fn config() -> ProviderConfig {
        ProviderConfig {
            name: "claude".to_string(),
            model: "m".to_string(),
            wakeup_message: "hi".to_string(),
            reset_mode: ResetMode::Rolling,
            window_seconds: 18000,
            wake_delay_seconds: 2,
            weekly_window_seconds: 604800,
            weekly_wake_delay_seconds: 60,
        }
    }

    fn configured(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn store_in(dir: &tempfile::TempDir) -> StateStore {
        StateStore::new(dir.path().join("scheduler_state.json"))
    }

    #[tokio::test]
    async fn round_trips_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let now = Utc::now();
        let mut state = ScheduleState::initial(now, &config());
        state.weekly_next_run_at = Some(now + Duration::days(7));
        state.last_success_at = Some(now - Duration::hours(1));
        state.last_attempt_at = Some(now);
        state.consecutive_failures = 3;
        state.paused_reason = Some(PauseReason::AuthRequired);
        state.backoff_until = Some(state.next_run_at);
        state.auth_request_sent = true;

        let states = BTreeMap::from([("claude".to_string(), state.clone())]);
        store.save(&states).await.unwrap();

        let loaded = store.load(&configured(&["claude"])).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["claude"], state);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load(&configured(&["claude"])).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        tokio::fs::write(store.path(), "{ not json").await.unwrap();
        assert!(store.load(&configured(&["claude"])).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_schema_version_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        tokio::fs::write(
            store.path(),
            r#"{"schema_version": 2, "providers": {}}"#,
        )
        .await
        .unwrap();
        assert!(store.load(&configured(&["claude"])).await.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_providers_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let state = ScheduleState::initial(Utc::now(), &config());
        let states = BTreeMap::from([
            ("claude".to_string(), state.clone()),
            ("codex".to_string(), state),
        ]);
        store.save(&states).await.unwrap();

        let loaded = store.load(&configured(&["claude"])).await;
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("claude"));
    }

    #[tokio::test]
    async fn invalid_record_does_not_invalidate_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        // "codex" is missing the mandatory next_run_at.
        tokio::fs::write(
            store.path(),
            r#"{
              "schema_version": 1,
              "providers": {
                "claude": {"next_run_at": "2026-02-10T10:13:00+00:00"},
                "codex": {"consecutive_failures": 1}
              }
            }"#,
        )
        .await
        .unwrap();

        let loaded = store.load(&configured(&["claude", "codex"])).await;
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("claude"));
    }

    #[tokio::test]
    async fn save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let state = ScheduleState::initial(Utc::now(), &config());
        let both = BTreeMap::from([
            ("claude".to_string(), state.clone()),
            ("codex".to_string(), state.clone()),
        ]);
        store.save(&both).await.unwrap();

        let only = BTreeMap::from([("claude".to_string(), state)]);
        store.save(&only).await.unwrap();

        let loaded = store.load(&configured(&["claude", "codex"])).await;
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let states = BTreeMap::from([(
            "claude".to_string(),
            ScheduleState::initial(Utc::now(), &config()),
        )]);
        store.save(&states).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["scheduler_state.json".to_string()]);
    }
}
