// SPDX-License-Identifier: Apache-2.0

//! A TOML-file-backed implementation of [`supervisor_core::PersistencePort`].
//!
//! Each descriptor, policy, and schedule is one file under its own
//! subdirectory of a store root (`<root>/processes/<name>.toml`, etc.).
//! Writes go through a temp file followed by a rename so a crash mid-write
//! never leaves a half-written file in place of a good one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use supervisor_core::{
    descriptor::RestartPolicy,
    error::{Result, SupervisorError},
    scheduler::{Kind as ScheduleKind, ScheduleRecord, Target as ScheduleTarget},
    Descriptor, LoadedState, PersistencePort,
};

/// A schedule as it appears on disk: `cron`/`interval`/`once`-tagged kind,
/// kept separate from the core's runtime `ScheduleRecord` representation
/// since `chrono::DateTime`/`cron::Schedule` round-trip through strings.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSchedule {
    name: String,
    kind: String,
    expression: String,
    target: supervisor_core::ProcessSpec,
    enabled: bool,
    last_run: Option<chrono::DateTime<chrono::Utc>>,
    next_run: Option<chrono::DateTime<chrono::Utc>>,
    run_count: u64,
}

pub struct TomlStore {
    root: PathBuf,
}

impl TomlStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn processes_dir(&self) -> PathBuf {
        self.root.join("processes")
    }

    fn policies_dir(&self) -> PathBuf {
        self.root.join("policies")
    }

    fn schedules_dir(&self) -> PathBuf {
        self.root.join("schedules")
    }

    async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SupervisorError::SpawnFailed {
                    name: parent.display().to_string(),
                    source,
                })?;
        }
        let tmp = path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|source| SupervisorError::SpawnFailed {
                name: tmp.display().to_string(),
                source,
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|source| SupervisorError::SpawnFailed {
                name: path.display().to_string(),
                source,
            })
    }

    async fn read_all_toml<T: for<'de> Deserialize<'de>>(dir: &Path) -> Vec<T> {
        let mut out = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return out;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "toml") {
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => match toml::from_str(&content) {
                        Ok(value) => out.push(value),
                        Err(e) => warn!(file = %path.display(), error = %e, "skipping corrupt entry"),
                    },
                    Err(e) => warn!(file = %path.display(), error = %e, "failed to read entry"),
                }
            }
        }
        out
    }
}

#[async_trait]
impl PersistencePort for TomlStore {
    async fn load_all(&self) -> Result<LoadedState> {
        let descriptors = Self::read_all_toml::<Descriptor>(&self.processes_dir()).await;
        let policies = Self::read_all_toml::<RestartPolicy>(&self.policies_dir()).await;
        let stored: Vec<StoredSchedule> = Self::read_all_toml(&self.schedules_dir()).await;

        let mut schedules = Vec::with_capacity(stored.len());
        for s in stored {
            let kind = match ScheduleKind::parse(&s.kind, &s.expression) {
                Ok(k) => k,
                Err(e) => {
                    warn!(schedule = %s.name, error = %e, "skipping schedule with unparseable expression");
                    continue;
                }
            };
            schedules.push(ScheduleRecord {
                name: s.name,
                kind,
                target: ScheduleTarget { spec: s.target },
                enabled: s.enabled,
                last_run: s.last_run,
                next_run: s.next_run,
                run_count: s.run_count,
            });
        }

        Ok(LoadedState {
            descriptors,
            policies,
            schedules,
        })
    }

    async fn save_descriptor(&self, descriptor: &Descriptor) -> Result<()> {
        let path = self.processes_dir().join(format!("{}.toml", descriptor.name));
        let contents = toml::to_string_pretty(descriptor)
            .map_err(|e| SupervisorError::Internal(format!("serialize descriptor: {e}")))?;
        Self::write_atomic(&path, &contents).await
    }

    async fn delete_descriptor(&self, name: &str) -> Result<()> {
        let path = self.processes_dir().join(format!("{name}.toml"));
        match tokio::fs::remove_file(&path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn save_policy(&self, policy: &RestartPolicy) -> Result<()> {
        let path = self.policies_dir().join(format!("{}.toml", policy.name));
        let contents = toml::to_string_pretty(policy)
            .map_err(|e| SupervisorError::Internal(format!("serialize policy: {e}")))?;
        Self::write_atomic(&path, &contents).await
    }

    async fn delete_policy(&self, name: &str) -> Result<()> {
        let path = self.policies_dir().join(format!("{name}.toml"));
        match tokio::fs::remove_file(&path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn save_schedule(&self, schedule: &ScheduleRecord) -> Result<()> {
        let (kind, expression) = match &schedule.kind {
            ScheduleKind::Cron(expr) => ("cron".to_string(), expr.clone()),
            ScheduleKind::Interval(dur) => ("interval".to_string(), format!("{}s", dur.as_secs())),
            ScheduleKind::Once(at) => ("once".to_string(), at.to_rfc3339()),
        };
        let stored = StoredSchedule {
            name: schedule.name.clone(),
            kind,
            expression,
            target: schedule.target.spec.clone(),
            enabled: schedule.enabled,
            last_run: schedule.last_run,
            next_run: schedule.next_run,
            run_count: schedule.run_count,
        };
        let path = self.schedules_dir().join(format!("{}.toml", schedule.name));
        let contents = toml::to_string_pretty(&stored)
            .map_err(|e| SupervisorError::Internal(format!("serialize schedule: {e}")))?;
        Self::write_atomic(&path, &contents).await
    }

    async fn delete_schedule(&self, name: &str) -> Result<()> {
        let path = self.schedules_dir().join(format!("{name}.toml"));
        match tokio::fs::remove_file(&path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use supervisor_core::ProcessSpec;

    fn spec() -> ProcessSpec {
        ProcessSpec {
            command: "echo".into(),
            args: vec!["hi".into()],
            working_dir: None,
            env: BTreeMap::new(),
            group: None,
            policy: None,
        }
    }

    #[tokio::test]
    async fn save_then_load_descriptor_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TomlStore::new(tmp.path());
        let descriptor = Descriptor::new("p".into(), spec(), 1_700_000_000);
        store.save_descriptor(&descriptor).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.descriptors.len(), 1);
        assert_eq!(loaded.descriptors[0].name, "p");

        store.delete_descriptor("p").await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert!(loaded.descriptors.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_policy_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TomlStore::new(tmp.path());
        store.save_policy(&RestartPolicy::standard()).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.policies.len(), 1);
        assert_eq!(loaded.policies[0].name, "standard");
    }

    #[tokio::test]
    async fn save_then_load_schedule_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TomlStore::new(tmp.path());
        let record = ScheduleRecord {
            name: "heartbeat".into(),
            kind: ScheduleKind::Interval(std::time::Duration::from_secs(60)),
            target: ScheduleTarget { spec: spec() },
            enabled: true,
            last_run: None,
            next_run: None,
            run_count: 0,
        };
        store.save_schedule(&record).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.schedules.len(), 1);
        assert_eq!(loaded.schedules[0].name, "heartbeat");
        assert!(matches!(loaded.schedules[0].kind, ScheduleKind::Interval(_)));
    }

    #[tokio::test]
    async fn corrupt_entry_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TomlStore::new(tmp.path());
        tokio::fs::create_dir_all(store.processes_dir()).await.unwrap();
        tokio::fs::write(store.processes_dir().join("bad.toml"), b"not valid toml {{{")
            .await
            .unwrap();
        let descriptor = Descriptor::new("good".into(), spec(), 1_700_000_000);
        store.save_descriptor(&descriptor).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.descriptors.len(), 1);
        assert_eq!(loaded.descriptors[0].name, "good");
    }

    #[tokio::test]
    async fn delete_nonexistent_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TomlStore::new(tmp.path());
        store.delete_descriptor("ghost").await.unwrap();
    }
}
