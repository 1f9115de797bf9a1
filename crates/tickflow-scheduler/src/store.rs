//! File-based job store: lightweight persistence.
//! Jobs are saved as a single versioned JSON document: `{version: 1, jobs: [...]}`.
//! Loading never fails: missing, unreadable or corrupt files yield an empty store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tickflow_core::Result;
use tickflow_core::persist::write_json_atomic;

use crate::job::Job;

/// Current on-disk format version.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    jobs: &'a [Job],
}

/// File-based job store.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    /// Create a store backed by the given file.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save all jobs to disk (atomic replace).
    pub fn save(&self, jobs: &[Job]) -> Result<()> {
        write_json_atomic(
            &self.path,
            &StoreFileRef {
                version: STORE_VERSION,
                jobs,
            },
        )?;
        tracing::debug!("💾 Saved {} jobs to {}", jobs.len(), self.path.display());
        Ok(())
    }

    /// Load jobs from disk.
    pub fn load(&self) -> Vec<Job> {
        if !self.path.exists() {
            return Vec::new();
        }
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("⚠️ Failed to read {}: {e}", self.path.display());
                return Vec::new();
            }
        };
        match serde_json::from_str::<StoreFile>(&json) {
            Ok(file) if file.version == STORE_VERSION => file.jobs,
            Ok(file) => {
                tracing::warn!(
                    "⚠️ Ignoring {} with unsupported version {}",
                    self.path.display(),
                    file.version
                );
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("⚠️ Failed to parse {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobCreate, JobPayload, create_job};
    use crate::schedule::Schedule;

    fn sample(name: &str, schedule: Schedule) -> Job {
        create_job(JobCreate::new(name, schedule, JobPayload::event(name)), 1_000).unwrap()
    }

    #[test]
    fn test_roundtrip_preserves_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(&dir.path().join("jobs.json"));
        let mut jobs = vec![
            sample("a", Schedule::every(60_000)),
            sample("b", Schedule::at(9_000)),
            sample("c", Schedule::cron("0 8 * * *")),
        ];
        jobs[0].state.consecutive_errors = 3;
        jobs[0].state.last_error = Some("boom".into());

        store.save(&jobs).unwrap();
        assert_eq!(store.load(), jobs);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(&dir.path().join("none.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JobStore::new(&path).load().is_empty());

        std::fs::write(&path, r#"[{"id": 1}]"#).unwrap();
        assert!(JobStore::new(&path).load().is_empty());
    }

    #[test]
    fn test_unknown_version_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, r#"{"version": 2, "jobs": []}"#).unwrap();
        assert!(JobStore::new(&path).load().is_empty());
    }

    #[test]
    fn test_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        JobStore::new(&path).save(&[sample("x", Schedule::every(5))]).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["jobs"][0]["name"], "x");
        assert_eq!(value["jobs"][0]["schedule"]["kind"], "every");
    }
}
