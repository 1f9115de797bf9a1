//! Tickflow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TickflowError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickflowConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl TickflowConfig {
    /// Load config from the default path (~/.tickflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TickflowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TickflowError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TickflowError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Tickflow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tickflow")
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_job_store")]
    pub store_path: String,
    /// How often the wake timer looks for due jobs.
    #[serde(default = "default_wake_interval_ms")]
    pub wake_interval_ms: u64,
    /// Quiet period after the last mutation before the store is written.
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
    /// A `runningAtMs` marker older than this is considered abandoned.
    #[serde(default = "default_stuck_run_ms")]
    pub stuck_run_ms: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: default_job_store(),
            wake_interval_ms: default_wake_interval_ms(),
            persist_debounce_ms: default_persist_debounce_ms(),
            stuck_run_ms: default_stuck_run_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn store_path(&self) -> PathBuf {
        expand_path(&self.store_path)
    }
}

/// Workflow graph store and orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_workflow_store")]
    pub store_path: String,
    #[serde(default = "default_orchestrator_agent")]
    pub default_orchestrator_agent_id: String,
    /// Terminal orchestration records kept in memory for inspection.
    #[serde(default = "default_max_records")]
    pub max_orchestration_records: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            store_path: default_workflow_store(),
            default_orchestrator_agent_id: default_orchestrator_agent(),
            max_orchestration_records: default_max_records(),
        }
    }
}

impl WorkflowConfig {
    pub fn store_path(&self) -> PathBuf {
        expand_path(&self.store_path)
    }
}

/// Undo/redo ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

fn bool_true() -> bool { true }
fn default_job_store() -> String { "~/.tickflow/cron/jobs.json".into() }
fn default_wake_interval_ms() -> u64 { 1_000 }
fn default_persist_debounce_ms() -> u64 { 250 }
fn default_stuck_run_ms() -> i64 { 2 * 60 * 60 * 1000 }
fn default_workflow_store() -> String { "~/.tickflow/workflows.json".into() }
fn default_orchestrator_agent() -> String { "main".into() }
fn default_max_records() -> usize { 200 }
fn default_max_entries() -> usize { 100 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: TickflowConfig = toml::from_str("").unwrap();
        assert!(config.scheduler.enabled);
        assert_eq!(config.scheduler.wake_interval_ms, 1_000);
        assert_eq!(config.workflow.default_orchestrator_agent_id, "main");
        assert_eq!(config.ledger.max_entries, 100);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: TickflowConfig = toml::from_str(
            "[scheduler]\nenabled = false\nwake_interval_ms = 50\n",
        )
        .unwrap();
        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.wake_interval_ms, 50);
        assert_eq!(config.scheduler.persist_debounce_ms, 250);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = TickflowConfig::default();
        config.workflow.max_orchestration_records = 7;
        config.save_to(&path).unwrap();

        let loaded = TickflowConfig::load_from(&path).unwrap();
        assert_eq!(loaded.workflow.max_orchestration_records, 7);
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "scheduler = 3").unwrap();
        let err = TickflowConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, TickflowError::Config(_)));
    }

    #[test]
    fn test_tilde_expansion() {
        let expanded = expand_path("~/x.json");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
