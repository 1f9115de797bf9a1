//! Error types shared by every Tickflow crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TickflowError>;

/// Every failure a Tickflow API can surface.
///
/// Executor and node-launch failures are never represented here: they are
/// recorded as job or node state instead.
#[derive(Debug, Error)]
pub enum TickflowError {
    /// Unknown job, workflow, node, edge or orchestration id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Empty required field, duplicate id, out-of-range value.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An edge mutation would close a cycle.
    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    /// Malformed cron expression, unknown timezone or invalid interval.
    #[error("Schedule error: {0}")]
    Schedule(String),

    /// Store write failure. Mutating APIs log and swallow it.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TickflowError {
    pub fn not_found(what: &str, id: &str) -> Self {
        Self::NotFound(format!("{what} '{id}'"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
