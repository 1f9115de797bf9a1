//! Scheduler lifecycle events, delivered to an optional sink.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::job::RunStatus;

/// Lifecycle transition of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Added,
    Updated,
    Removed,
    Started,
    Finished,
}

/// One event per lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub action: JobAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
}

impl JobEvent {
    pub fn new(job_id: &str, action: JobAction) -> Self {
        Self {
            job_id: job_id.to_string(),
            action,
            run_at_ms: None,
            duration_ms: None,
            status: None,
            error: None,
            next_run_at_ms: None,
        }
    }
}

/// Receives every scheduler event. Must not block.
pub type EventSink = Arc<dyn Fn(JobEvent) + Send + Sync>;
