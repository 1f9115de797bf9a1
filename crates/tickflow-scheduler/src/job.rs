//! Job definitions: the core data model for scheduled work,
//! plus construction and patch application.

use serde::{Deserialize, Serialize};
use tickflow_core::{Result, TickflowError};

use crate::schedule::{Schedule, compute_next_run};

/// A scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    /// Remove the job after its first successful run (one-shot cleanup).
    pub delete_after_run: bool,
    /// When/how to trigger.
    pub schedule: Schedule,
    /// What to do when triggered.
    pub payload: JobPayload,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(default)]
    pub state: JobState,
}

/// What the job does when triggered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum JobPayload {
    /// Hand an instruction to the agent runtime.
    Agent {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
    },
    /// Emit a plain event into the host.
    Event { text: String },
}

impl JobPayload {
    pub fn agent(message: &str) -> Self {
        Self::Agent {
            message: message.to_string(),
            agent_id: None,
            timeout_seconds: None,
        }
    }

    pub fn event(text: &str) -> Self {
        Self::Event {
            text: text.to_string(),
        }
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
    Skipped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Ok => write!(f, "ok"),
            RunStatus::Error => write!(f, "error"),
            RunStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Mutable runtime state of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<i64>,
    #[serde(default)]
    pub consecutive_errors: u32,
}

/// Input for creating a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Defaults to `true` for `at` schedules, `false` otherwise.
    #[serde(default)]
    pub delete_after_run: Option<bool>,
    pub schedule: Schedule,
    pub payload: JobPayload,
}

impl JobCreate {
    pub fn new(name: &str, schedule: Schedule, payload: JobPayload) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            enabled: None,
            delete_after_run: None,
            schedule,
            payload,
        }
    }
}

/// Partial update. `None` leaves a field untouched; `description: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub delete_after_run: Option<bool>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub payload: Option<JobPayload>,
}

impl JobPatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }
}

fn require_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TickflowError::Validation("job name is required".into()));
    }
    Ok(trimmed.to_string())
}

/// Build a new job record with a fresh id and its first `next_run_at_ms`.
pub fn create_job(input: JobCreate, now_ms: i64) -> Result<Job> {
    let name = require_name(&input.name)?;
    input.schedule.validate()?;

    let schedule = input.schedule.with_default_anchor(now_ms);
    let delete_after_run = input
        .delete_after_run
        .unwrap_or_else(|| schedule.is_one_shot());

    let mut job = Job {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        description: input.description,
        enabled: input.enabled.unwrap_or(true),
        delete_after_run,
        schedule,
        payload: input.payload,
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
        state: JobState::default(),
    };
    job.state.next_run_at_ms = compute_job_next_run(&job, now_ms);
    Ok(job)
}

/// Merge `patch` into `job` and recompute `next_run_at_ms`.
///
/// Validation happens before any field is touched, so a rejected patch
/// leaves the job unchanged.
pub fn apply_job_patch(job: &mut Job, patch: JobPatch, now_ms: i64) -> Result<()> {
    let name = patch.name.as_deref().map(require_name).transpose()?;
    if let Some(schedule) = &patch.schedule {
        schedule.validate()?;
    }

    if let Some(name) = name {
        job.name = name;
    }
    if let Some(description) = patch.description {
        job.description = description;
    }
    if let Some(enabled) = patch.enabled {
        job.enabled = enabled;
    }
    if let Some(delete_after_run) = patch.delete_after_run {
        job.delete_after_run = delete_after_run;
    }
    if let Some(schedule) = patch.schedule {
        job.schedule = schedule.with_default_anchor(now_ms);
    }
    if let Some(payload) = patch.payload {
        job.payload = payload;
    }
    job.updated_at_ms = now_ms;

    // The running marker belongs to an in-flight execution, not to the patch.
    job.state.next_run_at_ms = compute_job_next_run(job, now_ms);
    Ok(())
}

/// Next run for a job. Disabled jobs and broken schedules are never due.
pub fn compute_job_next_run(job: &Job, now_ms: i64) -> Option<i64> {
    if !job.enabled {
        return None;
    }
    match compute_next_run(&job.schedule, now_ms) {
        Ok(next) => next,
        Err(e) => {
            tracing::warn!("⚠️ Job '{}' ({}) has an unusable schedule: {e}", job.name, job.id);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_assigns_id_and_next_run() {
        let job = create_job(
            JobCreate::new("ping", Schedule::every(60_000), JobPayload::event("ping")),
            1_000,
        )
        .unwrap();
        assert!(!job.id.is_empty());
        assert!(job.enabled);
        assert!(!job.delete_after_run);
        assert_eq!(job.state.next_run_at_ms, Some(61_000));
        assert_eq!(
            job.schedule,
            Schedule::Every {
                every_ms: 60_000,
                anchor_ms: Some(1_000)
            }
        );
    }

    #[test]
    fn test_at_defaults_to_delete_after_run() {
        let job = create_job(
            JobCreate::new("once", Schedule::at(5_000), JobPayload::agent("hi")),
            1_000,
        )
        .unwrap();
        assert!(job.delete_after_run);
        assert_eq!(job.state.next_run_at_ms, Some(5_000));
    }

    #[test]
    fn test_create_rejects_blank_name_and_bad_schedule() {
        let err = create_job(
            JobCreate::new("  ", Schedule::every(10), JobPayload::event("x")),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, TickflowError::Validation(_)));

        let err = create_job(
            JobCreate::new("bad", Schedule::cron("nope"), JobPayload::event("x")),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, TickflowError::Schedule(_)));
    }

    #[test]
    fn test_disable_clears_next_run_and_enable_restores() {
        let mut job = create_job(
            JobCreate::new("tick", Schedule::every(100), JobPayload::event("t")),
            0,
        )
        .unwrap();
        apply_job_patch(&mut job, JobPatch::enabled(false), 50).unwrap();
        assert_eq!(job.state.next_run_at_ms, None);

        apply_job_patch(&mut job, JobPatch::enabled(true), 250).unwrap();
        assert_eq!(job.state.next_run_at_ms, Some(300));
        assert_eq!(job.updated_at_ms, 250);
    }

    #[test]
    fn test_toggle_keeps_running_marker() {
        let mut job = create_job(
            JobCreate::new("busy", Schedule::every(100), JobPayload::event("t")),
            0,
        )
        .unwrap();
        job.state.running_at_ms = Some(40);
        apply_job_patch(&mut job, JobPatch::enabled(false), 50).unwrap();
        apply_job_patch(&mut job, JobPatch::enabled(true), 60).unwrap();
        assert_eq!(job.state.running_at_ms, Some(40));
    }

    #[test]
    fn test_rejected_patch_leaves_job_untouched() {
        let mut job = create_job(
            JobCreate::new("keep", Schedule::every(100), JobPayload::event("t")),
            0,
        )
        .unwrap();
        let before = job.clone();
        let patch = JobPatch {
            name: Some("renamed".into()),
            schedule: Some(Schedule::every(0)),
            ..Default::default()
        };
        assert!(apply_job_patch(&mut job, patch, 10).is_err());
        assert_eq!(job, before);
    }

    #[test]
    fn test_patch_can_clear_description() {
        let mut input = JobCreate::new("d", Schedule::every(100), JobPayload::event("t"));
        input.description = Some("about".into());
        let mut job = create_job(input, 0).unwrap();
        let patch = JobPatch {
            description: Some(None),
            ..Default::default()
        };
        apply_job_patch(&mut job, patch, 1).unwrap();
        assert_eq!(job.description, None);
    }

    #[test]
    fn test_payload_serde_shape() {
        let payload: JobPayload =
            serde_json::from_value(serde_json::json!({"kind": "event", "text": "ping"})).unwrap();
        assert_eq!(payload, JobPayload::event("ping"));

        let json = serde_json::to_value(JobPayload::Agent {
            message: "go".into(),
            agent_id: Some("ops".into()),
            timeout_seconds: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"kind": "agent", "message": "go", "agentId": "ops"}));
    }
}
