//! Job mutation ledger: undo/redo over scheduler create/update/delete.
//!
//! Every successful mutation made through the ledger pushes an entry onto
//! the undo stack and clears the redo stack. Undo applies the structural
//! inverse (delete ↔ create, patch back to `before`); redo replays `after`.
//! A failed undo/redo puts the entry back where it came from.
//!
//! The ledger is the front door for undoable mutations: hosts route user
//! edits through [`JobLedger`]. Calls made straight on [`SchedulerService`]
//! (workflow companion-job sync, the ledger's own undo/redo replays) are
//! system mutations and are not recorded.

use serde::{Deserialize, Serialize};
use tickflow_core::config::LedgerConfig;
use tickflow_core::{Result, TickflowError};
use tokio::sync::Mutex;

use crate::job::{Job, JobCreate, JobPatch, JobPayload};
use crate::schedule::Schedule;
use crate::service::SchedulerService;

/// Field-level copy of the user-editable parts of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub delete_after_run: bool,
    pub schedule: Schedule,
    pub payload: JobPayload,
}

impl JobSnapshot {
    pub fn of(job: &Job) -> Self {
        Self {
            name: job.name.clone(),
            description: job.description.clone(),
            enabled: job.enabled,
            delete_after_run: job.delete_after_run,
            schedule: job.schedule.clone(),
            payload: job.payload.clone(),
        }
    }

    fn to_create(&self) -> JobCreate {
        JobCreate {
            name: self.name.clone(),
            description: self.description.clone(),
            enabled: Some(self.enabled),
            delete_after_run: Some(self.delete_after_run),
            schedule: self.schedule.clone(),
            payload: self.payload.clone(),
        }
    }

    fn to_patch(&self) -> JobPatch {
        JobPatch {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            enabled: Some(self.enabled),
            delete_after_run: Some(self.delete_after_run),
            schedule: Some(self.schedule.clone()),
            payload: Some(self.payload.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// One undoable mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub kind: MutationKind,
    pub label: String,
    pub created_at_ms: i64,
    /// Live id of the affected job; changes when undo/redo recreates it.
    pub current_job_id: String,
    pub before: Option<JobSnapshot>,
    pub after: Option<JobSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerOutcomeKind {
    /// Nothing to undo/redo.
    None,
    Undone,
    Redone,
}

/// Result of `undo_last` / `redo_last`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerOutcome {
    pub kind: LedgerOutcomeKind,
    pub entry: Option<LedgerEntry>,
    /// The job as it exists after the operation, if it still exists.
    pub job: Option<Job>,
}

impl LedgerOutcome {
    fn none() -> Self {
        Self {
            kind: LedgerOutcomeKind::None,
            entry: None,
            job: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStatus {
    pub undo_depth: usize,
    pub redo_depth: usize,
    pub next_undo: Option<String>,
    pub next_redo: Option<String>,
}

#[derive(Default)]
struct Stacks {
    undo: Vec<LedgerEntry>,
    redo: Vec<LedgerEntry>,
}

impl Stacks {
    fn remap(&mut self, old_id: &str, new_id: &str) {
        for entry in self.undo.iter_mut().chain(self.redo.iter_mut()) {
            if entry.current_job_id == old_id {
                entry.current_job_id = new_id.to_string();
            }
        }
    }
}

/// Undo/redo front-end over a [`SchedulerService`].
pub struct JobLedger {
    scheduler: SchedulerService,
    stacks: Mutex<Stacks>,
    max_entries: usize,
}

impl JobLedger {
    pub fn new(scheduler: SchedulerService, max_entries: usize) -> Self {
        Self {
            scheduler,
            stacks: Mutex::new(Stacks::default()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &LedgerConfig, scheduler: SchedulerService) -> Self {
        Self::new(scheduler, config.max_entries)
    }

    pub fn scheduler(&self) -> &SchedulerService {
        &self.scheduler
    }

    /// Add a job and record it.
    pub async fn create(&self, input: JobCreate) -> Result<Job> {
        let mut stacks = self.stacks.lock().await;
        let job = self.scheduler.add(input).await?;
        self.record(
            &mut stacks,
            MutationKind::Create,
            &job.id,
            None,
            Some(JobSnapshot::of(&job)),
        );
        Ok(job)
    }

    /// Patch a job and record the before/after snapshots.
    pub async fn update(&self, id: &str, patch: JobPatch) -> Result<Job> {
        let mut stacks = self.stacks.lock().await;
        let before = self
            .scheduler
            .get(id)
            .await
            .ok_or_else(|| TickflowError::not_found("job", id))?;
        let job = self.scheduler.update(id, patch).await?;
        self.record(
            &mut stacks,
            MutationKind::Update,
            &job.id,
            Some(JobSnapshot::of(&before)),
            Some(JobSnapshot::of(&job)),
        );
        Ok(job)
    }

    /// Remove a job and record it. Unknown ids return false and record nothing.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut stacks = self.stacks.lock().await;
        let Some(before) = self.scheduler.get(id).await else {
            return Ok(false);
        };
        if !self.scheduler.remove(id).await {
            return Ok(false);
        }
        self.record(
            &mut stacks,
            MutationKind::Delete,
            id,
            Some(JobSnapshot::of(&before)),
            None,
        );
        Ok(true)
    }

    /// Revert the most recent mutation.
    pub async fn undo_last(&self) -> Result<LedgerOutcome> {
        let mut stacks = self.stacks.lock().await;
        let Some(entry) = stacks.undo.pop() else {
            return Ok(LedgerOutcome::none());
        };
        match self.revert(&entry).await {
            Ok((job, recreated)) => {
                let mut entry = entry;
                if let Some(new_id) = recreated {
                    stacks.remap(&entry.current_job_id, &new_id);
                    entry.current_job_id = new_id;
                }
                tracing::info!("↩️ Undone: {}", entry.label);
                stacks.redo.push(entry.clone());
                Ok(LedgerOutcome {
                    kind: LedgerOutcomeKind::Undone,
                    entry: Some(entry),
                    job,
                })
            }
            Err(e) => {
                tracing::warn!("⚠️ Undo failed for '{}': {e}", entry.label);
                stacks.undo.push(entry);
                Err(e)
            }
        }
    }

    /// Re-apply the most recently undone mutation.
    pub async fn redo_last(&self) -> Result<LedgerOutcome> {
        let mut stacks = self.stacks.lock().await;
        let Some(entry) = stacks.redo.pop() else {
            return Ok(LedgerOutcome::none());
        };
        match self.replay(&entry).await {
            Ok((job, recreated)) => {
                let mut entry = entry;
                if let Some(new_id) = recreated {
                    stacks.remap(&entry.current_job_id, &new_id);
                    entry.current_job_id = new_id;
                }
                tracing::info!("↪️ Redone: {}", entry.label);
                stacks.undo.push(entry.clone());
                Ok(LedgerOutcome {
                    kind: LedgerOutcomeKind::Redone,
                    entry: Some(entry),
                    job,
                })
            }
            Err(e) => {
                tracing::warn!("⚠️ Redo failed for '{}': {e}", entry.label);
                stacks.redo.push(entry);
                Err(e)
            }
        }
    }

    pub async fn status(&self) -> LedgerStatus {
        let stacks = self.stacks.lock().await;
        LedgerStatus {
            undo_depth: stacks.undo.len(),
            redo_depth: stacks.redo.len(),
            next_undo: stacks.undo.last().map(|e| e.label.clone()),
            next_redo: stacks.redo.last().map(|e| e.label.clone()),
        }
    }

    fn record(
        &self,
        stacks: &mut Stacks,
        kind: MutationKind,
        job_id: &str,
        before: Option<JobSnapshot>,
        after: Option<JobSnapshot>,
    ) {
        let name = after
            .as_ref()
            .or(before.as_ref())
            .map(|s| s.name.as_str())
            .unwrap_or(job_id);
        let verb = match kind {
            MutationKind::Create => "Create",
            MutationKind::Update => "Update",
            MutationKind::Delete => "Delete",
        };
        let entry = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: format!("{verb} job '{name}'"),
            created_at_ms: tickflow_core::now_ms(),
            current_job_id: job_id.to_string(),
            before,
            after,
        };
        stacks.undo.push(entry);
        if stacks.undo.len() > self.max_entries {
            stacks.undo.remove(0);
        }
        stacks.redo.clear();
    }

    /// Inverse of the recorded mutation. Returns the live job (if any) and
    /// the new id when the job had to be recreated.
    async fn revert(&self, entry: &LedgerEntry) -> Result<(Option<Job>, Option<String>)> {
        match entry.kind {
            MutationKind::Create => {
                self.remove_live(&entry.current_job_id).await?;
                Ok((None, None))
            }
            MutationKind::Delete => {
                let job = self.scheduler.add(snapshot(&entry.before)?.to_create()).await?;
                let id = job.id.clone();
                Ok((Some(job), Some(id)))
            }
            MutationKind::Update => {
                let patch = snapshot(&entry.before)?.to_patch();
                let job = self.scheduler.update(&entry.current_job_id, patch).await?;
                Ok((Some(job), None))
            }
        }
    }

    async fn replay(&self, entry: &LedgerEntry) -> Result<(Option<Job>, Option<String>)> {
        match entry.kind {
            MutationKind::Create => {
                let job = self.scheduler.add(snapshot(&entry.after)?.to_create()).await?;
                let id = job.id.clone();
                Ok((Some(job), Some(id)))
            }
            MutationKind::Delete => {
                self.remove_live(&entry.current_job_id).await?;
                Ok((None, None))
            }
            MutationKind::Update => {
                let patch = snapshot(&entry.after)?.to_patch();
                let job = self.scheduler.update(&entry.current_job_id, patch).await?;
                Ok((Some(job), None))
            }
        }
    }

    async fn remove_live(&self, id: &str) -> Result<()> {
        if self.scheduler.remove(id).await {
            Ok(())
        } else {
            Err(TickflowError::not_found("job", id))
        }
    }
}

fn snapshot(s: &Option<JobSnapshot>) -> Result<&JobSnapshot> {
    s.as_ref()
        .ok_or_else(|| TickflowError::Validation("ledger entry is missing its snapshot".into()))
}
