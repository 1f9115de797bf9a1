//! Node ↔ companion-job synchronization.
//!
//! Time-scheduled nodes are mirrored into the scheduler as agent jobs.
//! `node.job_id` is only a cache: a stale id falls through to a fresh job.

use tickflow_core::Result;
use tickflow_scheduler::{JobCreate, JobPatch, JobPayload, SchedulerService};

use crate::model::{Workflow, WorkflowNode};

/// Scheduler-facing name of a node's companion job.
pub fn companion_job_name(workflow: &Workflow, node: &WorkflowNode) -> String {
    format!("workflow:{}/{}", workflow.name, node.name)
}

/// Instruction handed to the agent runtime when the node fires.
pub fn node_instruction(workflow: &Workflow, node: &WorkflowNode) -> String {
    if let Some(prompt) = node.prompt.as_deref().map(str::trim)
        && !prompt.is_empty()
    {
        return prompt.to_string();
    }
    let mut instruction = format!(
        "Run the {} node \"{}\" of workflow \"{}\".",
        node.node_type, node.name, workflow.name
    );
    if !node.skill_refs.is_empty() {
        instruction.push_str(&format!(" Preferred skills: {}.", node.skill_refs.join(", ")));
    }
    instruction
}

/// Agent that runs the node: its own, else the workflow orchestrator.
pub fn node_agent_id(workflow: &Workflow, node: &WorkflowNode) -> String {
    node.agent_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| workflow.orchestrator_agent_id.clone())
}

/// Bring the node's companion job in line with the node.
///
/// Returns the job id the node should now carry (`None` for manual and
/// dependency nodes).
pub async fn sync_node_job(
    scheduler: &SchedulerService,
    workflow: &Workflow,
    node: &WorkflowNode,
) -> Result<Option<String>> {
    let Some(schedule) = node.schedule.to_job_schedule() else {
        if let Some(job_id) = &node.job_id {
            remove_node_job(scheduler, job_id).await;
        }
        return Ok(None);
    };

    let name = companion_job_name(workflow, node);
    let description = Some(format!("Workflow {} node {}", workflow.id, node.id));
    let enabled = workflow.enabled && node.enabled;
    let payload = JobPayload::Agent {
        message: node_instruction(workflow, node),
        agent_id: Some(node_agent_id(workflow, node)),
        timeout_seconds: None,
    };

    if let Some(job_id) = &node.job_id {
        let patch = JobPatch {
            name: Some(name.clone()),
            description: Some(description.clone()),
            enabled: Some(enabled),
            delete_after_run: Some(false),
            schedule: Some(schedule.clone()),
            payload: Some(payload.clone()),
        };
        match scheduler.update(job_id, patch).await {
            Ok(job) => return Ok(Some(job.id)),
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    "⚠️ Companion job {job_id} for node '{}' is gone, recreating",
                    node.id
                );
            }
            Err(e) => return Err(e),
        }
    }

    let job = scheduler
        .add(JobCreate {
            name,
            description,
            enabled: Some(enabled),
            delete_after_run: Some(false),
            schedule,
            payload,
        })
        .await?;
    tracing::debug!("🔗 Node '{}' bound to job {}", node.id, job.id);
    Ok(Some(job.id))
}

/// Best-effort removal; the job may already be gone.
pub async fn remove_node_job(scheduler: &SchedulerService, job_id: &str) {
    if !scheduler.remove(job_id).await {
        tracing::debug!("Companion job {job_id} was already removed");
    }
}
