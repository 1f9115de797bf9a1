//! Workflow graph store: CRUD for workflows, nodes and edges.
//!
//! Every mutation works on a draft copy of the workflow: the draft is
//! validated (names, ids, edges, acyclicity), companion jobs are synced,
//! and only then is it committed. A rejected call leaves the stored
//! workflow exactly as it was.
//!
//! State is one JSON document `{version: 1, workflows, savedAt}` written
//! with the same atomic replace as the job store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tickflow_core::config::WorkflowConfig;
use tickflow_core::persist::write_json_atomic;
use tickflow_core::{Result, TickflowError};
use tickflow_scheduler::SchedulerService;
use tokio::sync::Mutex;

use crate::graph::validate_edges;
use crate::model::{
    DEFAULT_ORCHESTRATOR_AGENT_ID, Edge, NodeCreate, NodePatch, NodeSchedule, Workflow,
    WorkflowCreate, WorkflowNode, WorkflowPatch,
};
use crate::sync::{remove_node_job, sync_node_job};

/// Current on-disk format version.
pub const WORKFLOW_STORE_VERSION: u32 = 1;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoreFileRef<'a> {
    version: u32,
    workflows: &'a [Workflow],
    saved_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    workflows: Vec<serde_json::Value>,
}

/// Owns all workflows and keeps their companion jobs in sync.
pub struct WorkflowStore {
    path: PathBuf,
    scheduler: SchedulerService,
    default_orchestrator_agent_id: String,
    /// Held across job sync so mutations are applied one at a time.
    workflows: Mutex<Vec<Workflow>>,
}

impl WorkflowStore {
    /// Open the store at `path`, restoring whatever parses.
    pub fn open(path: &Path, scheduler: SchedulerService) -> Self {
        let workflows = load_workflows(path);
        tracing::info!("📂 Loaded {} workflows from {}", workflows.len(), path.display());
        Self {
            path: path.to_path_buf(),
            scheduler,
            default_orchestrator_agent_id: DEFAULT_ORCHESTRATOR_AGENT_ID.to_string(),
            workflows: Mutex::new(workflows),
        }
    }

    pub fn from_config(config: &WorkflowConfig, scheduler: SchedulerService) -> Self {
        let mut store = Self::open(&config.store_path(), scheduler);
        store.default_orchestrator_agent_id = config.default_orchestrator_agent_id.clone();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scheduler(&self) -> &SchedulerService {
        &self.scheduler
    }

    pub async fn list(&self) -> Vec<Workflow> {
        self.workflows.lock().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Workflow> {
        self.workflows.lock().await.iter().find(|w| w.id == id).cloned()
    }

    /// Create a workflow, optionally with an initial graph.
    pub async fn create(&self, input: WorkflowCreate) -> Result<Workflow> {
        let now = tickflow_core::now_ms();
        let name = require_name("workflow", &input.name)?;
        let mut draft = Workflow {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            description: input.description,
            orchestrator_agent_id: input
                .orchestrator_agent_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| self.default_orchestrator_agent_id.clone()),
            enabled: input.enabled.unwrap_or(true),
            version: 1,
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at_ms: now,
            updated_at_ms: now,
        };
        for node in input.nodes {
            let node = build_node(&draft, node, now)?;
            draft.nodes.push(node);
        }
        draft.edges = input.edges;
        validate_edges(&draft.nodes, &draft.edges)?;

        let mut workflows = self.workflows.lock().await;
        self.sync_nodes(&mut draft, None).await?;
        tracing::info!("🧩 Workflow created: '{}' ({})", draft.name, draft.id);
        workflows.push(draft.clone());
        self.persist(&workflows);
        Ok(draft)
    }

    /// Patch workflow-level fields and resync every companion job.
    pub async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<Workflow> {
        let name = patch
            .name
            .as_deref()
            .map(|n| require_name("workflow", n))
            .transpose()?;
        let mut workflows = self.workflows.lock().await;
        let index = find_index(&workflows, id)?;
        let mut draft = workflows[index].clone();

        if let Some(name) = name {
            draft.name = name;
        }
        if let Some(description) = patch.description {
            draft.description = description;
        }
        if let Some(agent_id) = patch.orchestrator_agent_id.filter(|a| !a.trim().is_empty()) {
            draft.orchestrator_agent_id = agent_id;
        }
        if let Some(enabled) = patch.enabled {
            draft.enabled = enabled;
        }

        self.sync_nodes(&mut draft, None).await?;
        self.commit(&mut workflows, index, draft)
    }

    /// Delete a workflow and its companion jobs.
    pub async fn delete(&self, id: &str) -> Result<Workflow> {
        let mut workflows = self.workflows.lock().await;
        let index = find_index(&workflows, id)?;
        let removed = workflows.remove(index);
        for job_id in removed.nodes.iter().filter_map(|n| n.job_id.as_deref()) {
            remove_node_job(&self.scheduler, job_id).await;
        }
        tracing::info!("🗑️ Workflow deleted: '{}' ({})", removed.name, removed.id);
        self.persist(&workflows);
        Ok(removed)
    }

    /// Add a node. Duplicate ids within the workflow are rejected.
    pub async fn add_node(&self, workflow_id: &str, input: NodeCreate) -> Result<WorkflowNode> {
        let now = tickflow_core::now_ms();
        let mut workflows = self.workflows.lock().await;
        let index = find_index(&workflows, workflow_id)?;
        let mut draft = workflows[index].clone();

        let node = build_node(&draft, input, now)?;
        let node_id = node.id.clone();
        draft.nodes.push(node);

        self.sync_nodes(&mut draft, Some(&node_id)).await?;
        let workflow = self.commit(&mut workflows, index, draft)?;
        tracing::debug!("➕ Node '{node_id}' added to workflow {workflow_id}");
        find_node(&workflow, &node_id)
    }

    /// Patch a node and resync its companion job.
    pub async fn update_node(
        &self,
        workflow_id: &str,
        node_id: &str,
        patch: NodePatch,
    ) -> Result<WorkflowNode> {
        let now = tickflow_core::now_ms();
        let name = patch
            .name
            .as_deref()
            .map(|n| require_name("node", n))
            .transpose()?;
        let schedule = patch
            .schedule
            .map(|s| normalize_schedule(s, now))
            .transpose()?;

        let mut workflows = self.workflows.lock().await;
        let index = find_index(&workflows, workflow_id)?;
        let mut draft = workflows[index].clone();
        let node = draft
            .node_mut(node_id)
            .ok_or_else(|| TickflowError::not_found("node", node_id))?;

        if let Some(name) = name {
            node.name = name;
        }
        if let Some(node_type) = patch.node_type {
            node.node_type = node_type;
        }
        if let Some(prompt) = patch.prompt {
            node.prompt = prompt;
        }
        if let Some(agent_id) = patch.agent_id {
            node.agent_id = agent_id;
        }
        if let Some(skill_refs) = patch.skill_refs {
            node.skill_refs = skill_refs;
        }
        if let Some(config) = patch.config {
            node.config = config;
        }
        if let Some(schedule) = schedule {
            node.schedule = schedule;
        }
        if let Some(enabled) = patch.enabled {
            node.enabled = enabled;
        }
        node.updated_at_ms = now;

        self.sync_nodes(&mut draft, Some(node_id)).await?;
        let workflow = self.commit(&mut workflows, index, draft)?;
        find_node(&workflow, node_id)
    }

    /// Remove a node, its edges and its companion job.
    pub async fn remove_node(&self, workflow_id: &str, node_id: &str) -> Result<Workflow> {
        let mut workflows = self.workflows.lock().await;
        let index = find_index(&workflows, workflow_id)?;
        let mut draft = workflows[index].clone();
        let position = draft
            .nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or_else(|| TickflowError::not_found("node", node_id))?;

        let node = draft.nodes.remove(position);
        draft.edges.retain(|e| e.from != node_id && e.to != node_id);
        if let Some(job_id) = &node.job_id {
            remove_node_job(&self.scheduler, job_id).await;
        }
        self.commit(&mut workflows, index, draft)
    }

    /// Replace the whole edge set.
    pub async fn set_edges(&self, workflow_id: &str, edges: Vec<Edge>) -> Result<Workflow> {
        self.mutate_edges(workflow_id, |current| {
            *current = edges;
            Ok(())
        })
        .await
    }

    /// Insert an edge, or replace the condition of an existing `from → to`.
    pub async fn upsert_edge(&self, workflow_id: &str, edge: Edge) -> Result<Workflow> {
        self.mutate_edges(workflow_id, |current| {
            match current.iter_mut().find(|e| e.same_endpoints(&edge.from, &edge.to)) {
                Some(existing) => existing.condition = edge.condition,
                None => current.push(edge),
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_edge(&self, workflow_id: &str, from: &str, to: &str) -> Result<Workflow> {
        self.mutate_edges(workflow_id, |current| {
            let len = current.len();
            current.retain(|e| !e.same_endpoints(from, to));
            if current.len() == len {
                return Err(TickflowError::not_found("edge", &format!("{from} → {to}")));
            }
            Ok(())
        })
        .await
    }

    /// Re-run companion-job sync for every node. Returns how many nodes
    /// changed their job binding.
    pub async fn resync_all(&self) -> usize {
        let mut workflows = self.workflows.lock().await;
        let mut changed = 0;
        for workflow in workflows.iter_mut() {
            for i in 0..workflow.nodes.len() {
                let node = workflow.nodes[i].clone();
                match sync_node_job(&self.scheduler, workflow, &node).await {
                    Ok(job_id) if job_id != node.job_id => {
                        workflow.nodes[i].job_id = job_id;
                        changed += 1;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(
                        "⚠️ Failed to sync node '{}' of workflow {}: {e}",
                        node.id,
                        workflow.id
                    ),
                }
            }
        }
        if changed > 0 {
            tracing::info!("🔄 Resynced {changed} companion jobs");
            self.persist(&workflows);
        }
        changed
    }

    async fn mutate_edges<F>(&self, workflow_id: &str, f: F) -> Result<Workflow>
    where
        F: FnOnce(&mut Vec<Edge>) -> Result<()>,
    {
        let mut workflows = self.workflows.lock().await;
        let index = find_index(&workflows, workflow_id)?;
        let mut draft = workflows[index].clone();
        f(&mut draft.edges)?;
        validate_edges(&draft.nodes, &draft.edges)?;
        self.commit(&mut workflows, index, draft)
    }

    /// Sync one node (or all) of the draft, recording the new job ids.
    async fn sync_nodes(&self, draft: &mut Workflow, only: Option<&str>) -> Result<()> {
        for i in 0..draft.nodes.len() {
            if only.is_some_and(|id| draft.nodes[i].id != id) {
                continue;
            }
            let node = draft.nodes[i].clone();
            draft.nodes[i].job_id = sync_node_job(&self.scheduler, draft, &node).await?;
        }
        Ok(())
    }

    fn commit(&self, workflows: &mut [Workflow], index: usize, mut draft: Workflow) -> Result<Workflow> {
        validate_edges(&draft.nodes, &draft.edges)?;
        draft.version += 1;
        draft.updated_at_ms = tickflow_core::now_ms();
        workflows[index] = draft.clone();
        self.persist(workflows);
        Ok(draft)
    }

    fn persist(&self, workflows: &[Workflow]) {
        let file = StoreFileRef {
            version: WORKFLOW_STORE_VERSION,
            workflows,
            saved_at: Utc::now(),
        };
        if let Err(e) = write_json_atomic(&self.path, &file) {
            tracing::warn!("⚠️ Failed to save workflows: {e}");
        }
    }
}

fn load_workflows(path: &Path) -> Vec<Workflow> {
    if !path.exists() {
        return Vec::new();
    }
    let file = match std::fs::read_to_string(path)
        .map_err(TickflowError::from)
        .and_then(|json| serde_json::from_str::<StoreFile>(&json).map_err(TickflowError::from))
    {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!("⚠️ Failed to read {}: {e}", path.display());
            return Vec::new();
        }
    };
    if file.version != WORKFLOW_STORE_VERSION {
        tracing::warn!(
            "⚠️ Ignoring {} with unsupported version {}",
            path.display(),
            file.version
        );
        return Vec::new();
    }

    let mut seen = HashSet::new();
    file.workflows
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Workflow>(value) {
            Ok(workflow) => Some(workflow),
            Err(e) => {
                tracing::warn!("⚠️ Skipping malformed workflow: {e}");
                None
            }
        })
        .filter(|workflow| match validate_edges(&workflow.nodes, &workflow.edges) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("⚠️ Skipping workflow {}: {e}", workflow.id);
                false
            }
        })
        .filter(|workflow| seen.insert(workflow.id.clone()))
        .collect()
}

fn require_name(what: &str, name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TickflowError::Validation(format!("{what} name is required")));
    }
    Ok(trimmed.to_string())
}

fn find_index(workflows: &[Workflow], id: &str) -> Result<usize> {
    workflows
        .iter()
        .position(|w| w.id == id)
        .ok_or_else(|| TickflowError::not_found("workflow", id))
}

fn find_node(workflow: &Workflow, node_id: &str) -> Result<WorkflowNode> {
    workflow
        .node(node_id)
        .cloned()
        .ok_or_else(|| TickflowError::not_found("node", node_id))
}

/// Validate a node schedule and pin an `every` anchor so the companion
/// job keeps the same grid across resyncs.
fn normalize_schedule(schedule: NodeSchedule, now_ms: i64) -> Result<NodeSchedule> {
    if let Some(job_schedule) = schedule.to_job_schedule() {
        job_schedule.validate()?;
    }
    Ok(match schedule {
        NodeSchedule::Every {
            every_ms,
            anchor_ms: None,
        } => NodeSchedule::Every {
            every_ms,
            anchor_ms: Some(now_ms),
        },
        other => other,
    })
}

fn build_node(workflow: &Workflow, input: NodeCreate, now_ms: i64) -> Result<WorkflowNode> {
    let name = require_name("node", &input.name)?;
    let id = match input.id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    };
    if workflow.node(&id).is_some() {
        return Err(TickflowError::Validation(format!(
            "node id '{id}' already exists in workflow"
        )));
    }
    Ok(WorkflowNode {
        id,
        name,
        node_type: input.node_type,
        prompt: input.prompt,
        agent_id: input.agent_id,
        skill_refs: input.skill_refs,
        config: input.config,
        schedule: normalize_schedule(input.schedule, now_ms)?,
        enabled: input.enabled.unwrap_or(true),
        job_id: None,
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
    })
}
