//! Workflow orchestrator: dependency-ordered runs of a workflow graph.
//!
//! ## Flow
//! ```text
//! start(workflow)
//!   → snapshot graph, all nodes pending
//!   → resolve: ready nodes → running, dead branches → blocked
//!   → NodeLauncher.start_node_run() for every ready node (concurrently)
//! report_node_result(node)
//!   → completed / failed → resolve again → launch newly ready nodes
//! no node pending or running → record is terminal
//! ```
//!
//! Edge rule: a node waits until every incoming edge is resolved. It runs
//! only when every edge is satisfied (source completed and condition
//! true). Otherwise it is blocked: by failure when any source failed, was
//! cancelled or was itself blocked by failure, else as skipped (bypassed).
//!
//! Each record has its own mutex, so two completions racing on the same
//! run can never launch the same downstream node twice. The lock is never
//! held while a launch is in flight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tickflow_core::config::WorkflowConfig;
use tickflow_core::{Result, TickflowError};
use tokio::sync::{Mutex, watch};

use crate::condition::{ConditionEvaluator, DefaultConditionEvaluator};
use crate::graph::{incoming, roots};
use crate::model::{Workflow, WorkflowNode};
use crate::store::WorkflowStore;

/// Identifiers of a launched node run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRunHandle {
    pub node_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub agent_id: String,
}

/// Launches the real work for a node. Failures mark the node `failed`.
#[async_trait]
pub trait NodeLauncher: Send + Sync {
    async fn start_node_run(&self, workflow: &Workflow, node: &WorkflowNode) -> Result<NodeRunHandle>;
}

/// Outcome reported back for a running node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NodeResult {
    Completed {
        #[serde(default)]
        output: Value,
    },
    Failed {
        error: String,
    },
}

impl NodeResult {
    pub fn completed(output: Value) -> Self {
        Self::Completed { output }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRunStatus {
    Pending,
    Running,
    Completed,
    Blocked,
    Failed,
    Cancelled,
}

impl NodeRunStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OrchestrationStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// What to do when `start()` is called while a run of the same workflow
/// is still in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Fail the second `start()` with a validation error.
    #[default]
    Reject,
    /// Run it as an independent record.
    Concurrent,
}

/// Per-run options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationOptions {
    /// Nodes to launch first. Empty means every node without incoming edges.
    #[serde(default)]
    pub entry_node_ids: Vec<String>,
    /// Nodes treated as already completed (resume a partial run).
    #[serde(default)]
    pub completed_node_ids: Vec<String>,
}

/// Per-node state inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRunState {
    pub node_id: String,
    pub status: NodeRunStatus,
    /// Blocked because its branch was bypassed, not because of a failure.
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<i64>,
}

impl NodeRunState {
    fn pending(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            status: NodeRunStatus::Pending,
            skipped: false,
            run_id: None,
            job_id: None,
            agent_id: None,
            output: None,
            error: None,
            started_at_ms: None,
            completed_at_ms: None,
        }
    }
}

/// One orchestration run. Kept in memory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRecord {
    pub id: String,
    pub workflow_id: String,
    pub workflow_version: u64,
    pub status: OrchestrationStatus,
    pub launched: usize,
    pub skipped: usize,
    pub nodes: Vec<NodeRunState>,
    pub options: OrchestrationOptions,
    pub started_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<i64>,
}

impl OrchestrationRecord {
    pub fn node(&self, node_id: &str) -> Option<&NodeRunState> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeRunState> {
        self.nodes.iter_mut().find(|n| n.node_id == node_id)
    }

    fn status_of(&self, node_id: &str) -> Option<NodeRunStatus> {
        self.node(node_id).map(|n| n.status)
    }
}

struct RunSlot {
    id: String,
    workflow: Workflow,
    entries: HashSet<String>,
    record: Mutex<OrchestrationRecord>,
    done: watch::Sender<bool>,
}

/// Drives orchestration runs against a [`WorkflowStore`].
pub struct WorkflowOrchestrator {
    store: Arc<WorkflowStore>,
    launcher: Arc<dyn NodeLauncher>,
    evaluator: Arc<dyn ConditionEvaluator>,
    overlap: OverlapPolicy,
    max_records: usize,
    runs: Mutex<Vec<Arc<RunSlot>>>,
}

enum Decision {
    Wait,
    Run,
    Block { skipped: bool },
}

impl WorkflowOrchestrator {
    pub fn new(store: Arc<WorkflowStore>, launcher: Arc<dyn NodeLauncher>) -> Self {
        Self {
            store,
            launcher,
            evaluator: Arc::new(DefaultConditionEvaluator),
            overlap: OverlapPolicy::default(),
            max_records: WorkflowConfig::default().max_orchestration_records,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_overlap_policy(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    /// Start a run: launch entry nodes and return the record.
    pub async fn start(
        &self,
        workflow_id: &str,
        options: OrchestrationOptions,
    ) -> Result<OrchestrationRecord> {
        let workflow = self
            .store
            .get(workflow_id)
            .await
            .ok_or_else(|| TickflowError::not_found("workflow", workflow_id))?;
        if !workflow.enabled {
            return Err(TickflowError::Validation(format!(
                "workflow '{}' is disabled",
                workflow.name
            )));
        }
        if workflow.nodes.is_empty() {
            return Err(TickflowError::Validation(format!(
                "workflow '{}' has no nodes",
                workflow.name
            )));
        }
        for id in options.entry_node_ids.iter().chain(&options.completed_node_ids) {
            if workflow.node(id).is_none() {
                return Err(TickflowError::not_found("node", id));
            }
        }

        let slot = {
            let mut runs = self.runs.lock().await;
            if self.overlap == OverlapPolicy::Reject {
                for other in runs.iter().filter(|s| s.workflow.id == workflow.id) {
                    if !other.record.lock().await.status.is_terminal() {
                        return Err(TickflowError::Validation(format!(
                            "workflow '{}' already has run {} in flight",
                            workflow.name, other.id
                        )));
                    }
                }
            }
            let slot = Arc::new(new_slot(workflow, options));
            runs.push(Arc::clone(&slot));
            prune(&mut runs, self.max_records).await;
            slot
        };
        tracing::info!(
            "🚀 Orchestration {} started for workflow '{}'",
            slot.id,
            slot.workflow.name
        );

        self.advance(&slot).await;
        Ok(slot.record.lock().await.clone())
    }

    /// Record the outcome of a running node and launch what it unblocks.
    pub async fn report_node_result(
        &self,
        orchestration_id: &str,
        node_id: &str,
        result: NodeResult,
    ) -> Result<OrchestrationRecord> {
        let slot = self.slot(orchestration_id).await?;
        {
            let mut record = slot.record.lock().await;
            let node = record
                .node_mut(node_id)
                .ok_or_else(|| TickflowError::not_found("node", node_id))?;
            if node.status != NodeRunStatus::Running {
                return Err(TickflowError::Validation(format!(
                    "node '{node_id}' is not running"
                )));
            }
            node.completed_at_ms = Some(tickflow_core::now_ms());
            match result {
                NodeResult::Completed { output } => {
                    node.status = NodeRunStatus::Completed;
                    node.output = Some(output);
                    tracing::debug!("✅ Node '{node_id}' completed in {orchestration_id}");
                }
                NodeResult::Failed { error } => {
                    tracing::warn!("❌ Node '{node_id}' failed in {orchestration_id}: {error}");
                    node.status = NodeRunStatus::Failed;
                    node.error = Some(error);
                }
            }
            if record.status == OrchestrationStatus::Cancelled {
                return Ok(record.clone());
            }
        }

        self.advance(&slot).await;
        Ok(slot.record.lock().await.clone())
    }

    /// Cancel pending nodes. Running launches are left alone.
    pub async fn cancel(&self, orchestration_id: &str) -> Result<OrchestrationRecord> {
        let slot = self.slot(orchestration_id).await?;
        let mut record = slot.record.lock().await;
        if record.status.is_terminal() {
            return Ok(record.clone());
        }
        let now = tickflow_core::now_ms();
        for node in record.nodes.iter_mut() {
            if node.status == NodeRunStatus::Pending {
                node.status = NodeRunStatus::Cancelled;
                node.completed_at_ms = Some(now);
            }
        }
        record.status = OrchestrationStatus::Cancelled;
        record.completed_at_ms = Some(now);
        slot.done.send_replace(true);
        tracing::info!("🛑 Orchestration {orchestration_id} cancelled");
        Ok(record.clone())
    }

    pub async fn get(&self, orchestration_id: &str) -> Option<OrchestrationRecord> {
        let slot = self.slot(orchestration_id).await.ok()?;
        let record = slot.record.lock().await.clone();
        Some(record)
    }

    /// Records for one workflow (or all), oldest first.
    pub async fn list(&self, workflow_id: Option<&str>) -> Vec<OrchestrationRecord> {
        let slots: Vec<Arc<RunSlot>> = self.runs.lock().await.clone();
        let mut records = Vec::new();
        for slot in slots
            .iter()
            .filter(|s| workflow_id.is_none_or(|id| s.workflow.id == id))
        {
            records.push(slot.record.lock().await.clone());
        }
        records
    }

    /// Wait until the run is terminal or `timeout` elapses, then return
    /// the record as it stands.
    pub async fn wait(&self, orchestration_id: &str, timeout: Duration) -> Result<OrchestrationRecord> {
        let slot = self.slot(orchestration_id).await?;
        let mut done = slot.done.subscribe();
        if tokio::time::timeout(timeout, done.wait_for(|finished| *finished))
            .await
            .is_err()
        {
            tracing::debug!("⏳ Wait on {orchestration_id} timed out");
        }
        Ok(slot.record.lock().await.clone())
    }

    async fn slot(&self, orchestration_id: &str) -> Result<Arc<RunSlot>> {
        self.runs
            .lock()
            .await
            .iter()
            .find(|s| s.id == orchestration_id)
            .cloned()
            .ok_or_else(|| TickflowError::not_found("orchestration", orchestration_id))
    }

    /// Resolve and launch until nothing new becomes ready.
    async fn advance(&self, slot: &RunSlot) {
        loop {
            let ready = {
                let mut record = slot.record.lock().await;
                if record.status.is_terminal() {
                    return;
                }
                let ready = resolve(&slot.workflow, &mut record, &slot.entries, self.evaluator.as_ref());
                if ready.is_empty() {
                    finish_if_settled(slot, &mut record);
                    return;
                }
                ready
            };

            let launches = ready.iter().filter_map(|id| slot.workflow.node(id)).map(|node| async move {
                (node.id.clone(), self.launcher.start_node_run(&slot.workflow, node).await)
            });
            let results = join_all(launches).await;

            let mut record = slot.record.lock().await;
            for (node_id, result) in results {
                let Some(node) = record.node_mut(&node_id) else {
                    continue;
                };
                match result {
                    Ok(handle) => {
                        node.run_id = Some(handle.run_id);
                        node.job_id = handle.job_id;
                        node.agent_id = Some(handle.agent_id);
                        record.launched += 1;
                        tracing::info!("▶️ Node '{node_id}' launched in {}", slot.id);
                    }
                    Err(e) => {
                        tracing::warn!("❌ Node '{node_id}' failed to launch in {}: {e}", slot.id);
                        if node.status == NodeRunStatus::Running {
                            node.status = NodeRunStatus::Failed;
                            node.error = Some(e.to_string());
                            node.completed_at_ms = Some(tickflow_core::now_ms());
                        }
                    }
                }
            }
        }
    }
}

fn new_slot(workflow: Workflow, options: OrchestrationOptions) -> RunSlot {
    let now = tickflow_core::now_ms();
    let id = uuid::Uuid::new_v4().to_string();
    let entries: HashSet<String> = options.entry_node_ids.iter().cloned().collect();
    let completed: HashSet<String> = options.completed_node_ids.iter().cloned().collect();
    let root_ids: HashSet<&str> = roots(&workflow.nodes, &workflow.edges)
        .into_iter()
        .map(|n| n.id.as_str())
        .collect();

    let mut record = OrchestrationRecord {
        id: id.clone(),
        workflow_id: workflow.id.clone(),
        workflow_version: workflow.version,
        status: OrchestrationStatus::Running,
        launched: 0,
        skipped: 0,
        nodes: Vec::with_capacity(workflow.nodes.len()),
        options,
        started_at_ms: now,
        completed_at_ms: None,
    };
    for node in &workflow.nodes {
        let mut state = NodeRunState::pending(&node.id);
        if completed.contains(&node.id) {
            state.status = NodeRunStatus::Completed;
            state.output = Some(Value::Null);
            state.completed_at_ms = Some(now);
        } else if !node.enabled
            || (!entries.is_empty()
                && root_ids.contains(node.id.as_str())
                && !entries.contains(&node.id))
        {
            state.status = NodeRunStatus::Blocked;
            state.skipped = true;
            state.completed_at_ms = Some(now);
            record.skipped += 1;
        }
        record.nodes.push(state);
    }

    let (done, _) = watch::channel(false);
    RunSlot {
        id,
        workflow,
        entries,
        record: Mutex::new(record),
        done,
    }
}

/// Mark every newly ready node running and cascade blocked/bypassed
/// states. Returns the ids to launch.
fn resolve(
    workflow: &Workflow,
    record: &mut OrchestrationRecord,
    entries: &HashSet<String>,
    evaluator: &dyn ConditionEvaluator,
) -> Vec<String> {
    let now = tickflow_core::now_ms();
    let mut ready = Vec::new();
    loop {
        let mut changed = false;
        for node in &workflow.nodes {
            if record.status_of(&node.id) != Some(NodeRunStatus::Pending) {
                continue;
            }
            let decision = if entries.contains(&node.id) {
                Decision::Run
            } else {
                decide(workflow, record, node, evaluator)
            };
            let Some(state) = record.node_mut(&node.id) else {
                continue;
            };
            match decision {
                Decision::Wait => continue,
                Decision::Run => {
                    state.status = NodeRunStatus::Running;
                    state.started_at_ms = Some(now);
                    ready.push(node.id.clone());
                }
                Decision::Block { skipped } => {
                    state.status = NodeRunStatus::Blocked;
                    state.skipped = skipped;
                    state.completed_at_ms = Some(now);
                    if skipped {
                        record.skipped += 1;
                    }
                    tracing::debug!("⛔ Node '{}' blocked (skipped: {skipped})", node.id);
                }
            }
            changed = true;
        }
        if !changed {
            return ready;
        }
    }
}

fn decide(
    workflow: &Workflow,
    record: &OrchestrationRecord,
    node: &WorkflowNode,
    evaluator: &dyn ConditionEvaluator,
) -> Decision {
    let edges = incoming(&workflow.edges, &node.id);
    if edges.is_empty() {
        return Decision::Run;
    }
    let mut satisfied = true;
    let mut failed_upstream = false;
    for edge in edges {
        let Some(source) = record.node(&edge.from) else {
            continue;
        };
        match source.status {
            NodeRunStatus::Pending | NodeRunStatus::Running => return Decision::Wait,
            NodeRunStatus::Completed => {
                let output = source.output.as_ref().unwrap_or(&Value::Null);
                if let Some(condition) = edge.condition.as_deref()
                    && !evaluator.evaluate(condition, output)
                {
                    satisfied = false;
                }
            }
            NodeRunStatus::Failed | NodeRunStatus::Cancelled => {
                satisfied = false;
                failed_upstream = true;
            }
            NodeRunStatus::Blocked => {
                satisfied = false;
                failed_upstream |= !source.skipped;
            }
        }
    }
    if satisfied {
        Decision::Run
    } else {
        Decision::Block {
            skipped: !failed_upstream,
        }
    }
}

fn finish_if_settled(slot: &RunSlot, record: &mut OrchestrationRecord) {
    if record.nodes.iter().any(|n| n.status.is_active()) {
        return;
    }
    let failed = record.nodes.iter().any(|n| n.status == NodeRunStatus::Failed);
    record.status = if failed {
        OrchestrationStatus::Failed
    } else {
        OrchestrationStatus::Completed
    };
    record.completed_at_ms = Some(tickflow_core::now_ms());
    slot.done.send_replace(true);
    tracing::info!(
        "🏁 Orchestration {} finished: {:?} (launched {}, skipped {})",
        record.id,
        record.status,
        record.launched,
        record.skipped
    );
}

/// Evict the oldest terminal records beyond `max`.
async fn prune(runs: &mut Vec<Arc<RunSlot>>, max: usize) {
    let mut excess = runs.len().saturating_sub(max);
    let mut i = 0;
    while excess > 0 && i < runs.len() {
        if runs[i].record.lock().await.status.is_terminal() {
            runs.remove(i);
            excess -= 1;
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, NodeCreate, NodeSchedule, NodeType, WorkflowCreate};
    use std::sync::Mutex as StdMutex;
    use tickflow_scheduler::{ExecutionOutcome, SchedulerOptions, SchedulerService, executor_fn};

    /// Records launches; fails nodes whose id starts with `bad`.
    #[derive(Default)]
    struct FakeLauncher {
        launched: StdMutex<Vec<String>>,
    }

    impl FakeLauncher {
        fn launched(&self) -> Vec<String> {
            self.launched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeLauncher for FakeLauncher {
        async fn start_node_run(&self, workflow: &Workflow, node: &WorkflowNode) -> Result<NodeRunHandle> {
            if node.id.starts_with("bad") {
                return Err(TickflowError::Validation("launcher refused".into()));
            }
            self.launched.lock().unwrap().push(node.id.clone());
            Ok(NodeRunHandle {
                node_id: node.id.clone(),
                run_id: format!("run-{}", node.id),
                job_id: node.job_id.clone(),
                agent_id: workflow.orchestrator_agent_id.clone(),
            })
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<WorkflowStore>,
        launcher: Arc<FakeLauncher>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut options = SchedulerOptions::new(dir.path().join("jobs.json"));
            options.persist_debounce = Duration::ZERO;
            let scheduler =
                SchedulerService::new(options, executor_fn(|_job| async { ExecutionOutcome::ok() }));
            let store = Arc::new(WorkflowStore::open(&dir.path().join("workflows.json"), scheduler));
            Self {
                _dir: dir,
                store,
                launcher: Arc::new(FakeLauncher::default()),
            }
        }

        fn orchestrator(&self) -> WorkflowOrchestrator {
            WorkflowOrchestrator::new(Arc::clone(&self.store), self.launcher.clone())
        }

        async fn workflow(&self, nodes: &[(&str, NodeType)], edges: Vec<Edge>) -> Workflow {
            let mut input = WorkflowCreate::new("flow");
            for (id, node_type) in nodes {
                input.nodes.push(
                    NodeCreate::new(id, &id.to_uppercase(), *node_type)
                        .with_schedule(NodeSchedule::Dependency),
                );
            }
            input.edges = edges;
            self.store.create(input).await.unwrap()
        }
    }

    fn status(record: &OrchestrationRecord, node_id: &str) -> NodeRunStatus {
        record.node(node_id).unwrap().status
    }

    #[tokio::test]
    async fn test_dependency_chain_unblocks_in_order() {
        let h = Harness::new();
        let wf = h
            .workflow(
                &[("a", NodeType::Trigger), ("b", NodeType::AgentTask)],
                vec![Edge::new("a", "b")],
            )
            .await;
        let orchestrator = h.orchestrator();

        let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();
        assert_eq!(status(&record, "a"), NodeRunStatus::Running);
        assert_eq!(status(&record, "b"), NodeRunStatus::Pending);
        assert_eq!(record.node("a").unwrap().run_id.as_deref(), Some("run-a"));
        assert_eq!(h.launcher.launched(), vec!["a"]);

        let record = orchestrator
            .report_node_result(&record.id, "a", NodeResult::completed(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(status(&record, "a"), NodeRunStatus::Completed);
        assert_eq!(status(&record, "b"), NodeRunStatus::Running);

        let record = orchestrator
            .report_node_result(&record.id, "b", NodeResult::completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(record.status, OrchestrationStatus::Completed);
        assert_eq!(record.launched, 2);
        assert_eq!(record.skipped, 0);
        assert!(record.completed_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_siblings_launch_together_and_join_waits() {
        let h = Harness::new();
        let wf = h
            .workflow(
                &[
                    ("root", NodeType::Trigger),
                    ("left", NodeType::AgentTask),
                    ("right", NodeType::AgentTask),
                    ("join", NodeType::AgentTask),
                ],
                vec![
                    Edge::new("root", "left"),
                    Edge::new("root", "right"),
                    Edge::new("left", "join"),
                    Edge::new("right", "join"),
                ],
            )
            .await;
        let orchestrator = h.orchestrator();
        let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();
        let id = record.id.clone();

        let record = orchestrator
            .report_node_result(&id, "root", NodeResult::completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(status(&record, "left"), NodeRunStatus::Running);
        assert_eq!(status(&record, "right"), NodeRunStatus::Running);

        let record = orchestrator
            .report_node_result(&id, "left", NodeResult::completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(status(&record, "join"), NodeRunStatus::Pending);

        let record = orchestrator
            .report_node_result(&id, "right", NodeResult::completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(status(&record, "join"), NodeRunStatus::Running);
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents() {
        let h = Harness::new();
        let wf = h
            .workflow(
                &[("a", NodeType::Trigger), ("b", NodeType::AgentTask), ("c", NodeType::AgentTask)],
                vec![Edge::new("a", "b"), Edge::new("b", "c")],
            )
            .await;
        let orchestrator = h.orchestrator();
        let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();

        let record = orchestrator
            .report_node_result(&record.id, "a", NodeResult::failed("timeout"))
            .await
            .unwrap();
        assert_eq!(status(&record, "b"), NodeRunStatus::Blocked);
        assert_eq!(status(&record, "c"), NodeRunStatus::Blocked);
        assert!(!record.node("c").unwrap().skipped);
        assert_eq!(record.status, OrchestrationStatus::Failed);
        assert_eq!(record.node("a").unwrap().error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_false_condition_bypasses_branch() {
        let h = Harness::new();
        let wf = h
            .workflow(
                &[
                    ("gate", NodeType::ApprovalGate),
                    ("ship", NodeType::AgentTask),
                    ("notify", NodeType::AgentTask),
                    ("after_ship", NodeType::AgentTask),
                ],
                vec![
                    Edge::new("gate", "ship").when("approved"),
                    Edge::new("gate", "notify").when("!approved"),
                    Edge::new("ship", "after_ship"),
                ],
            )
            .await;
        let orchestrator = h.orchestrator();
        let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();

        let record = orchestrator
            .report_node_result(
                &record.id,
                "gate",
                NodeResult::completed(serde_json::json!({"approved": false})),
            )
            .await
            .unwrap();
        assert_eq!(status(&record, "notify"), NodeRunStatus::Running);
        assert_eq!(status(&record, "ship"), NodeRunStatus::Blocked);
        assert_eq!(status(&record, "after_ship"), NodeRunStatus::Blocked);
        assert!(record.node("after_ship").unwrap().skipped);
        assert_eq!(record.skipped, 2);

        let record = orchestrator
            .report_node_result(&record.id, "notify", NodeResult::completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(record.status, OrchestrationStatus::Completed);
        assert_eq!(record.launched, 2);
    }

    #[tokio::test]
    async fn test_join_needs_every_condition() {
        let h = Harness::new();
        let wf = h
            .workflow(
                &[("a", NodeType::Trigger), ("b", NodeType::Trigger), ("c", NodeType::AgentTask)],
                vec![Edge::new("a", "c").when("approved"), Edge::new("b", "c")],
            )
            .await;
        let orchestrator = h.orchestrator();
        let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();
        let id = record.id.clone();

        orchestrator
            .report_node_result(&id, "a", NodeResult::completed(serde_json::json!({"approved": false})))
            .await
            .unwrap();
        let record = orchestrator
            .report_node_result(&id, "b", NodeResult::completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(status(&record, "c"), NodeRunStatus::Blocked);
        assert!(record.node("c").unwrap().skipped);
        assert_eq!(record.skipped, 1);
        assert_eq!(record.status, OrchestrationStatus::Completed);
        assert_eq!(h.launcher.launched(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_join_with_failed_source_is_blocked() {
        let h = Harness::new();
        let wf = h
            .workflow(
                &[("a", NodeType::Trigger), ("b", NodeType::Trigger), ("c", NodeType::AgentTask)],
                vec![Edge::new("a", "c"), Edge::new("b", "c")],
            )
            .await;
        let orchestrator = h.orchestrator();
        let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();
        let id = record.id.clone();

        let record = orchestrator
            .report_node_result(&id, "a", NodeResult::failed("boom"))
            .await
            .unwrap();
        assert_eq!(status(&record, "c"), NodeRunStatus::Pending);

        let record = orchestrator
            .report_node_result(&id, "b", NodeResult::completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(status(&record, "c"), NodeRunStatus::Blocked);
        assert!(!record.node("c").unwrap().skipped);
        assert_eq!(record.skipped, 0);
        assert_eq!(record.status, OrchestrationStatus::Failed);
        assert!(!h.launcher.launched().contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn test_launch_failure_marks_node_failed() {
        let h = Harness::new();
        let wf = h
            .workflow(
                &[("bad_start", NodeType::Trigger), ("next", NodeType::AgentTask)],
                vec![Edge::new("bad_start", "next")],
            )
            .await;
        let record = h
            .orchestrator()
            .start(&wf.id, OrchestrationOptions::default())
            .await
            .unwrap();
        assert_eq!(status(&record, "bad_start"), NodeRunStatus::Failed);
        assert_eq!(status(&record, "next"), NodeRunStatus::Blocked);
        assert_eq!(record.status, OrchestrationStatus::Failed);
        assert_eq!(record.launched, 0);
    }

    #[tokio::test]
    async fn test_disabled_node_is_skipped() {
        let h = Harness::new();
        let wf = h
            .workflow(
                &[("a", NodeType::Trigger), ("b", NodeType::AgentTask), ("c", NodeType::AgentTask)],
                vec![Edge::new("a", "b"), Edge::new("b", "c")],
            )
            .await;
        let patch = crate::model::NodePatch {
            enabled: Some(false),
            ..Default::default()
        };
        h.store.update_node(&wf.id, "b", patch).await.unwrap();

        let orchestrator = h.orchestrator();
        let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();
        let record = orchestrator
            .report_node_result(&record.id, "a", NodeResult::completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(status(&record, "b"), NodeRunStatus::Blocked);
        assert_eq!(status(&record, "c"), NodeRunStatus::Blocked);
        assert_eq!(record.skipped, 2);
        assert_eq!(record.status, OrchestrationStatus::Completed);
    }

    #[tokio::test]
    async fn test_entry_and_completed_options() {
        let h = Harness::new();
        let wf = h
            .workflow(
                &[("a", NodeType::Trigger), ("b", NodeType::AgentTask), ("c", NodeType::AgentTask)],
                vec![Edge::new("a", "b"), Edge::new("b", "c")],
            )
            .await;
        let orchestrator = h.orchestrator();

        let options = OrchestrationOptions {
            entry_node_ids: vec!["b".into()],
            ..Default::default()
        };
        let record = orchestrator.start(&wf.id, options).await.unwrap();
        assert_eq!(status(&record, "a"), NodeRunStatus::Blocked);
        assert_eq!(status(&record, "b"), NodeRunStatus::Running);
        orchestrator.cancel(&record.id).await.unwrap();

        let options = OrchestrationOptions {
            completed_node_ids: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let record = orchestrator.start(&wf.id, options).await.unwrap();
        assert_eq!(status(&record, "c"), NodeRunStatus::Running);

        let err = orchestrator
            .start(
                &wf.id,
                OrchestrationOptions {
                    entry_node_ids: vec!["ghost".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_overlap_policy() {
        let h = Harness::new();
        let wf = h.workflow(&[("a", NodeType::Trigger)], Vec::new()).await;

        let orchestrator = h.orchestrator();
        orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();
        let err = orchestrator
            .start(&wf.id, OrchestrationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TickflowError::Validation(_)));

        let concurrent = h.orchestrator().with_overlap_policy(OverlapPolicy::Concurrent);
        concurrent.start(&wf.id, OrchestrationOptions::default()).await.unwrap();
        concurrent.start(&wf.id, OrchestrationOptions::default()).await.unwrap();
        assert_eq!(concurrent.list(Some(&wf.id)).await.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_leaves_running_nodes() {
        let h = Harness::new();
        let wf = h
            .workflow(
                &[("a", NodeType::Trigger), ("b", NodeType::AgentTask)],
                vec![Edge::new("a", "b")],
            )
            .await;
        let orchestrator = h.orchestrator();
        let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();

        let record = orchestrator.cancel(&record.id).await.unwrap();
        assert_eq!(record.status, OrchestrationStatus::Cancelled);
        assert_eq!(status(&record, "a"), NodeRunStatus::Running);
        assert_eq!(status(&record, "b"), NodeRunStatus::Cancelled);

        // A late completion is recorded but launches nothing.
        let record = orchestrator
            .report_node_result(&record.id, "a", NodeResult::completed(Value::Null))
            .await
            .unwrap();
        assert_eq!(status(&record, "a"), NodeRunStatus::Completed);
        assert_eq!(status(&record, "b"), NodeRunStatus::Cancelled);
        assert_eq!(h.launcher.launched(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_wait_resolves_on_completion_and_times_out() {
        let h = Harness::new();
        let wf = h.workflow(&[("a", NodeType::Trigger)], Vec::new()).await;
        let orchestrator = Arc::new(h.orchestrator());
        let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();

        let pending = orchestrator.wait(&record.id, Duration::from_millis(20)).await.unwrap();
        assert_eq!(pending.status, OrchestrationStatus::Running);

        let reporter = Arc::clone(&orchestrator);
        let id = record.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            reporter
                .report_node_result(&id, "a", NodeResult::completed(Value::Null))
                .await
                .unwrap();
        });
        let done = orchestrator.wait(&record.id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(done.status, OrchestrationStatus::Completed);
    }

    #[tokio::test]
    async fn test_report_errors_and_lookup() {
        let h = Harness::new();
        let wf = h.workflow(&[("a", NodeType::Trigger)], Vec::new()).await;
        let orchestrator = h.orchestrator();
        let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();

        assert!(orchestrator
            .report_node_result("nope", "a", NodeResult::completed(Value::Null))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(orchestrator
            .report_node_result(&record.id, "zzz", NodeResult::completed(Value::Null))
            .await
            .unwrap_err()
            .is_not_found());

        orchestrator
            .report_node_result(&record.id, "a", NodeResult::completed(Value::Null))
            .await
            .unwrap();
        let err = orchestrator
            .report_node_result(&record.id, "a", NodeResult::completed(Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, TickflowError::Validation(_)));

        assert_eq!(orchestrator.get(&record.id).await.unwrap().status, OrchestrationStatus::Completed);
        assert!(orchestrator.get("nope").await.is_none());
        assert!(orchestrator.start("missing", OrchestrationOptions::default()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_terminal_records_are_pruned() {
        let h = Harness::new();
        let wf = h.workflow(&[("a", NodeType::Trigger)], Vec::new()).await;
        let orchestrator = h.orchestrator().with_max_records(2);
        for _ in 0..3 {
            let record = orchestrator.start(&wf.id, OrchestrationOptions::default()).await.unwrap();
            orchestrator
                .report_node_result(&record.id, "a", NodeResult::completed(Value::Null))
                .await
                .unwrap();
        }
        assert_eq!(orchestrator.list(None).await.len(), 2);
    }
}
