//! Workflow data model: workflows, nodes, edges, and their create/patch inputs.

use serde::{Deserialize, Serialize};
use tickflow_scheduler::Schedule;

/// Orchestrator agent used when a workflow does not name one.
pub const DEFAULT_ORCHESTRATOR_AGENT_ID: &str = "main";

/// A named directed graph of work nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub orchestrator_agent_id: String,
    pub enabled: bool,
    /// Bumped on every mutation. A change marker, not a lock.
    pub version: u64,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Workflow {
    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.iter_mut().find(|n| n.id == node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Trigger,
    AgentTask,
    SkillBuilder,
    IntegrationTask,
    Router,
    ApprovalGate,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeType::Trigger => "trigger",
            NodeType::AgentTask => "agent_task",
            NodeType::SkillBuilder => "skill_builder",
            NodeType::IntegrationTask => "integration_task",
            NodeType::Router => "router",
            NodeType::ApprovalGate => "approval_gate",
        };
        write!(f, "{name}")
    }
}

/// How a node is triggered.
///
/// `manual` and `dependency` nodes only run inside an orchestration; the
/// time-based kinds also get a companion scheduler job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum NodeSchedule {
    #[default]
    Manual,
    Dependency,
    At {
        at_ms: i64,
    },
    Every {
        every_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor_ms: Option<i64>,
    },
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

impl NodeSchedule {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Dependency => "dependency",
            Self::At { .. } => "at",
            Self::Every { .. } => "every",
            Self::Cron { .. } => "cron",
        }
    }

    pub fn is_time_based(&self) -> bool {
        !matches!(self, Self::Manual | Self::Dependency)
    }

    /// The scheduler schedule for a time-based node, `None` otherwise.
    pub fn to_job_schedule(&self) -> Option<Schedule> {
        match self {
            Self::Manual | Self::Dependency => None,
            Self::At { at_ms } => Some(Schedule::At { at_ms: *at_ms }),
            Self::Every {
                every_ms,
                anchor_ms,
            } => Some(Schedule::Every {
                every_ms: *every_ms,
                anchor_ms: *anchor_ms,
            }),
            Self::Cron { expr, tz } => Some(Schedule::Cron {
                expr: expr.clone(),
                tz: tz.clone(),
            }),
        }
    }
}

/// One unit of work in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub skill_refs: Vec<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub schedule: NodeSchedule,
    pub enabled: bool,
    /// Companion job id. A cache: may point at a job that no longer exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Directed dependency `from → to`, optionally gated by a condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            condition: None,
        }
    }

    pub fn when(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn same_endpoints(&self, from: &str, to: &str) -> bool {
        self.from == from && self.to == to
    }
}

/// Input for creating a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCreate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub orchestrator_agent_id: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub nodes: Vec<NodeCreate>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowCreate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Partial workflow update. `description: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub orchestrator_agent_id: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Input for adding a node. A missing `id` gets a generated one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCreate {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub skill_refs: Vec<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub schedule: NodeSchedule,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl NodeCreate {
    pub fn new(id: &str, name: &str, node_type: NodeType) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            node_type,
            prompt: None,
            agent_id: None,
            skill_refs: Vec::new(),
            config: serde_json::Value::Null,
            schedule: NodeSchedule::Manual,
            enabled: None,
        }
    }

    pub fn with_schedule(mut self, schedule: NodeSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }
}

/// Partial node update. Doubly-optional fields clear on `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub node_type: Option<NodeType>,
    #[serde(default)]
    pub prompt: Option<Option<String>>,
    #[serde(default)]
    pub agent_id: Option<Option<String>>,
    #[serde(default)]
    pub skill_refs: Option<Vec<String>>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub schedule: Option<NodeSchedule>,
    #[serde(default)]
    pub enabled: Option<bool>,
}
