//! # Tickflow Workflow
//!
//! Directed, acyclic graphs of work nodes on top of the scheduler.
//!
//! ## Architecture
//! ```text
//! WorkflowStore
//!   ├── workflows / nodes / edges (validated, always acyclic)
//!   └── time-scheduled node → companion job in SchedulerService
//!
//! WorkflowOrchestrator
//!   ├── start(workflow) → launch roots via NodeLauncher
//!   ├── report_node_result → unblock dependents (edge conditions)
//!   └── cancel / wait / get / list
//! ```

pub mod condition;
pub mod graph;
pub mod model;
pub mod orchestrator;
pub mod store;
pub mod sync;

pub use condition::{ConditionEvaluator, DefaultConditionEvaluator};
pub use model::{
    DEFAULT_ORCHESTRATOR_AGENT_ID, Edge, NodeCreate, NodePatch, NodeSchedule, NodeType, Workflow,
    WorkflowCreate, WorkflowNode, WorkflowPatch,
};
pub use orchestrator::{
    NodeLauncher, NodeResult, NodeRunHandle, NodeRunState, NodeRunStatus, OrchestrationOptions,
    OrchestrationRecord, OrchestrationStatus, OverlapPolicy, WorkflowOrchestrator,
};
pub use store::WorkflowStore;
