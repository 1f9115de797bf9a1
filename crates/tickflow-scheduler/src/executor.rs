//! Executor contract: the host decides what "running a job" means.
//!
//! The scheduler never interprets payloads itself; it hands the job to an
//! executor and records the outcome. Executors are expected to apply their
//! own timeouts.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job::{Job, RunStatus};

/// Result of one job execution as reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok() -> Self {
        Self {
            status: RunStatus::Ok,
            error: None,
            run_id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            error: Some(message.into()),
            run_id: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Skipped,
            error: Some(reason.into()),
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Runs a due job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> ExecutionOutcome;
}

/// Adapter turning an async closure into a [`JobExecutor`].
pub struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> JobExecutor for FnExecutor<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutionOutcome> + Send,
{
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        (self.0)(job.clone()).await
    }
}

/// Wrap an async closure as a shareable executor.
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn JobExecutor>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionOutcome> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}
