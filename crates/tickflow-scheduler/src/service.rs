//! Scheduler service: the main loop that detects due jobs and runs them.
//!
//! ```text
//! wake timer (tokio interval, never overlapping)
//!   └── tick
//!         ├── recompute_all_next_runs (lazy sweep, self-corrects shifted clocks)
//!         ├── due = enabled && nextRunAtMs <= now && not running
//!         └── spawn every due job at once → executor → finish_run
//! ```
//!
//! Every mutation marks the store dirty; writes are coalesced behind a short
//! debounce and `stop()` flushes whatever is pending.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tickflow_core::config::SchedulerConfig;
use tickflow_core::{Result, TickflowError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::events::{EventSink, JobAction, JobEvent};
use crate::executor::{ExecutionOutcome, JobExecutor};
use crate::job::{Job, JobCreate, JobPatch, RunStatus, apply_job_patch, compute_job_next_run, create_job};
use crate::store::JobStore;

/// Millisecond clock. Injectable so tests can shift time.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// How `run` decides whether to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Execute regardless of `nextRunAtMs`.
    Force,
    /// Execute only when the job is due.
    Due,
}

/// Snapshot returned by [`SchedulerService::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub store_path: PathBuf,
    pub job_count: usize,
    pub next_wake_at_ms: Option<i64>,
}

/// Runtime options for a scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// When false, `start()` loads state but arms no wake timer.
    pub enabled: bool,
    pub store_path: PathBuf,
    pub wake_interval: Duration,
    /// Zero writes synchronously on every mutation.
    pub persist_debounce: Duration,
    pub stuck_run_ms: i64,
}

impl SchedulerOptions {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self::from(&SchedulerConfig::default()).with_store_path(store_path)
    }

    pub fn with_store_path(mut self, store_path: impl Into<PathBuf>) -> Self {
        self.store_path = store_path.into();
        self
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            enabled: config.enabled,
            store_path: config.store_path(),
            wake_interval: Duration::from_millis(config.wake_interval_ms.max(1)),
            persist_debounce: Duration::from_millis(config.persist_debounce_ms),
            stuck_run_ms: config.stuck_run_ms,
        }
    }
}

/// Builder for [`SchedulerService`].
pub struct SchedulerBuilder {
    options: SchedulerOptions,
    executor: Arc<dyn JobExecutor>,
    sink: Option<EventSink>,
    clock: Clock,
}

impl SchedulerBuilder {
    pub fn event_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Load the store and build the service. No timer runs until `start()`.
    pub fn build(self) -> SchedulerService {
        let store = JobStore::new(&self.options.store_path);
        let jobs = store.load();
        tracing::info!("📂 Loaded {} jobs from {}", jobs.len(), store.path().display());
        SchedulerService {
            inner: Arc::new(Inner {
                options: self.options,
                store,
                jobs: Mutex::new(jobs),
                executor: self.executor,
                sink: self.sink,
                clock: self.clock,
                tick_gate: Mutex::new(()),
                persist_gate: Mutex::new(()),
                dirty: AtomicBool::new(false),
                persist_task: Mutex::new(None),
                timer: Mutex::new(None),
            }),
        }
    }
}

/// The job scheduler. Cheap to clone; clones share one instance.
#[derive(Clone)]
pub struct SchedulerService {
    inner: Arc<Inner>,
}

struct Inner {
    options: SchedulerOptions,
    store: JobStore,
    jobs: Mutex<Vec<Job>>,
    executor: Arc<dyn JobExecutor>,
    sink: Option<EventSink>,
    clock: Clock,
    /// Held while a wake cycle selects and spawns due jobs, never across executions.
    tick_gate: Mutex<()>,
    /// Serializes snapshot+write so an older snapshot never lands last.
    persist_gate: Mutex<()>,
    dirty: AtomicBool,
    persist_task: Mutex<Option<JoinHandle<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerService {
    pub fn builder(options: SchedulerOptions, executor: Arc<dyn JobExecutor>) -> SchedulerBuilder {
        SchedulerBuilder {
            options,
            executor,
            sink: None,
            clock: Arc::new(tickflow_core::now_ms),
        }
    }

    /// Build with the wall clock and no event sink.
    pub fn new(options: SchedulerOptions, executor: Arc<dyn JobExecutor>) -> Self {
        Self::builder(options, executor).build()
    }

    /// Normalize loaded state and arm the wake timer.
    pub async fn start(&self) {
        let now = self.inner.now();
        let changed = {
            let mut jobs = self.inner.jobs.lock().await;
            self.inner.recompute_all_next_runs(&mut jobs, now)
        };
        if changed {
            self.inner.schedule_persist().await;
        }

        if !self.inner.options.enabled {
            tracing::info!("⏸️ Scheduler disabled, wake timer not armed");
            return;
        }

        let mut timer = self.inner.timer.lock().await;
        if timer.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *timer = Some(tokio::spawn(wake_loop(inner)));
        tracing::info!(
            "⏰ Scheduler started (wake every {}ms)",
            self.inner.options.wake_interval.as_millis()
        );
    }

    /// Cancel the wake timer and flush pending writes.
    /// In-flight executions finish on their own.
    pub async fn stop(&self) {
        if let Some(handle) = self.inner.timer.lock().await.take() {
            handle.abort();
            tracing::info!("⏹️ Scheduler stopped");
        }
        self.inner.flush().await;
    }

    /// Add a new job. Not recorded for undo; see [`crate::ledger::JobLedger`].
    pub async fn add(&self, input: JobCreate) -> Result<Job> {
        let now = self.inner.now();
        let job = create_job(input, now)?;
        self.inner.jobs.lock().await.push(job.clone());
        tracing::info!("📅 Job added: '{}' ({})", job.name, job.id);

        let mut event = JobEvent::new(&job.id, JobAction::Added);
        event.next_run_at_ms = job.state.next_run_at_ms;
        self.inner.emit(event);
        self.inner.schedule_persist().await;
        Ok(job)
    }

    /// Patch an existing job.
    pub async fn update(&self, id: &str, patch: JobPatch) -> Result<Job> {
        let now = self.inner.now();
        let job = {
            let mut jobs = self.inner.jobs.lock().await;
            let job = jobs
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or_else(|| TickflowError::not_found("job", id))?;
            apply_job_patch(job, patch, now)?;
            job.clone()
        };
        tracing::info!("✏️ Job updated: '{}' ({})", job.name, job.id);

        let mut event = JobEvent::new(&job.id, JobAction::Updated);
        event.next_run_at_ms = job.state.next_run_at_ms;
        self.inner.emit(event);
        self.inner.schedule_persist().await;
        Ok(job)
    }

    /// Remove a job by ID. Returns false for an unknown id.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut jobs = self.inner.jobs.lock().await;
            let len = jobs.len();
            jobs.retain(|j| j.id != id);
            jobs.len() < len
        };
        if removed {
            tracing::info!("🗑️ Job removed: {id}");
            self.inner.emit(JobEvent::new(id, JobAction::Removed));
            self.inner.schedule_persist().await;
        }
        removed
    }

    /// Get a single job.
    pub async fn get(&self, id: &str) -> Option<Job> {
        self.inner.jobs.lock().await.iter().find(|j| j.id == id).cloned()
    }

    /// List jobs ordered by next run (unscheduled last).
    pub async fn list(&self, include_disabled: bool) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .jobs
            .lock()
            .await
            .iter()
            .filter(|j| include_disabled || j.enabled)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            let key = |j: &Job| j.state.next_run_at_ms.unwrap_or(i64::MAX);
            key(a).cmp(&key(b)).then_with(|| a.name.cmp(&b.name))
        });
        jobs
    }

    /// Run a job now. Returns false when nothing was executed
    /// (not due in `Due` mode, or already running).
    pub async fn run(&self, id: &str, mode: RunMode) -> Result<bool> {
        let now = self.inner.now();
        let job = {
            let mut jobs = self.inner.jobs.lock().await;
            let job = jobs
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or_else(|| TickflowError::not_found("job", id))?;
            if job.state.running_at_ms.is_some() {
                tracing::debug!("Job '{}' is already running", job.name);
                return Ok(false);
            }
            if mode == RunMode::Due && !is_due(job, now) {
                return Ok(false);
            }
            job.state.running_at_ms = Some(now);
            job.clone()
        };

        let mut event = JobEvent::new(&job.id, JobAction::Started);
        event.run_at_ms = Some(now);
        self.inner.emit(event);

        Arc::clone(&self.inner).execute_job(job, now).await;
        Ok(true)
    }

    /// Run one wake cycle now and wait for the executions it started.
    /// Returns the ids of the jobs executed.
    pub async fn tick(&self) -> Vec<String> {
        let dispatched = self.inner.dispatch_due().await;
        let ids = dispatched.iter().map(|(id, _)| id.clone()).collect();
        for result in join_all(dispatched.into_iter().map(|(_, handle)| handle)).await {
            if let Err(e) = result {
                tracing::warn!("⚠️ Job execution task failed: {e}");
            }
        }
        ids
    }

    /// Write the store immediately if anything changed.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    pub async fn status(&self) -> SchedulerStatus {
        let jobs = self.inner.jobs.lock().await;
        let next_wake_at_ms = if self.inner.options.enabled {
            jobs.iter()
                .filter(|j| j.enabled)
                .filter_map(|j| j.state.next_run_at_ms)
                .min()
        } else {
            None
        };
        SchedulerStatus {
            enabled: self.inner.options.enabled,
            store_path: self.inner.store.path().to_path_buf(),
            job_count: jobs.len(),
            next_wake_at_ms,
        }
    }
}

async fn wake_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.options.wake_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        inner.dispatch_due().await;
    }
}

fn is_due(job: &Job, now: i64) -> bool {
    job.enabled
        && job.state.running_at_ms.is_none()
        && job.state.next_run_at_ms.is_some_and(|next| next <= now)
}

impl Inner {
    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn emit(&self, event: JobEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    /// Mark every due job running and spawn its execution. Executions are
    /// detached; the handles let callers await them.
    async fn dispatch_due(self: &Arc<Self>) -> Vec<(String, JoinHandle<()>)> {
        let _gate = self.tick_gate.lock().await;
        let now = self.now();

        let (due, changed) = {
            let mut jobs = self.jobs.lock().await;
            let changed = self.recompute_all_next_runs(&mut jobs, now);
            let mut due = Vec::new();
            for job in jobs.iter_mut() {
                if is_due(job, now) {
                    job.state.running_at_ms = Some(now);
                    due.push(job.clone());
                }
            }
            (due, changed)
        };

        if changed {
            self.schedule_persist().await;
        }
        if due.is_empty() {
            return Vec::new();
        }

        due.into_iter()
            .map(|job| {
                tracing::info!("🔔 Job triggered: '{}'", job.name);
                let mut event = JobEvent::new(&job.id, JobAction::Started);
                event.run_at_ms = Some(now);
                self.emit(event);
                let id = job.id.clone();
                (id, tokio::spawn(Arc::clone(self).execute_job(job, now)))
            })
            .collect()
    }

    /// Run the executor in its own task so a panic is recorded, not propagated.
    async fn execute_job(self: Arc<Self>, job: Job, started_at: i64) {
        let executor = Arc::clone(&self.executor);
        let job_id = job.id.clone();
        let outcome = match tokio::spawn(async move { executor.execute(&job).await }).await {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::error(format!("executor panicked: {e}")),
        };
        self.finish_run(&job_id, started_at, outcome).await;
    }

    async fn finish_run(self: &Arc<Self>, id: &str, started_at: i64, outcome: ExecutionOutcome) {
        let ended = self.now();
        let duration = (ended - started_at).max(0);

        let mut finished = JobEvent::new(id, JobAction::Finished);
        finished.run_at_ms = Some(started_at);
        finished.duration_ms = Some(duration);
        finished.status = Some(outcome.status);
        finished.error = match outcome.status {
            RunStatus::Ok => None,
            _ => outcome.error.clone(),
        };

        let mut events = Vec::with_capacity(2);
        {
            let mut jobs = self.jobs.lock().await;
            let Some(idx) = jobs.iter().position(|j| j.id == id) else {
                drop(jobs);
                tracing::debug!("Job {id} was removed while running");
                self.emit(finished);
                return;
            };
            let job = &mut jobs[idx];
            job.state.running_at_ms = None;
            job.state.last_run_at_ms = Some(started_at);
            job.state.last_status = Some(outcome.status);
            job.state.last_error = finished.error.clone();
            job.state.last_duration_ms = Some(duration);
            job.state.last_run_id = outcome.run_id.clone();
            match outcome.status {
                RunStatus::Ok => job.state.consecutive_errors = 0,
                RunStatus::Error => job.state.consecutive_errors += 1,
                RunStatus::Skipped => {}
            }

            match outcome.status {
                RunStatus::Error => tracing::warn!(
                    "⚠️ Job '{}' failed ({} in a row): {}",
                    job.name,
                    job.state.consecutive_errors,
                    outcome.error.as_deref().unwrap_or("unknown error")
                ),
                status => tracing::info!("✅ Job '{}' finished: {status} in {duration}ms", job.name),
            }

            let one_shot_done = job.schedule.is_one_shot() && outcome.status == RunStatus::Ok;
            if one_shot_done && job.delete_after_run {
                let removed = jobs.remove(idx);
                tracing::info!("🧹 One-shot job '{}' completed and removed", removed.name);
                events.push(finished);
                events.push(JobEvent::new(id, JobAction::Removed));
            } else {
                if one_shot_done {
                    job.enabled = false;
                }
                job.state.next_run_at_ms = compute_job_next_run(job, ended);
                finished.next_run_at_ms = job.state.next_run_at_ms;
                events.push(finished);
            }
        }

        for event in events {
            self.emit(event);
        }
        self.schedule_persist().await;
    }

    /// Lazy sweep: fill missing next runs, pull stale ones back onto the
    /// schedule, clear them for disabled jobs, and drop abandoned running
    /// markers. Never executes anything. Returns true if any job changed.
    fn recompute_all_next_runs(&self, jobs: &mut [Job], now: i64) -> bool {
        let mut changed = false;
        for job in jobs.iter_mut() {
            if let Some(running_at) = job.state.running_at_ms {
                if now - running_at > self.options.stuck_run_ms {
                    tracing::warn!("⚠️ Clearing stuck running marker on job '{}'", job.name);
                    job.state.running_at_ms = None;
                    changed = true;
                } else {
                    continue;
                }
            }

            if !job.enabled {
                if job.state.next_run_at_ms.take().is_some() {
                    changed = true;
                }
                continue;
            }

            let fresh = compute_job_next_run(job, now);
            let next = match (job.state.next_run_at_ms, fresh) {
                (None, Some(fresh)) => Some(fresh),
                (Some(cached), Some(fresh)) if cached > fresh => Some(fresh),
                (Some(cached), None) if cached > now => None,
                _ => continue,
            };
            tracing::debug!("Recomputed next run for '{}': {:?}", job.name, next);
            job.state.next_run_at_ms = next;
            changed = true;
        }
        changed
    }

    async fn schedule_persist(self: &Arc<Self>) {
        self.dirty.store(true, Ordering::SeqCst);
        if self.options.persist_debounce.is_zero() {
            self.flush().await;
            return;
        }
        let mut slot = self.persist_task.lock().await;
        if slot.is_none() {
            *slot = Some(tokio::spawn(Arc::clone(self).persist_loop()));
        }
    }

    /// Coalesce writes: wait for the debounce, write, and repeat while
    /// mutations keep arriving.
    async fn persist_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.options.persist_debounce).await;
            self.flush().await;
            let mut slot = self.persist_task.lock().await;
            if !self.dirty.load(Ordering::SeqCst) {
                *slot = None;
                return;
            }
        }
    }

    /// Persistence failures are logged and swallowed; memory stays authoritative.
    async fn flush(&self) {
        let _gate = self.persist_gate.lock().await;
        let snapshot = {
            let jobs = self.jobs.lock().await;
            if !self.dirty.swap(false, Ordering::SeqCst) {
                return;
            }
            jobs.clone()
        };
        if let Err(e) = self.store.save(&snapshot) {
            tracing::warn!("⚠️ Failed to save jobs: {e}");
        }
    }
}
