//! # Tickflow Scheduler
//!
//! Durable job scheduler with a single wake timer.
//! Jobs live in one JSON document and survive restarts.
//!
//! ## Architecture
//! ```text
//! SchedulerService (tokio interval, one timer)
//!   ├── Job: at 2026-02-22T15:00Z      → one-shot, removed after success
//!   ├── Job: every 30min (anchored)    → fixed grid, no drift
//!   ├── Job: cron "0 8 * * *" @ tz     → wall-clock schedule
//!   └── on due → JobExecutor (host-provided) → JobEvent sink
//!
//! JobLedger
//!   └── create/update/remove → undo/redo stacks
//! ```

pub mod events;
pub mod executor;
pub mod job;
pub mod ledger;
pub mod schedule;
pub mod service;
pub mod store;

pub use events::{EventSink, JobAction, JobEvent};
pub use executor::{ExecutionOutcome, FnExecutor, JobExecutor, executor_fn};
pub use job::{Job, JobCreate, JobPatch, JobPayload, JobState, RunStatus};
pub use ledger::{JobLedger, LedgerEntry, LedgerOutcome, LedgerOutcomeKind, LedgerStatus, MutationKind};
pub use schedule::{Schedule, compute_next_run};
pub use service::{Clock, RunMode, SchedulerBuilder, SchedulerOptions, SchedulerService, SchedulerStatus};
pub use store::JobStore;
