//! # Tickflow: scheduler daemon
//!
//! Hosts the job scheduler and the workflow store in one process.
//! Jobs are executed by a logging executor; real hosts embed the
//! library crates and plug in their own executor and node launcher.
//!
//! Usage:
//!   tickflow run                       # Start the daemon (Ctrl-C to stop)
//!   tickflow jobs --all                # List stored jobs
//!   tickflow workflows --json          # Dump stored workflows
//!   tickflow trigger <job-id>          # Force one run of a job and exit

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tickflow_core::TickflowConfig;
use tickflow_core::config::expand_path;
use tickflow_scheduler::{
    ExecutionOutcome, Job, JobEvent, JobExecutor, JobPayload, RunMode, SchedulerOptions,
    SchedulerService,
};
use tickflow_workflow::WorkflowStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tickflow", version, about = "⏱️ Tickflow: job scheduler & workflow orchestration")]
struct Cli {
    /// Config file (default: ~/.tickflow/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// List stored jobs
    Jobs {
        /// Include disabled jobs
        #[arg(long)]
        all: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List stored workflows
    Workflows {
        #[arg(long)]
        json: bool,
    },
    /// Force one run of a job
    Trigger { id: String },
}

/// Executor that only logs what a job would do.
struct LoggingExecutor;

#[async_trait]
impl JobExecutor for LoggingExecutor {
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        match &job.payload {
            JobPayload::Agent {
                message, agent_id, ..
            } => tracing::info!(
                "🤖 [{}] → agent '{}': {message}",
                job.name,
                agent_id.as_deref().unwrap_or(tickflow_workflow::DEFAULT_ORCHESTRATOR_AGENT_ID)
            ),
            JobPayload::Event { text } => tracing::info!("📣 [{}] {text}", job.name),
        }
        ExecutionOutcome::ok()
    }
}

fn load_config(path: Option<&str>) -> Result<TickflowConfig> {
    let config = match path {
        Some(p) => TickflowConfig::load_from(&expand_path(p))?,
        None => TickflowConfig::load()?,
    };
    Ok(config)
}

fn build_scheduler(config: &TickflowConfig) -> SchedulerService {
    let sink = Arc::new(|event: JobEvent| {
        tracing::debug!(
            "📬 {:?} job={} status={:?} next={:?}",
            event.action,
            event.job_id,
            event.status,
            event.next_run_at_ms
        );
    });
    SchedulerService::builder(SchedulerOptions::from(&config.scheduler), Arc::new(LoggingExecutor))
        .event_sink(sink)
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "tickflow=debug,tickflow_core=debug,tickflow_scheduler=debug,tickflow_workflow=debug"
    } else {
        "tickflow=info,tickflow_core=info,tickflow_scheduler=info,tickflow_workflow=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Jobs { all, json } => {
            let scheduler = build_scheduler(&config);
            let jobs = scheduler.list(all).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                print_jobs(&jobs);
            }
            Ok(())
        }
        Command::Workflows { json } => {
            let store = WorkflowStore::from_config(&config.workflow, build_scheduler(&config));
            let workflows = store.list().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&workflows)?);
            } else {
                for wf in &workflows {
                    println!(
                        "{}  {:<24} v{:<4} nodes={:<3} edges={:<3} {}",
                        wf.id,
                        wf.name,
                        wf.version,
                        wf.nodes.len(),
                        wf.edges.len(),
                        if wf.enabled { "enabled" } else { "disabled" }
                    );
                }
            }
            Ok(())
        }
        Command::Trigger { id } => {
            let scheduler = build_scheduler(&config);
            let ran = scheduler.run(&id, RunMode::Force).await?;
            scheduler.stop().await;
            if ran {
                println!("✅ Job {id} executed");
            } else {
                println!("⚠️  Job {id} is already running");
            }
            Ok(())
        }
    }
}

async fn run(config: TickflowConfig) -> Result<()> {
    let scheduler = build_scheduler(&config);
    scheduler.start().await;

    let store = WorkflowStore::from_config(&config.workflow, scheduler.clone());
    store.resync_all().await;

    let status = scheduler.status().await;
    tracing::info!(
        "⏱️ Tickflow running: {} jobs, {} workflows (store: {})",
        status.job_count,
        store.list().await.len(),
        status.store_path.display()
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("👋 Shutting down");
    scheduler.stop().await;
    Ok(())
}

fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs.");
        return;
    }
    for job in jobs {
        let next = job
            .state
            .next_run_at_ms
            .and_then(format_ms)
            .unwrap_or_else(|| "-".into());
        let last = job
            .state
            .last_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {:<32} {:<6} next={:<25} last={:<8} errors={}",
            job.id,
            job.name,
            job.schedule.kind(),
            next,
            last,
            job.state.consecutive_errors
        );
    }
}

fn format_ms(ms: i64) -> Option<String> {
    chrono::DateTime::from_timestamp_millis(ms).map(|dt| dt.to_rfc3339())
}
