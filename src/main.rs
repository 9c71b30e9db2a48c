//! tempo - cron scheduler and background job queue daemon.
//!
//! Usage:
//!   tempo scheduler run     Start the scheduler loop
//!   tempo worker run        Start a worker loop
//!   tempo failed list       Enumerate failed jobs
//!   tempo failed retry      Requeue failed jobs
//!   tempo failed forget     Delete one failed job
//!   tempo flush             Clear a live queue or the failed store
//!   tempo stats             Pending and failed counts
//!
//! The binary registers a small set of operator-facing handlers (`log`,
//! `sleep`, `fail`) so a fresh deployment can be exercised end to end;
//! real applications embed the library and register their own handlers.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use tempo::{
    AppConfig, Event, EventBus, EventHandler, Handler, HandlerError, HandlerRegistry, JobArgs,
    JobId, QueueManager, Scheduler, Worker, YamlLoader,
};

/// tempo - cron scheduler and background job queue daemon
#[derive(Parser)]
#[command(name = "tempo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding configuration files
    #[arg(long, global = true, default_value = ".")]
    config: PathBuf,

    /// Application configuration file name within the config directory
    #[arg(long, global = true, default_value = "tempo.yaml")]
    config_file: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scheduler commands
    Scheduler {
        #[command(subcommand)]
        command: SchedulerCommands,
    },

    /// Worker commands
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Failed-job management
    Failed {
        #[command(subcommand)]
        command: FailedCommands,
    },

    /// Clear a live queue or the failed store
    Flush {
        /// Queue to clear (default queue when omitted)
        #[arg(long)]
        queue: Option<String>,

        /// Clear the failed store instead of a live queue
        #[arg(long)]
        failed: bool,
    },

    /// Pending and failed counts
    Stats {
        /// Queues to report on, comma-separated (default queue when omitted)
        #[arg(long, value_delimiter = ',')]
        queue: Vec<String>,
    },
}

#[derive(Subcommand)]
enum SchedulerCommands {
    /// Start the scheduler loop
    Run {
        /// Run a single tick and exit
        #[arg(long)]
        poll: bool,

        /// Poll interval in seconds
        #[arg(long, default_value = "60")]
        interval: u64,

        /// Break the loop after one tick (like --poll, but logs the loop
        /// lifecycle)
        #[arg(long)]
        debug: bool,
    },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Start a worker loop
    Run {
        /// Queues to pull from, highest priority first, comma-separated
        #[arg(long, value_delimiter = ',')]
        queue: Vec<String>,

        /// Process at most one job, then exit
        #[arg(long)]
        once: bool,

        /// Exit the first time all queues are empty
        #[arg(long)]
        stop_when_empty: bool,

        /// Idle sleep in seconds between empty scans
        #[arg(long, default_value = "3")]
        sleep: u64,

        /// Stop after this many jobs (0 = unbounded)
        #[arg(long, default_value = "0")]
        max_jobs: u64,

        /// Soft per-job execution time hint in seconds; not enforced by
        /// the engine
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum FailedCommands {
    /// Enumerate failed jobs, newest first
    List,

    /// Requeue a failed job by id, or all of them
    Retry {
        /// Failed job id
        id: Option<String>,

        /// Retry every failed job
        #[arg(long)]
        all: bool,
    },

    /// Delete one failed job
    Forget {
        /// Failed job id
        id: String,
    },
}

/// Event listener that logs job lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::JobProcessed {
                job_id,
                handler,
                queue,
                execution_seconds,
                ..
            } => {
                info!(
                    "Processed '{}' from '{}' in {:.3}s (job: {})",
                    handler, queue, execution_seconds, job_id
                );
            }
            Event::JobFailed {
                job_id,
                handler,
                queue,
                error,
                attempts,
                ..
            } => {
                warn!(
                    "Job '{}' from '{}' failed on attempt {}: {} (job: {})",
                    handler, queue, attempts, error, job_id
                );
            }
            Event::JobMaxAttemptsReached {
                job_id,
                handler,
                max_attempts,
                ..
            } => {
                error!(
                    "Job '{}' exhausted {} attempts and was moved to failed storage (job: {})",
                    handler, max_attempts, job_id
                );
            }
            Event::SchedulerJobTriggered {
                name,
                handler,
                queue,
                ..
            } => match queue {
                Some(queue) => info!("Schedule '{}' dispatched '{}' to '{}'", name, handler, queue),
                None => info!("Schedule '{}' ran '{}' inline", name, handler),
            },
            Event::WorkerStarted { worker_id, queues, .. } => {
                info!("Worker {} started on queues {:?}", worker_id, queues);
            }
            Event::WorkerStopped {
                worker_id,
                jobs_processed,
                ..
            } => {
                info!("Worker {} stopped after {} job(s)", worker_id, jobs_processed);
            }
        }
    }
}

/// Handler that logs its argument bag.
struct LogMessage;

#[async_trait::async_trait]
impl Handler for LogMessage {
    fn name(&self) -> &str {
        "log"
    }

    async fn execute(&self, args: &JobArgs) -> Result<Value, HandlerError> {
        info!("log handler: {}", serde_json::Value::Object(args.clone()));
        Ok(json!("logged"))
    }
}

/// Handler that sleeps for `seconds` (default 1).
struct SleepFor;

#[async_trait::async_trait]
impl Handler for SleepFor {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, args: &JobArgs) -> Result<Value, HandlerError> {
        let seconds = args.get("seconds").and_then(Value::as_u64).unwrap_or(1);
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        Ok(json!(seconds))
    }
}

/// Handler that always fails; useful for exercising the retry path.
struct AlwaysFail;

#[async_trait::async_trait]
impl Handler for AlwaysFail {
    fn name(&self) -> &str {
        "fail"
    }

    async fn execute(&self, _args: &JobArgs) -> Result<Value, HandlerError> {
        Err(HandlerError::msg("the fail handler always fails"))
    }
}

fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("log", || LogMessage);
    registry.register("sleep", || SleepFor);
    registry.register("fail", || AlwaysFail);
    registry
}

fn load_app_config(dir: &PathBuf, file: &str) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let path = dir.join(file);
    if !path.exists() {
        info!("No configuration at {}; using defaults", path.display());
        return Ok(AppConfig::default());
    }
    Ok(YamlLoader::load_app_config(&path)?)
}

/// Resolve when a shutdown signal (ctrl-c or SIGTERM) arrives.
async fn wait_for_shutdown() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = load_app_config(&cli.config, &cli.config_file)?;
    let registry = Arc::new(builtin_registry());
    let events = Arc::new(EventBus::new());
    events.register(Arc::new(LoggingHandler)).await;

    let manager = Arc::new(QueueManager::from_config(&config, registry, events).await?);

    match cli.command {
        Commands::Scheduler {
            command: SchedulerCommands::Run { poll, interval, debug },
        } => {
            run_scheduler(manager, &cli.config, poll, interval, debug).await?;
        }
        Commands::Worker {
            command:
                WorkerCommands::Run {
                    queue,
                    once,
                    stop_when_empty,
                    sleep,
                    max_jobs,
                    timeout,
                },
        } => {
            run_worker(manager, queue, once, stop_when_empty, sleep, max_jobs, timeout).await?;
        }
        Commands::Failed { command } => match command {
            FailedCommands::List => list_failed(&manager).await?,
            FailedCommands::Retry { id, all } => retry_failed(&manager, id, all).await?,
            FailedCommands::Forget { id } => forget_failed(&manager, &id).await?,
        },
        Commands::Flush { queue, failed } => flush(&manager, queue, failed).await?,
        Commands::Stats { queue } => stats(&manager, queue).await?,
    }

    Ok(())
}

/// Run the scheduler loop, or a single tick with `--poll`.
async fn run_scheduler(
    manager: Arc<QueueManager>,
    config_dir: &PathBuf,
    poll: bool,
    interval: u64,
    debug: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let schedule_path = config_dir.join("schedule.yaml");
    let mut scheduler = Scheduler::new(manager)
        .with_interval(Duration::from_secs(interval))
        .with_debug(debug);

    match YamlLoader::load_schedule(&schedule_path) {
        Ok(file) => {
            let loaded = scheduler.load(&file);
            info!("Loaded {} schedule entr(ies) from {}", loaded, schedule_path.display());
        }
        Err(e) => {
            warn!(
                "Could not load {}; starting with an empty schedule: {}",
                schedule_path.display(),
                e
            );
        }
    }

    if poll {
        let fired = scheduler.poll().await;
        info!("Tick complete: {} entr(ies) fired", fired);
        return Ok(());
    }

    info!("Starting scheduler (interval: {}s); press Ctrl+C to stop", interval);
    let handle = scheduler.handle();
    let mut task = tokio::spawn(scheduler.run());

    tokio::select! {
        result = &mut task => result?,
        result = wait_for_shutdown() => {
            result?;
            info!("Shutting down...");
            handle.stop();
            task.await?;
        }
    }

    Ok(())
}

/// Run a worker loop until stopped or its bounds are reached.
async fn run_worker(
    manager: Arc<QueueManager>,
    queues: Vec<String>,
    once: bool,
    stop_when_empty: bool,
    sleep: u64,
    max_jobs: u64,
    timeout: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut worker = Worker::new(manager)
        .with_queues(queues)
        .with_sleep(Duration::from_secs(sleep))
        .with_stop_when_empty(stop_when_empty)
        .with_max_jobs(max_jobs);

    if once {
        worker = worker.with_max_jobs(1).with_stop_when_empty(true);
    }
    if let Some(timeout) = timeout {
        worker = worker.with_timeout(Duration::from_secs(timeout));
    }

    let handle = worker.handle();
    let mut task = tokio::spawn(worker.run());

    let processed = tokio::select! {
        processed = &mut task => processed?,
        result = wait_for_shutdown() => {
            result?;
            info!("Shutting down; waiting for the in-flight job...");
            handle.stop();
            task.await?
        }
    };

    info!("Worker exited after {} job(s)", processed);
    Ok(())
}

/// Print failed jobs, newest first.
async fn list_failed(manager: &QueueManager) -> Result<(), Box<dyn std::error::Error>> {
    let failed = manager.failed_jobs().await?;

    if failed.is_empty() {
        println!("No failed jobs.");
        return Ok(());
    }

    for job in failed {
        let failed_at = chrono::DateTime::from_timestamp(job.failed_at, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| job.failed_at.to_string());
        let first_line = job.exception.lines().next().unwrap_or("");
        println!("{}  {}  {}  {}", job.id, job.queue, job.payload.class, failed_at);
        println!("    {}", first_line);
    }

    Ok(())
}

/// Requeue one failed job, or all of them with `--all`.
async fn retry_failed(
    manager: &QueueManager,
    id: Option<String>,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if all {
        let failed = manager.failed_jobs().await?;
        let mut retried = 0;
        for job in failed {
            if manager.retry_failed_job(&job.id).await? {
                retried += 1;
            }
        }
        println!("Retried {} failed job(s).", retried);
        return Ok(());
    }

    let Some(id) = id else {
        return Err("failed retry requires an id or --all".into());
    };
    let id = JobId::parse(&id).map_err(|_| format!("invalid job id: {}", id))?;

    if manager.retry_failed_job(&id).await? {
        println!("Retried {}.", id);
        Ok(())
    } else {
        Err(format!("no failed job with id {}", id).into())
    }
}

/// Delete one failed job.
async fn forget_failed(manager: &QueueManager, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id = JobId::parse(id).map_err(|_| format!("invalid job id: {}", id))?;

    if manager.forget_failed_job(&id).await? {
        println!("Forgot {}.", id);
        Ok(())
    } else {
        Err(format!("no failed job with id {}", id).into())
    }
}

/// Clear a live queue, or the failed store with `--failed`.
async fn flush(
    manager: &QueueManager,
    queue: Option<String>,
    failed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if failed {
        let removed = manager.clear_failed_jobs().await?;
        println!("Cleared {} failed job(s).", removed);
        return Ok(());
    }

    let name = queue.as_deref().unwrap_or(manager.default_queue()).to_string();
    let removed = manager.clear(Some(&name)).await?;
    println!("Cleared {} job(s) from '{}'.", removed, name);
    Ok(())
}

/// Print pending counts per queue plus the failed count.
async fn stats(
    manager: &QueueManager,
    queues: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let queues = if queues.is_empty() {
        vec![manager.default_queue().to_string()]
    } else {
        queues
    };

    for queue in &queues {
        let pending = manager.size(Some(queue)).await?;
        println!("{}: {} pending", queue, pending);
    }

    let failed = manager.failed_jobs().await?.len();
    println!("failed: {}", failed);
    Ok(())
}
