//! CLI command definitions for jobvisor.
//!
//! Every command loads the background jobs configuration (from `--config` or
//! the `JOBVISOR_*` environment), connects, and runs one operation. `worker`
//! and `monitor` run until interrupted with Ctrl-C.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::BackgroundJobsConfig;
use crate::jobs::{
    BackgroundJobs, CommandKind, EnqueueOptions, QueueName, RunnerConfig, WorkerMonitor,
    WorkerName, WorkerRef, WorkerRunner,
};
use crate::metrics::{export_metrics, init_metrics, MetricsCollector};

/// Default dequeue timeout of a worker, in seconds.
const DEFAULT_DEQUEUE_TIMEOUT_SECS: u64 = 5;

/// Default monitor interval, in seconds.
const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Background job dispatcher and worker supervisor.
#[derive(Parser)]
#[command(name = "jobvisor")]
#[command(about = "Queue background jobs in Redis and supervise the workers that run them")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file. Without it, JOBVISOR_* environment variables are used.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Print JSON instead of human-readable output.
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run a worker loop draining one queue.
    Worker {
        /// Queue to drain.
        queue: QueueName,

        /// Seconds each dequeue waits before checking for shutdown.
        #[arg(short, long, default_value_t = DEFAULT_DEQUEUE_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Periodically restart dead workers and report queue and worker health.
    Monitor {
        /// Seconds between passes.
        #[arg(short, long, default_value_t = DEFAULT_MONITOR_INTERVAL_SECS)]
        interval: u64,

        /// Seconds after which a worker record that was not refreshed is reported.
        #[arg(long, default_value_t = 300)]
        stale_after: u64,
    },

    /// Enqueue a job.
    Enqueue {
        queue: QueueName,
        command: CommandKind,

        /// Arguments passed to the command.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Keep the status record only for the short track-status TTL.
        #[arg(long)]
        no_track: bool,

        /// JSON object attached to the job as metadata.
        #[arg(long)]
        metadata: Option<String>,

        /// Caller-side record to link to the job.
        #[arg(long)]
        related_id: Option<i64>,
    },

    /// Show a job's status record.
    Job { id: String },

    /// List queues with their pending job count.
    Queues,

    /// Drop every pending job of a queue.
    Purge { queue: QueueName },

    /// List registered worker records.
    Workers,

    /// List worker processes as seen by the supervisor.
    Processes,

    /// Start a worker process, e.g. `default_00`.
    StartWorker {
        name: WorkerName,
        #[arg(long)]
        wait: bool,
    },

    /// Stop a worker process by name or pid.
    StopWorker {
        worker: WorkerRef,
        #[arg(long)]
        wait: bool,
    },

    /// Stop and start every worker process.
    RestartWorkers {
        #[arg(long)]
        wait: bool,
    },

    /// Start every worker process that is not running.
    RestartDeadWorkers {
        #[arg(long)]
        wait: bool,
    },

    /// Show supervisor state, store health and queue sizes.
    Status,

    /// Sample queue depths and running workers and print them in Prometheus
    /// text format, e.g. for a node_exporter textfile collector.
    Metrics,
}

/// Parse CLI arguments without running any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and run the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let jobs = Arc::new(BackgroundJobs::connect(config).await?);

    match cli.command {
        Commands::Worker { queue, timeout } => run_worker(jobs, queue, timeout).await,
        Commands::Monitor {
            interval,
            stale_after,
        } => run_monitor(jobs, interval, stale_after).await,
        command => execute(&jobs, command, cli.json).await,
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<BackgroundJobsConfig> {
    let config = match path {
        Some(path) => BackgroundJobsConfig::from_yaml_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config from {}: {}", path, e))?,
        None => BackgroundJobsConfig::from_env()?,
    };
    Ok(config)
}

async fn run_worker(jobs: Arc<BackgroundJobs>, queue: QueueName, timeout: u64) -> anyhow::Result<()> {
    if timeout == 0 {
        anyhow::bail!("--timeout must be greater than 0");
    }
    init_metrics()?;

    let runner = WorkerRunner::new(
        jobs,
        RunnerConfig::new(queue).with_dequeue_timeout(Duration::from_secs(timeout)),
    );
    let shutdown = runner.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing current job");
            let _ = shutdown.send(());
        }
    });

    let stats = runner.run().await?;
    info!(
        succeeded = stats.jobs_succeeded,
        failed = stats.jobs_failed,
        "Worker exited"
    );
    Ok(())
}

async fn run_monitor(
    jobs: Arc<BackgroundJobs>,
    interval: u64,
    stale_after: u64,
) -> anyhow::Result<()> {
    if interval == 0 {
        anyhow::bail!("--interval must be greater than 0");
    }
    init_metrics()?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    WorkerMonitor::new(jobs)
        .with_interval(Duration::from_secs(interval))
        .with_stale_after(Duration::from_secs(stale_after))
        .run(shutdown_rx)
        .await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
    println!("{}", json);
    Ok(())
}

#[derive(Serialize)]
struct QueueSize {
    queue: QueueName,
    size: usize,
}

async fn queue_sizes(jobs: &BackgroundJobs) -> anyhow::Result<Vec<QueueSize>> {
    let mut sizes = Vec::new();
    for &queue in jobs.dispatcher().get_queues() {
        sizes.push(QueueSize {
            queue,
            size: jobs.dispatcher().get_queue_size(queue).await?,
        });
    }
    Ok(sizes)
}

/// Runs one short-lived command against an existing subsystem.
pub async fn execute(jobs: &BackgroundJobs, command: Commands, json: bool) -> anyhow::Result<()> {
    let dispatcher = jobs.dispatcher();
    let orchestrator = jobs.orchestrator();

    match command {
        Commands::Worker { .. } | Commands::Monitor { .. } => {
            anyhow::bail!("worker and monitor are long-running; use run_with_cli")
        }

        Commands::Enqueue {
            queue,
            command,
            args,
            no_track,
            metadata,
            related_id,
        } => {
            let mut options = EnqueueOptions::new().track_status(!no_track);
            if let Some(raw) = metadata {
                options.metadata = serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&raw)
                    .map_err(|e| anyhow::anyhow!("--metadata must be a JSON object: {}", e))?;
            }
            options.related_id = related_id;

            let id = dispatcher.enqueue(queue, command, args, options).await?;
            if json {
                print_json(&serde_json::json!({ "id": id }))?;
            } else {
                println!("{}", id);
            }
        }

        Commands::Job { id } => match dispatcher.get_job(&id).await? {
            Some(job) if json => print_json(&job)?,
            Some(job) => {
                println!("ID:          {}", job.id());
                println!("Queue:       {}", job.queue());
                println!("Command:     {} {}", job.command(), job.args().join(" "));
                println!("Status:      {}", job.status());
                if let Some(code) = job.return_code() {
                    println!("Return code: {}", code);
                }
                println!("Updated:     {}", job.updated_at().to_rfc3339());
                if let Some(error) = job.error() {
                    println!("Error:       {}", error);
                }
            }
            None => anyhow::bail!("Job {} not found", id),
        },

        Commands::Queues => {
            let sizes = queue_sizes(jobs).await?;
            if json {
                print_json(&sizes)?;
            } else {
                for entry in sizes {
                    println!("{:<10} {}", entry.queue, entry.size);
                }
            }
        }

        Commands::Purge { queue } => {
            let purged = dispatcher.purge_queue(queue).await?;
            println!("Purged {} job(s) from {}", purged, queue);
        }

        Commands::Workers => {
            let mut workers = orchestrator.get_workers().await?;
            workers.sort_by_key(|w| w.pid);
            if json {
                print_json(&workers)?;
            } else if workers.is_empty() {
                println!("No workers registered");
            } else {
                for worker in workers {
                    println!(
                        "{:<8} {:<8} {:<8} {}",
                        worker.pid,
                        worker.queue,
                        worker.status,
                        worker.updated_at.to_rfc3339()
                    );
                }
            }
        }

        Commands::Processes => {
            let processes = orchestrator.worker_processes().await?;
            if json {
                print_json(&processes)?;
            } else {
                for process in processes {
                    println!(
                        "{:<20} {:<9} {:<8} {}",
                        process.name, process.state, process.pid, process.description
                    );
                }
            }
        }

        Commands::StartWorker { name, wait } => {
            orchestrator.start_worker(&name, wait).await?;
            println!("Started {}", name);
        }

        Commands::StopWorker { worker, wait } => {
            orchestrator.stop_worker(&worker, wait).await?;
            println!("Stopped {}", worker);
        }

        Commands::RestartWorkers { wait } => {
            let started = orchestrator.restart_workers(wait).await?;
            println!("Restarted {} worker(s)", started.len());
        }

        Commands::RestartDeadWorkers { wait } => {
            let started = orchestrator.restart_dead_workers(wait).await?;
            for result in started.iter().filter(|r| !r.is_success()) {
                warn!(worker = %result.name, description = %result.description, "Worker did not start");
            }
            println!("Started {} dead worker(s)", started.len());
        }

        Commands::Status => {
            let supervisor = orchestrator.supervisor_state().await?;
            let store_ok = jobs.ping().await.is_ok();
            let sizes = queue_sizes(jobs).await?;
            if json {
                print_json(&serde_json::json!({
                    "supervisor": supervisor,
                    "store": store_ok,
                    "queues": sizes,
                }))?;
            } else {
                println!("Supervisor: {}", supervisor.name);
                println!("Store:      {}", if store_ok { "OK" } else { "UNREACHABLE" });
                for entry in sizes {
                    println!("  {:<10} {}", entry.queue, entry.size);
                }
            }
        }

        Commands::Metrics => {
            init_metrics()?;
            let collector = MetricsCollector::new();
            for entry in queue_sizes(jobs).await? {
                collector.update_queue_depth(entry.queue.as_str(), entry.size);
            }
            let active = orchestrator
                .worker_processes()
                .await?
                .iter()
                .filter(|process| process.state.is_running())
                .count();
            collector.update_active_workers(active);
            print!("{}", export_metrics());
        }
    }

    Ok(())
}
