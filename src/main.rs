use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use fifopool::config::{PoolConfig, QueueOptions};
use fifopool::scheduler::JobFailure;
use fifopool::shutdown;
use fifopool::worker::builtin::builtin_registry;
use fifopool::worker::{run_worker, WorkerArgs};
use fifopool::{DeferredGroup, Orchestrator, PersistentQueue};

#[derive(Parser, Debug)]
#[command(name = "fifopool")]
#[command(version)]
#[command(about = "Local job distribution over file-backed FIFO queues")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the worker loop (started by the orchestrator)
    Worker(WorkerCommand),

    /// Inspect or modify a queue file
    Queue {
        /// Path to the queue file (created if missing)
        path: PathBuf,

        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Run jobs on a pool of local worker processes
    Run(RunArgs),
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerCommand {
    /// Shared results queue; the inbound queue is `<results>-<worker-id>`
    results: PathBuf,

    /// Identifier echoed in every result envelope
    worker_id: u64,

    /// Exit after this many milliseconds without work (0 = never)
    #[arg(long, default_value = "60000")]
    idle_timeout_ms: u64,

    /// Queue poll interval in milliseconds
    #[arg(long, default_value = "100")]
    poll_ms: u64,
}

// =============================================================================
// Queue Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum QueueCommands {
    /// Append a record
    Push {
        data: String,
    },
    /// Remove and print the oldest record
    Pop {
        /// Wait up to this many seconds for a record (0 = forever)
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Print the number of queued records
    Count,
    /// Print records without removing them
    List {
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum records to print (0 = all)
        #[arg(long, default_value = "0")]
        limit: usize,
    },
    /// Remove every record
    Clear,
    /// Remove the queue file
    Delete,
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of worker processes
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Shared results queue path (defaults to a file in the temp directory)
    #[arg(long)]
    results: Option<PathBuf>,

    /// Abort the run once this many workers have crashed
    #[arg(long, default_value = "10")]
    budget: u32,

    /// Submit the job this many times
    #[arg(long, default_value = "1")]
    repeat: usize,

    /// Registered callable to invoke (one, echo, hi, err, add, sleep_ms, big_hi, exit_once)
    callable: String,

    /// Arguments, each parsed as JSON (falls back to a plain string)
    args: Vec<String>,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobResultOutput {
    succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JobFailure>,
}

// =============================================================================
// Command Handlers
// =============================================================================

fn handle_worker(cmd: WorkerCommand) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = WorkerArgs {
        results_path: cmd.results,
        worker_id: cmd.worker_id,
        idle_timeout: Duration::from_millis(cmd.idle_timeout_ms),
        poll_interval: Duration::from_millis(cmd.poll_ms),
    };

    let registry = builtin_registry();
    tracing::debug!(worker_id = args.worker_id, registry = ?registry, "Loaded registry");
    let exit = run_worker(&registry, &args)?;
    tracing::debug!(worker_id = args.worker_id, exit = ?exit, "Finished");
    Ok(())
}

fn handle_queue(path: &Path, command: QueueCommands) -> Result<(), Box<dyn std::error::Error>> {
    let queue = PersistentQueue::open_with(path, QueueOptions::default())?;

    match command {
        QueueCommands::Push { data } => {
            let count = queue.enqueue(data.as_bytes())?;
            println!("{}", count);
        }
        QueueCommands::Pop { wait } => {
            let data = match wait {
                Some(secs) => queue.blocking_dequeue(Duration::from_secs(secs))?,
                None => queue.dequeue()?,
            };
            match data {
                Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
                None => {
                    eprintln!("{} is empty", queue);
                    std::process::exit(1);
                }
            }
        }
        QueueCommands::Count => {
            println!("{}", queue.count()?);
        }
        QueueCommands::List { offset, limit } => {
            for item in queue.items(offset, limit)? {
                println!("{}", String::from_utf8_lossy(&item));
            }
        }
        QueueCommands::Clear => queue.clear()?,
        QueueCommands::Delete => queue.delete()?,
    }
    Ok(())
}

async fn handle_run(run: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let program = std::env::current_exe()?;
    let results = run.results.unwrap_or_else(|| {
        std::env::temp_dir().join(format!("fifopool-{}.fifo", std::process::id()))
    });

    let config = PoolConfig::new(program)
        .with_worker_arg("worker")
        .with_workers(run.workers)
        .with_error_budget(run.budget);

    let job_args: Vec<Value> = run
        .args
        .iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect();

    let mut orchestrator = Orchestrator::new(config, &results)?;
    shutdown::cancel_on_signal(orchestrator.shutdown_token())?;

    let deferreds: Vec<_> = (0..run.repeat)
        .map(|_| orchestrator.submit(run.callable.as_str(), job_args.clone()))
        .collect();
    let group = DeferredGroup::new(&deferreds);

    tokio::task::spawn_blocking(move || orchestrator.run()).await??;

    let Some(Ok(outcomes)) = group.outcome() else {
        eprintln!("Stopped before every job finished");
        std::process::exit(1);
    };

    let output: Vec<JobResultOutput> = outcomes
        .into_iter()
        .map(|outcome| match outcome {
            Ok(value) => JobResultOutput {
                succeeded: true,
                value: Some(value),
                error: None,
            },
            Err(failure) => JobResultOutput {
                succeeded: false,
                value: None,
                error: Some(failure),
            },
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&output)?);

    // Failures were reported above.
    for deferred in &deferreds {
        deferred.add_errback(|_| Ok(Value::Null));
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Worker(cmd) => {
            tokio::task::spawn_blocking(move || handle_worker(cmd))
                .await?
                .map_err(|e| e as Box<dyn std::error::Error>)?;
        }
        Commands::Queue { path, command } => {
            handle_queue(&path, command)?;
        }
        Commands::Run(run) => {
            handle_run(run).await?;
        }
    }

    Ok(())
}
