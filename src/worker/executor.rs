use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use crate::config::QueueOptions;
use crate::error::{QueueError, Result};
use crate::fifo::PersistentQueue;
use crate::scheduler::job::{JobFailure, Outcome, ResultEnvelope, WorkerMessage};
use crate::worker::handle::inbound_queue_path;

/// A job body callable by name from another process.
pub type JobFn = Box<dyn Fn(&[Value]) -> std::result::Result<Value, JobFailure> + Send + Sync>;

/// Callable id -> function table, populated when a worker boots.
#[derive(Default)]
pub struct Registry {
    functions: HashMap<String, JobFn>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("functions", &names).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, JobFailure> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Box::new(function));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Run `name` with `args`. Unknown names and panics come back as failures.
    pub fn invoke(&self, name: &str, args: &[Value]) -> std::result::Result<Value, JobFailure> {
        let function = self.functions.get(name).ok_or_else(|| {
            JobFailure::new("UnknownCallable", format!("No callable registered as '{name}'"))
        })?;

        match panic::catch_unwind(AssertUnwindSafe(|| function(args))) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "job panicked".to_string());
                Err(JobFailure::new("Panic", message))
            }
        }
    }
}

/// Arguments a worker process is started with.
#[derive(Debug, Clone)]
pub struct WorkerArgs {
    pub results_path: PathBuf,
    pub worker_id: u64,
    /// Exit after this long without work. Zero waits forever.
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
}

/// Why a worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Shutdown,
    IdleTimeout,
}

/// Worker main loop: take jobs from the private inbound queue, run them, and
/// push a [`ResultEnvelope`] for each onto the shared results queue.
pub fn run_worker(registry: &Registry, args: &WorkerArgs) -> Result<WorkerExit> {
    let options = QueueOptions::default().with_poll_interval(args.poll_interval);
    let inbound = PersistentQueue::open_with(
        inbound_queue_path(&args.results_path, args.worker_id),
        options.clone(),
    )?;
    let results = PersistentQueue::open_with(&args.results_path, options)?;

    tracing::debug!(worker_id = args.worker_id, queue = %inbound, "Worker loop started");

    loop {
        let Some(bytes) = inbound.blocking_dequeue(args.idle_timeout)? else {
            tracing::info!(worker_id = args.worker_id, "No work received, exiting");
            return Ok(WorkerExit::IdleTimeout);
        };

        let job = match WorkerMessage::decode(&bytes) {
            Ok(WorkerMessage::Run(job)) => job,
            Ok(WorkerMessage::Shutdown) => {
                tracing::debug!(worker_id = args.worker_id, "Shutdown requested");
                return Ok(WorkerExit::Shutdown);
            }
            Err(e) => {
                tracing::warn!(worker_id = args.worker_id, error = %e, "Discarding malformed message");
                continue;
            }
        };

        tracing::debug!(worker_id = args.worker_id, job_id = %job.id, callable = %job.callable, "Executing");
        let result = registry.invoke(&job.callable, &job.args);
        if let Err(failure) = &result {
            tracing::debug!(worker_id = args.worker_id, job_id = %job.id, failure = %failure, "Job failed");
        }

        let envelope = ResultEnvelope {
            worker_id: args.worker_id,
            job_id: job.id,
            outcome: Outcome::from(result),
        };
        publish(&results, envelope)?;
    }
}

/// Push a result, replacing it with a failure if it cannot fit in one record.
fn publish(results: &PersistentQueue, envelope: ResultEnvelope) -> Result<()> {
    match results.enqueue(&envelope.encode()?) {
        Err(QueueError::PayloadTooLarge(size)) => {
            let replacement = ResultEnvelope {
                outcome: Outcome::Failure(JobFailure::new(
                    "ResultTooLarge",
                    format!("encoded result of {size} bytes exceeds the record limit"),
                )),
                ..envelope
            };
            results.enqueue(&replacement.encode()?)?;
            Ok(())
        }
        other => {
            other?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::scheduler::job::Job;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register("double", |args| {
                let n = args.first().and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(n * 2))
            })
            .register("boom", |_| panic!("kaboom"))
            .register("huge", |_| Ok(json!("x".repeat(70_000))));
        registry
    }

    #[test]
    fn invoke_runs_registered_function() {
        assert_eq!(registry().invoke("double", &[json!(21)]), Ok(json!(42)));
    }

    #[test]
    fn unknown_callable_fails() {
        let failure = registry().invoke("missing", &[]).unwrap_err();
        assert_eq!(failure.kind, "UnknownCallable");
    }

    #[test]
    fn panic_becomes_failure() {
        let failure = registry().invoke("boom", &[]).unwrap_err();
        assert_eq!(failure.kind, "Panic");
        assert_eq!(failure.message, "kaboom");
    }

    #[test]
    fn worker_loop_processes_until_sentinel() {
        let dir = TempDir::new().unwrap();
        let results_path = dir.path().join("results.fifo");
        let args = WorkerArgs {
            results_path: results_path.clone(),
            worker_id: 1,
            idle_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
        };

        let inbound = PersistentQueue::open(inbound_queue_path(&results_path, 1)).unwrap();
        let job = Job::new("double", vec![json!(4)]);
        let huge = Job::new("huge", vec![]);
        inbound.enqueue(&WorkerMessage::Run(job.clone()).encode().unwrap()).unwrap();
        inbound.enqueue(b"not json").unwrap();
        inbound.enqueue(&WorkerMessage::Run(huge.clone()).encode().unwrap()).unwrap();
        inbound.enqueue(&WorkerMessage::Shutdown.encode().unwrap()).unwrap();

        assert_eq!(run_worker(&registry(), &args).unwrap(), WorkerExit::Shutdown);

        let results = PersistentQueue::open(&results_path).unwrap();
        let first = ResultEnvelope::decode(&results.dequeue().unwrap().unwrap()).unwrap();
        assert_eq!(first.worker_id, 1);
        assert_eq!(first.job_id, job.id);
        assert_eq!(first.outcome, Outcome::Success(json!(8)));

        let second = ResultEnvelope::decode(&results.dequeue().unwrap().unwrap()).unwrap();
        assert_eq!(second.job_id, huge.id);
        assert!(matches!(second.outcome, Outcome::Failure(ref f) if f.kind == "ResultTooLarge"));
        assert!(results.is_empty().unwrap());
    }

    #[test]
    fn worker_loop_exits_when_idle() {
        let dir = TempDir::new().unwrap();
        let args = WorkerArgs {
            results_path: dir.path().join("results.fifo"),
            worker_id: 2,
            idle_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        };
        assert_eq!(run_worker(&registry(), &args).unwrap(), WorkerExit::IdleTimeout);
    }
}
