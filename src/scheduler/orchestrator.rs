use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::{PoolError, QueueError, Result};
use crate::fifo::PersistentQueue;
use crate::scheduler::job::{Job, JobDeferred, JobFailure, Outcome, ResultEnvelope};
use crate::scheduler::queue::{PendingQueue, QueuedJob};
use crate::worker::{WorkerHandle, WorkerStatus};

/// Runs submitted jobs on a pool of worker processes.
///
/// Jobs wait in an in-memory [`PendingQueue`] until a worker is idle, then go
/// onto that worker's private file queue. Workers answer through one shared
/// results queue. A worker that dies is replaced and its job goes back to the
/// front of the pending list; each death spends one unit of
/// [`PoolConfig::error_budget`], and the run aborts on the death that spends
/// the last unit. Workers that exit cleanly after their idle timeout cost
/// nothing and are restarted only when work is waiting.
///
/// A job too large for one queue record is rejected with a `PayloadTooLarge`
/// failure without affecting the rest of the run.
///
/// The loop is single-threaded; parallelism comes from the worker processes.
pub struct Orchestrator {
    config: PoolConfig,
    results: PersistentQueue,
    workers: BTreeMap<u64, WorkerHandle>,
    pending: PendingQueue,
    /// worker id -> job in flight on that worker
    allocated: HashMap<u64, QueuedJob>,
    next_worker_id: u64,
    errors_remaining: u32,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Open (and clear) the shared results queue and start the workers.
    pub fn new(config: PoolConfig, results_path: impl AsRef<Path>) -> Result<Self> {
        if !config.worker_program.is_file() {
            return Err(PoolError::WorkerProgramNotFound(config.worker_program.clone()));
        }

        let results = PersistentQueue::open_with(results_path, config.queue.clone())?;
        // Envelopes left by an earlier run would match the wrong allocations.
        results.clear()?;

        let mut orchestrator = Self {
            errors_remaining: config.error_budget,
            config,
            results,
            workers: BTreeMap::new(),
            pending: PendingQueue::new(),
            allocated: HashMap::new(),
            next_worker_id: 1,
            shutdown: CancellationToken::new(),
        };

        let count = orchestrator.config.workers.max(1);
        tracing::info!(workers = count, results = %orchestrator.results, "Starting workers");
        for _ in 0..count {
            orchestrator.add_worker()?;
        }
        Ok(orchestrator)
    }

    /// Queue `callable(args..)` and return the deferred its result will fire.
    pub fn submit(&mut self, callable: impl Into<String>, args: Vec<Value>) -> JobDeferred {
        self.submit_job(Job::new(callable, args))
    }

    pub fn submit_job(&mut self, job: Job) -> JobDeferred {
        let deferred = JobDeferred::new();
        tracing::debug!(job_id = %job.id, callable = %job.callable, "Job submitted");
        self.pending.push(job, deferred.clone());
        deferred
    }

    /// Token that stops the loop at the start of its next iteration.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request a graceful stop. In-flight jobs are not interrupted.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn results_path(&self) -> &Path {
        self.results.path()
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending.len()
    }

    pub fn busy_workers(&self) -> usize {
        self.allocated.len()
    }

    pub fn errors_remaining(&self) -> u32 {
        self.errors_remaining
    }

    pub fn workers(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers.values()
    }

    /// Process jobs until none are pending or running, or until shutdown is
    /// requested. Workers are always stopped and the results queue removed
    /// before this returns, including on a fatal error.
    pub fn run(mut self) -> Result<()> {
        tracing::info!(pending = self.pending.len(), "Starting to process jobs");

        let outcome = self.process();
        if let Err(e) = &outcome {
            tracing::error!(error = %e, "Aborting run");
        }
        self.teardown();
        outcome
    }

    fn process(&mut self) -> Result<()> {
        while !self.shutdown.is_cancelled() {
            self.schedule()?;

            if self.allocated.is_empty() {
                if self.pending.is_empty() {
                    tracing::debug!("No more work");
                    break;
                }
                // Every worker is starting or was just replaced.
                thread::sleep(self.config.queue.poll_interval);
                continue;
            }

            tracing::debug!(busy = self.allocated.len(), pending = self.pending.len(), "Waiting for results");
            self.collect_result()?;
        }
        Ok(())
    }

    /// Check every worker: hand idle ones the oldest pending job, replace dead
    /// ones, retire ones that exited, and restart workers if jobs are waiting.
    fn schedule(&mut self) -> Result<()> {
        let ids: Vec<u64> = self.workers.keys().copied().collect();

        for id in ids {
            let Some(worker) = self.workers.get_mut(&id) else {
                continue;
            };

            match worker.poll() {
                WorkerStatus::Dead => self.replace_dead_worker(id)?,
                WorkerStatus::Exited => self.retire_worker(id),
                WorkerStatus::Idle => self.dispatch(id)?,
                WorkerStatus::Starting | WorkerStatus::Busy => {}
            }
        }

        let target = self.config.workers.max(1);
        while !self.pending.is_empty() && self.workers.len() < target {
            self.add_worker()?;
        }
        Ok(())
    }

    /// Give the oldest pending job that fits in a queue record to worker `id`.
    fn dispatch(&mut self, id: u64) -> Result<()> {
        while let Some(queued) = self.pending.pop() {
            let Some(worker) = self.workers.get_mut(&id) else {
                self.pending.requeue(queued);
                return Ok(());
            };

            match worker.assign(&queued.job) {
                Ok(()) => {
                    tracing::info!(worker_id = id, job_id = %queued.job.id, "Assigning work");
                    self.allocated.insert(id, queued);
                    return Ok(());
                }
                Err(PoolError::Queue(QueueError::PayloadTooLarge(size))) => {
                    tracing::warn!(job_id = %queued.job.id, size, "Job too large for a queue record");
                    let failure = JobFailure::new(
                        "PayloadTooLarge",
                        format!("encoded job of {size} bytes exceeds the record limit"),
                    );
                    if let Err(e) = queued.deferred.reject(failure) {
                        tracing::warn!(job_id = %queued.job.id, error = %e, "Job already finished");
                    }
                }
                Err(e) => {
                    self.pending.requeue(queued);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn replace_dead_worker(&mut self, id: u64) -> Result<()> {
        self.errors_remaining = self.errors_remaining.saturating_sub(1);
        if self.errors_remaining == 0 {
            tracing::error!(worker_id = id, "Too many errors, shutting down");
            return Err(PoolError::TooManyErrors(self.config.error_budget));
        }
        tracing::warn!(
            worker_id = id,
            errors_remaining = self.errors_remaining,
            "Worker died - replacing"
        );

        if let Some(mut dead) = self.workers.remove(&id) {
            dead.finish(Duration::ZERO);
        }
        if let Some(queued) = self.allocated.remove(&id) {
            tracing::info!(worker_id = id, job_id = %queued.job.id, "Requeuing job from dead worker");
            self.pending.requeue(queued);
        }
        self.add_worker()
    }

    /// Drop a worker that exited on its own. If it never took its job the job
    /// goes back to the front of the pending list; otherwise the allocation
    /// stays until its result is read.
    fn retire_worker(&mut self, id: u64) {
        let Some(mut worker) = self.workers.remove(&id) else {
            return;
        };
        tracing::debug!(worker_id = id, "Worker exited, not replacing until work is pending");

        if self.allocated.contains_key(&id) && worker.has_unclaimed_work() {
            if let Some(queued) = self.allocated.remove(&id) {
                tracing::info!(worker_id = id, job_id = %queued.job.id, "Requeuing job from exited worker");
                self.pending.requeue(queued);
            }
        }
        worker.finish(Duration::ZERO);
    }

    fn add_worker(&mut self) -> Result<()> {
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        let worker = WorkerHandle::spawn(id, &self.config, self.results.path())?;
        self.workers.insert(id, worker);
        Ok(())
    }

    /// Wait a bounded time for one result and fire the matching deferred.
    fn collect_result(&mut self) -> Result<()> {
        let wait = self.config.result_wait.max(Duration::from_millis(1));
        let Some(bytes) = self.results.blocking_dequeue(wait)? else {
            return Ok(());
        };

        let envelope = match ResultEnvelope::decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed result");
                return Ok(());
            }
        };

        let worker_id = envelope.worker_id;
        let Some(queued) = self.allocated.remove(&worker_id) else {
            tracing::warn!(worker_id, job_id = %envelope.job_id, "Discarding result from unallocated worker");
            return Ok(());
        };
        if queued.job.id != envelope.job_id {
            tracing::warn!(
                worker_id,
                expected = %queued.job.id,
                received = %envelope.job_id,
                "Discarding result for a different job"
            );
            self.allocated.insert(worker_id, queued);
            return Ok(());
        }

        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.complete();
        }

        let job_id = queued.job.id;
        let fired = match envelope.outcome {
            Outcome::Success(value) => {
                tracing::info!(worker_id, job_id = %job_id, "Job completed");
                queued.deferred.resolve(value)
            }
            Outcome::Failure(failure) => {
                tracing::info!(worker_id, job_id = %job_id, failure = %failure, "Job failed");
                queued.deferred.reject(failure)
            }
        };
        if let Err(e) = fired {
            tracing::warn!(job_id = %job_id, error = %e, "Result arrived for a job that already finished");
        }
        Ok(())
    }

    fn teardown(&mut self) {
        tracing::info!("Shutting down");

        for worker in self.workers.values_mut() {
            worker.request_exit();
        }
        for (_, mut worker) in std::mem::take(&mut self.workers) {
            worker.finish(self.config.shutdown_grace);
        }

        match self.results.delete() {
            Ok(()) | Err(QueueError::Deleted) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to remove results queue"),
        }

        if !self.pending.is_empty() || !self.allocated.is_empty() {
            tracing::warn!(
                pending = self.pending.len(),
                in_flight = self.allocated.len(),
                "Stopped with unfinished jobs"
            );
        }
        tracing::debug!("Everything cleanly shutdown");
    }
}
