use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{PoolError, QueueError, Result};
use crate::fifo::PersistentQueue;
use crate::scheduler::job::{Job, WorkerMessage};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// `STARTING -> RUNNING(idle) <-> RUNNING(busy) -> {EXITED | DEAD}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Idle,
    Busy,
    /// The process ended with status 0 (idle timeout or shutdown sentinel).
    Exited,
    /// The process crashed, was killed, or could not be queried.
    Dead,
}

impl WorkerStatus {
    /// Whether the process is gone, cleanly or not.
    pub fn is_stopped(self) -> bool {
        matches!(self, WorkerStatus::Exited | WorkerStatus::Dead)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Starting => write!(f, "starting"),
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Exited => write!(f, "exited"),
            WorkerStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Path of a worker's private inbound queue: `{results}-{worker_id}`.
pub fn inbound_queue_path(results: &Path, worker_id: u64) -> PathBuf {
    let mut path = OsString::from(results.as_os_str());
    path.push(format!("-{worker_id}"));
    PathBuf::from(path)
}

/// One worker process and the queue it reads jobs from.
#[derive(Debug)]
pub struct WorkerHandle {
    id: u64,
    child: Child,
    inbound: PersistentQueue,
    status: WorkerStatus,
    current_job: Option<Uuid>,
}

impl WorkerHandle {
    /// Create the worker's inbound queue and start its process.
    pub fn spawn(id: u64, config: &PoolConfig, results: &Path) -> Result<Self> {
        let inbound = PersistentQueue::open_with(inbound_queue_path(results, id), config.queue.clone())?;
        // A previous run with the same id may have left work behind.
        inbound.clear()?;

        let child = Command::new(&config.worker_program)
            .args(&config.worker_args)
            .arg(results)
            .arg(id.to_string())
            .arg("--idle-timeout-ms")
            .arg(config.worker_idle_timeout.as_millis().to_string())
            .arg("--poll-ms")
            .arg(config.queue.poll_interval.as_millis().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| PoolError::Spawn {
                worker_id: id,
                source,
            })?;

        tracing::info!(worker_id = id, pid = child.id(), "Worker started");

        Ok(Self {
            id,
            child,
            inbound,
            status: WorkerStatus::Starting,
            current_job: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn current_job(&self) -> Option<Uuid> {
        self.current_job
    }

    pub fn inbound_path(&self) -> &Path {
        self.inbound.path()
    }

    /// Refresh liveness from the OS. Once stopped, a worker stays stopped.
    pub fn poll(&mut self) -> WorkerStatus {
        if self.status.is_stopped() {
            return self.status;
        }

        match self.child.try_wait() {
            Ok(None) => {
                if self.status == WorkerStatus::Starting {
                    self.status = WorkerStatus::Idle;
                }
            }
            Ok(Some(exit)) if exit.success() => {
                tracing::debug!(worker_id = self.id, pid = self.pid(), "Worker exited");
                self.status = WorkerStatus::Exited;
            }
            Ok(Some(exit)) => {
                tracing::warn!(worker_id = self.id, pid = self.pid(), exit = %exit, "Worker died");
                self.status = WorkerStatus::Dead;
            }
            Err(e) => {
                tracing::warn!(worker_id = self.id, error = %e, "Worker status unavailable, treating as dead");
                self.status = WorkerStatus::Dead;
            }
        }
        self.status
    }

    /// Push `job` onto this worker's queue and mark it busy.
    pub fn assign(&mut self, job: &Job) -> Result<()> {
        let payload = WorkerMessage::Run(job.clone()).encode()?;
        self.inbound.enqueue(&payload)?;
        self.status = WorkerStatus::Busy;
        self.current_job = Some(job.id);
        tracing::debug!(worker_id = self.id, job_id = %job.id, callable = %job.callable, "Job assigned");
        Ok(())
    }

    /// Whether messages are still waiting in the inbound queue. A worker only
    /// exits cleanly between jobs, so a job it was given but never took is
    /// still here; otherwise its result is already on the results queue.
    pub fn has_unclaimed_work(&self) -> bool {
        match self.inbound.count() {
            Ok(count) => count > 0,
            Err(e) => {
                tracing::warn!(worker_id = self.id, error = %e, "Cannot inspect worker queue");
                true
            }
        }
    }

    /// Clear the current allocation, returning the job id it held.
    pub fn complete(&mut self) -> Option<Uuid> {
        if self.status == WorkerStatus::Busy {
            self.status = WorkerStatus::Idle;
        }
        self.current_job.take()
    }

    /// Ask the worker to exit, wait up to `grace`, then kill it if needed.
    /// The inbound queue file is removed afterwards.
    pub fn shutdown(&mut self, grace: Duration) {
        self.request_exit();
        self.finish(grace);
    }

    /// Push the shutdown sentinel if the process is still running.
    pub fn request_exit(&mut self) {
        if self.poll().is_stopped() {
            return;
        }
        let sent = WorkerMessage::Shutdown
            .encode()
            .map_err(PoolError::from)
            .and_then(|bytes| Ok(self.inbound.enqueue(&bytes)?));
        if let Err(e) = sent {
            tracing::warn!(worker_id = self.id, error = %e, "Failed to send shutdown sentinel");
        }
    }

    /// Wait up to `grace` for the process to exit, kill it otherwise, and
    /// remove the inbound queue.
    pub fn finish(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while !self.poll().is_stopped() && Instant::now() < deadline {
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        if !self.status.is_stopped() {
            tracing::warn!(worker_id = self.id, pid = self.pid(), "Worker ignored shutdown, killing");
            self.kill();
        }

        match self.inbound.delete() {
            Ok(()) | Err(QueueError::Deleted) => {}
            Err(e) => {
                tracing::warn!(worker_id = self.id, error = %e, "Failed to remove worker queue");
            }
        }
        tracing::info!(worker_id = self.id, "Worker stopped");
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::warn!(worker_id = self.id, error = %e, "Failed to kill worker");
        }
        let _ = self.child.wait();
        self.status = WorkerStatus::Dead;
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.kill();
        }
    }
}
