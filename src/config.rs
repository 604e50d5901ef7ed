use std::path::PathBuf;
use std::time::Duration;

/// Bytes of dequeued data allowed to accumulate at the head of a queue file
/// before the live records are shifted down.
pub const DEFAULT_COMPACT_THRESHOLD: u32 = 8192;

/// Tuning for a single [`PersistentQueue`](crate::fifo::PersistentQueue) handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Sleep between polls in `blocking_dequeue`.
    pub poll_interval: Duration,
    /// Compact once the unused prefix exceeds this many bytes.
    /// Zero compacts on every dequeue that does not drain the queue.
    pub compact_threshold: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl QueueOptions {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_compact_threshold(mut self, bytes: u32) -> Self {
        self.compact_threshold = bytes;
        self
    }
}

/// Configuration for an [`Orchestrator`](crate::scheduler::Orchestrator) and
/// the worker processes it spawns.
///
/// Each worker is started as
/// `worker_program [worker_args..] <results-queue> <worker-id> --idle-timeout-ms <ms> --poll-ms <ms>`.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Executable that runs the worker loop.
    pub worker_program: PathBuf,
    /// Arguments placed before the positional worker arguments (e.g. a subcommand).
    pub worker_args: Vec<String>,
    /// Number of worker processes kept alive.
    pub workers: usize,
    /// Each abnormal worker exit spends one unit; the run aborts when the
    /// last unit is spent. Clean idle exits are free.
    pub error_budget: u32,
    /// Upper bound on one blocking read of the results queue per loop iteration.
    pub result_wait: Duration,
    /// Workers exit after this long without receiving work.
    pub worker_idle_timeout: Duration,
    /// How long shutdown waits for a worker to exit before killing it.
    pub shutdown_grace: Duration,
    pub queue: QueueOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_program: PathBuf::new(),
            worker_args: Vec::new(),
            workers: 2,
            error_budget: 10,
            result_wait: Duration::from_secs(5),
            worker_idle_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
            queue: QueueOptions::default(),
        }
    }
}

impl PoolConfig {
    pub fn new(worker_program: impl Into<PathBuf>) -> Self {
        Self {
            worker_program: worker_program.into(),
            ..Default::default()
        }
    }

    pub fn with_worker_arg(mut self, arg: impl Into<String>) -> Self {
        self.worker_args.push(arg.into());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_error_budget(mut self, budget: u32) -> Self {
        self.error_budget = budget;
        self
    }

    pub fn with_result_wait(mut self, wait: Duration) -> Self {
        self.result_wait = wait;
        self
    }

    pub fn with_worker_idle_timeout(mut self, timeout: Duration) -> Self {
        self.worker_idle_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_queue_options(mut self, queue: QueueOptions) -> Self {
        self.queue = queue;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_options_default() {
        let opts = QueueOptions::default();
        assert_eq!(opts.poll_interval, Duration::from_millis(100));
        assert_eq!(opts.compact_threshold, 8192);
    }

    #[test]
    fn queue_options_builders() {
        let opts = QueueOptions::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_compact_threshold(0);
        assert_eq!(opts.poll_interval, Duration::from_millis(5));
        assert_eq!(opts.compact_threshold, 0);
    }

    #[test]
    fn pool_config_default() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.error_budget, 10);
        assert_eq!(cfg.result_wait, Duration::from_secs(5));
        assert_eq!(cfg.worker_idle_timeout, Duration::from_secs(60));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(5));
        assert!(cfg.worker_args.is_empty());
        assert_eq!(cfg.queue, QueueOptions::default());
    }

    #[test]
    fn pool_config_new() {
        let cfg = PoolConfig::new("/usr/bin/fifopool").with_worker_arg("worker");
        assert_eq!(cfg.worker_program, PathBuf::from("/usr/bin/fifopool"));
        assert_eq!(cfg.worker_args, vec!["worker".to_string()]);
        assert_eq!(cfg.workers, 2);
    }

    #[test]
    fn pool_config_builders() {
        let cfg = PoolConfig::new("w")
            .with_workers(4)
            .with_error_budget(3)
            .with_result_wait(Duration::from_millis(250))
            .with_worker_idle_timeout(Duration::from_secs(2))
            .with_shutdown_grace(Duration::from_secs(1));
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.error_budget, 3);
        assert_eq!(cfg.result_wait, Duration::from_millis(250));
        assert_eq!(cfg.worker_idle_timeout, Duration::from_secs(2));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(1));
    }
}
