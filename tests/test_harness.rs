//! Shared helpers for queue and worker-pool integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fifopool::config::{PoolConfig, QueueOptions};
use fifopool::PersistentQueue;

/// The crate's own binary, which doubles as the worker program.
pub fn worker_program() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fifopool"))
}

/// Pool configuration with short timeouts for faster tests
pub fn test_pool_config(workers: usize) -> PoolConfig {
    PoolConfig::new(worker_program())
        .with_worker_arg("worker")
        .with_workers(workers)
        .with_result_wait(Duration::from_millis(200))
        .with_worker_idle_timeout(Duration::from_secs(30))
        .with_shutdown_grace(Duration::from_secs(5))
        .with_queue_options(fast_queue_options())
}

pub fn fast_queue_options() -> QueueOptions {
    QueueOptions::default().with_poll_interval(Duration::from_millis(10))
}

pub fn open_queue(dir: &Path, name: &str) -> PersistentQueue {
    PersistentQueue::open_with(dir.join(name), fast_queue_options()).unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Files left in `dir` (queue files should all be removed after a run).
pub fn leftover_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}
