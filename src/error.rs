use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by a [`PersistentQueue`](crate::fifo::PersistentQueue).
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to get lock: {0}")]
    Lock(#[source] std::io::Error),

    #[error("Index corrupt - rebuild required (start={start}, end={end}, count={count}, checksum={checksum})")]
    CorruptIndex {
        start: u32,
        end: u32,
        count: u32,
        checksum: u32,
    },

    #[error("Zero data length at offset {0}")]
    ZeroLengthRecord(u32),

    #[error("Record at offset {offset} runs past end of data ({end})")]
    CorruptRecord { offset: u32, end: u32 },

    #[error("No data")]
    EmptyPayload,

    #[error("Payload of {0} bytes exceeds the 65535 byte record limit")]
    PayloadTooLarge(usize),

    #[error("Queue file would exceed the 4 GiB addressable limit")]
    QueueFull,

    #[error("Queue has been deleted")]
    Deleted,
}

/// Misuse of a [`Deferred`](crate::deferred::Deferred).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredError {
    #[error("Deferred already fired")]
    AlreadyFired,

    #[error("Deferred not fired")]
    NotFired,
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot locate '{0}'")]
    WorkerProgramNotFound(PathBuf),

    #[error("Failed to spawn worker {worker_id}: {source}")]
    Spawn {
        worker_id: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Too many errors: worker error budget of {0} exhausted")]
    TooManyErrors(u32),
}

pub type Result<T> = std::result::Result<T, PoolError>;
