pub mod config;
pub mod deferred;
pub mod error;
pub mod fifo;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use deferred::{Deferred, DeferredGroup};
pub use error::{DeferredError, PoolError, QueueError, Result};
pub use fifo::PersistentQueue;
pub use scheduler::{Job, JobDeferred, JobFailure, Orchestrator};
