//! Worker processes and the code that runs inside them.
//!
//! - [`WorkerHandle`]: the orchestrator's view of one spawned process and its
//!   private inbound queue (`{results}-{worker_id}`)
//! - [`run_worker`]: the loop a worker process runs
//! - [`Registry`]: callable id -> function table a worker dispatches through
//! - [`builtin`]: the callables the `fifopool` binary ships with
//!
//! # Execution Flow
//!
//! 1. Worker blocks on its inbound queue, exiting after the idle timeout
//! 2. A `run` message is looked up in the [`Registry`] and invoked
//! 3. The outcome is pushed to the shared results queue as a
//!    [`ResultEnvelope`](crate::scheduler::job::ResultEnvelope)
//! 4. The `shutdown` sentinel ends the loop

pub mod builtin;
pub mod executor;
pub mod handle;

pub use executor::{run_worker, Registry, WorkerArgs, WorkerExit};
pub use handle::{inbound_queue_path, WorkerHandle, WorkerStatus};
