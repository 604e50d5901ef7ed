pub mod job;
pub mod orchestrator;
pub mod queue;

pub use job::{Job, JobDeferred, JobFailure};
pub use orchestrator::Orchestrator;
pub use queue::PendingQueue;
