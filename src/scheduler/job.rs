use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::deferred::Deferred;

/// Structured failure carried back from a worker in place of an exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: String,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Pending result of one submitted job.
pub type JobDeferred = Deferred<Value, JobFailure>;

/// A call to run on some worker. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub callable: String,
    pub args: Vec<Value>,
}

impl Job {
    pub fn new(callable: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            callable: callable.into(),
            args,
        }
    }
}

/// Payload pushed onto a worker's inbound queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Run(Job),
    /// Sentinel: finish the loop and exit.
    Shutdown,
}

impl WorkerMessage {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "payload", rename_all = "snake_case")]
pub enum Outcome {
    Success(Value),
    Failure(JobFailure),
}

impl From<Result<Value, JobFailure>> for Outcome {
    fn from(result: Result<Value, JobFailure>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(failure) => Outcome::Failure(failure),
        }
    }
}

/// What a worker pushes onto the shared results queue after running a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub worker_id: u64,
    pub job_id: Uuid,
    pub outcome: Outcome,
}

impl ResultEnvelope {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_ids_are_unique() {
        let a = Job::new("hi", vec![json!("Andy")]);
        let b = Job::new("hi", vec![json!("Andy")]);
        assert_ne!(a.id, b.id);
        assert_eq!(a.callable, "hi");
    }

    #[test]
    fn sentinel_is_distinct_from_jobs() {
        let bytes = WorkerMessage::Shutdown.encode().unwrap();
        assert_eq!(bytes, br#"{"type":"shutdown"}"#);
        assert_eq!(WorkerMessage::decode(&bytes).unwrap(), WorkerMessage::Shutdown);
    }

    #[test]
    fn run_message_carries_job_fields() {
        let job = Job::new("add", vec![json!(1), json!(2)]);
        let bytes = WorkerMessage::Run(job.clone()).encode().unwrap();
        let encoded: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(encoded["type"], "run");
        assert_eq!(encoded["callable"], "add");
        assert_eq!(encoded["args"], json!([1, 2]));
        assert_eq!(encoded["id"], json!(job.id.to_string()));
    }

    #[test]
    fn failure_envelope_layout() {
        let envelope = ResultEnvelope {
            worker_id: 7,
            job_id: Uuid::nil(),
            outcome: Outcome::Failure(JobFailure::new("JobError", "Test Exception")),
        };
        let encoded: Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(encoded["worker_id"], 7);
        assert_eq!(encoded["outcome"]["outcome"], "failure");
        assert_eq!(encoded["outcome"]["payload"]["kind"], "JobError");
        assert_eq!(encoded["outcome"]["payload"]["message"], "Test Exception");

        let decoded = ResultEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn job_failure_display() {
        let failure = JobFailure::new("Panic", "boom");
        assert_eq!(failure.to_string(), "Panic: boom");
    }
}
