use std::collections::VecDeque;

use crate::scheduler::job::{Job, JobDeferred};

/// A job together with the deferred its submitter is holding.
#[derive(Debug)]
pub struct QueuedJob {
    pub job: Job,
    pub deferred: JobDeferred,
}

/// In-process FIFO of jobs not yet handed to a worker.
#[derive(Debug, Default)]
pub struct PendingQueue {
    jobs: VecDeque<QueuedJob>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a newly submitted job at the back.
    pub fn push(&mut self, job: Job, deferred: JobDeferred) {
        self.jobs.push_back(QueuedJob { job, deferred });
    }

    /// Put a job recovered from a dead worker back at the front, ahead of
    /// everything that was submitted after it.
    pub fn requeue(&mut self, queued: QueuedJob) {
        self.jobs.push_front(queued);
    }

    /// Take the oldest job.
    pub fn pop(&mut self) -> Option<QueuedJob> {
        self.jobs.pop_front()
    }

    pub fn peek(&self) -> Option<&Job> {
        self.jobs.front().map(|queued| &queued.job)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(name: &str) -> Job {
        Job::new("hi", vec![json!(name)])
    }

    #[test]
    fn pops_in_submission_order() {
        let mut queue = PendingQueue::new();
        queue.push(job("a"), JobDeferred::new());
        queue.push(job("b"), JobDeferred::new());

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().job.args, vec![json!("a")]);
        assert_eq!(queue.pop().unwrap().job.args, vec![json!("b")]);
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn requeued_job_goes_first() {
        let mut queue = PendingQueue::new();
        queue.push(job("a"), JobDeferred::new());
        queue.push(job("b"), JobDeferred::new());

        let in_flight = queue.pop().unwrap();
        let id = in_flight.job.id;
        queue.push(job("c"), JobDeferred::new());
        queue.requeue(in_flight);

        assert_eq!(queue.peek().map(|j| j.id), Some(id));
        assert_eq!(queue.len(), 3);
    }
}
