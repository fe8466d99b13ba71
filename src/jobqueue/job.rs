use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

/// A unit of work tracked by the queue.
///
/// The descriptor fields (`id`, `job_type`, `args`, `dependencies`,
/// `queued_at`) are immutable after submission; the lifecycle fields
/// advance monotonically: `started_at` and `finished_at` are set at most
/// once, `canceled` flips to `true` at most once.
///
/// Args and results are opaque to the queue. They are validated to be
/// well-formed JSON and stored verbatim, so the bytes a worker reads back
/// are the bytes the submitter wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub args: Box<RawValue>,
    pub dependencies: Vec<Uuid>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub canceled: bool,
    pub result: Option<Box<RawValue>>,
}

impl Job {
    pub fn new(
        id: Uuid,
        job_type: String,
        args: Box<RawValue>,
        dependencies: Vec<Uuid>,
        queued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_type,
            args,
            dependencies,
            queued_at,
            started_at: None,
            finished_at: None,
            canceled: false,
            result: None,
        }
    }

    /// A worker has claimed this job and not yet reported it finished.
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.finished_at.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Point-in-time snapshot of a job's lifecycle, as returned by
/// [`JobQueue::status`](crate::JobQueue::status).
///
/// `None` timestamps mean the job has not reached that stage yet; `result`
/// is `None` until the job finishes.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub result: Option<Box<RawValue>>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub canceled: bool,
    pub dependencies: Vec<Uuid>,
}

impl JobStatus {
    pub(crate) fn snapshot(job: &Job) -> Self {
        Self {
            result: job.result.clone(),
            queued_at: job.queued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            canceled: job.canceled,
            dependencies: job.dependencies.clone(),
        }
    }
}

/// Descriptor handed to a worker by [`JobQueue::dequeue`](crate::JobQueue::dequeue).
///
/// The dependency list lets the worker look up results of prerequisite
/// jobs it may need.
#[derive(Debug, Clone)]
pub struct Dequeued {
    pub id: Uuid,
    pub dependencies: Vec<Uuid>,
    pub job_type: String,
    pub args: Box<RawValue>,
}
