//! Authoritative job state behind a pluggable interface.
//!
//! The queue owns exactly one store and serializes all access to it, so
//! implementations need no interior locking. Two backends are provided:
//! [`MemoryStore`] for tests and ephemeral deployments, and [`FsStore`],
//! which keeps one JSON document per job on disk and survives restarts.
//!
//! Mutation contract: a mutation must be durable before the in-memory view
//! changes. If the backend fails, the method returns an error and the
//! in-memory state is untouched, so callers observe either both effects or
//! neither.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::error::Result;
use crate::jobqueue::Job;

pub trait JobStore: Send {
    /// Persist a newly submitted job. The id is fresh, so this never
    /// replaces an existing record.
    fn insert(&mut self, job: Job) -> Result<()>;

    fn get(&self, id: Uuid) -> Option<&Job>;

    /// Record that a worker was handed the job.
    fn mark_started(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Record the job's result and completion time.
    fn mark_finished(&mut self, id: Uuid, result: Box<RawValue>, at: DateTime<Utc>)
        -> Result<()>;

    /// Set the cancellation flag.
    fn mark_canceled(&mut self, id: Uuid) -> Result<()>;

    /// All jobs, in no particular order. Used to rebuild the readiness and
    /// reverse-dependency indices when a queue is opened over an existing
    /// store.
    fn iter(&self) -> Box<dyn Iterator<Item = &Job> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
