use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::jobqueue::Job;
use crate::store::JobStore;

/// In-memory job store. State is lost when the queue is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: HashMap<Uuid, Job>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut Job> {
        self.jobs.get_mut(&id).ok_or(QueueError::UnknownJob(id))
    }
}

impl JobStore for MemoryStore {
    fn insert(&mut self, job: Job) -> Result<()> {
        self.jobs.insert(job.id, job);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Option<&Job> {
        self.jobs.get(&id)
    }

    fn mark_started(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.get_mut(id)?.started_at = Some(at);
        Ok(())
    }

    fn mark_finished(
        &mut self,
        id: Uuid,
        result: Box<RawValue>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let job = self.get_mut(id)?;
        job.result = Some(result);
        job.finished_at = Some(at);
        Ok(())
    }

    fn mark_canceled(&mut self, id: Uuid) -> Result<()> {
        self.get_mut(id)?.canceled = true;
        Ok(())
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &Job> + '_> {
        Box::new(self.jobs.values())
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}
