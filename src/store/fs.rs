use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::jobqueue::Job;
use crate::store::JobStore;

/// Durable job store: one JSON document per job in a directory.
///
/// Every mutation rewrites the affected job's document via a temp file,
/// fsync, and rename, so a crash leaves either the old record or the new
/// one, never a torn write. [`open`](Self::open) scans the directory and
/// reloads every record; the queue then rebuilds its indices from the
/// reloaded state.
#[derive(Debug)]
pub struct FsStore {
    dir: PathBuf,
    jobs: HashMap<Uuid, Job>,
}

impl FsStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut jobs = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = fs::read(&path)?;
            let job: Job = serde_json::from_slice(&data).map_err(invalid_record)?;
            tracing::debug!(job_id = %job.id, path = %path.display(), "Reloaded job record");
            jobs.insert(job.id, job);
        }
        tracing::info!(dir = %dir.display(), jobs = jobs.len(), "Opened job store");
        Ok(Self { dir, jobs })
    }

    fn persist(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_vec_pretty(job).map_err(invalid_record)?;
        let tmp = self.dir.join(format!(".{}.tmp", job.id));
        let dest = self.dir.join(format!("{}.json", job.id));

        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, &dest)?;
        Ok(())
    }

    /// Apply `update` to a copy of the record, persist it, and only then
    /// replace the in-memory record.
    fn update_job<F>(&mut self, id: Uuid, update: F) -> Result<()>
    where
        F: FnOnce(&mut Job),
    {
        let mut job = self
            .jobs
            .get(&id)
            .ok_or(QueueError::UnknownJob(id))?
            .clone();
        update(&mut job);
        self.persist(&job)?;
        self.jobs.insert(id, job);
        Ok(())
    }
}

impl JobStore for FsStore {
    fn insert(&mut self, job: Job) -> Result<()> {
        self.persist(&job)?;
        self.jobs.insert(job.id, job);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Option<&Job> {
        self.jobs.get(&id)
    }

    fn mark_started(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.update_job(id, |job| job.started_at = Some(at))
    }

    fn mark_finished(
        &mut self,
        id: Uuid,
        result: Box<RawValue>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.update_job(id, |job| {
            job.result = Some(result);
            job.finished_at = Some(at);
        })
    }

    fn mark_canceled(&mut self, id: Uuid) -> Result<()> {
        self.update_job(id, |job| job.canceled = true)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &Job> + '_> {
        Box::new(self.jobs.values())
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}

fn invalid_record(err: serde_json::Error) -> QueueError {
    QueueError::Backend(io::Error::new(io::ErrorKind::InvalidData, err))
}
