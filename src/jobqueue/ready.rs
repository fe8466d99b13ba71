use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Ordered index of currently dispatchable jobs, one sequence per job type.
///
/// Keys are `(queued_at, id)`, so iteration within a type is FIFO by
/// submission time with the id as tie-break. Maintained incrementally under
/// the queue lock: jobs enter when they become dispatchable and leave when
/// claimed or canceled.
#[derive(Debug, Default)]
pub(crate) struct ReadyIndex {
    by_type: HashMap<String, BTreeSet<(DateTime<Utc>, Uuid)>>,
}

impl ReadyIndex {
    pub fn insert(&mut self, job_type: &str, queued_at: DateTime<Utc>, id: Uuid) {
        self.by_type
            .entry(job_type.to_string())
            .or_default()
            .insert((queued_at, id));
    }

    /// Remove an entry if present. Harmless when the job was never indexed.
    pub fn remove(&mut self, job_type: &str, queued_at: DateTime<Utc>, id: Uuid) {
        if let Some(entries) = self.by_type.get_mut(job_type) {
            entries.remove(&(queued_at, id));
            if entries.is_empty() {
                self.by_type.remove(job_type);
            }
        }
    }

    /// The FIFO-earliest dispatchable job among the accepted types, if any.
    pub fn peek_earliest(&self, job_types: &[&str]) -> Option<Uuid> {
        job_types
            .iter()
            .filter_map(|t| self.by_type.get(*t)?.first())
            .min()
            .map(|&(_, id)| id)
    }
}

/// Reverse-dependency edges plus outstanding-prerequisite counters.
///
/// `dependents` answers "who is waiting on this job" in O(degree), which
/// both finish (readiness re-evaluation) and cancel (cascade) need.
/// `outstanding` counts the distinct unfinished prerequisites of each job;
/// a job becomes a readiness candidate when its counter reaches zero.
#[derive(Debug, Default)]
pub(crate) struct DependentsIndex {
    dependents: HashMap<Uuid, HashSet<Uuid>>,
    outstanding: HashMap<Uuid, usize>,
}

impl DependentsIndex {
    /// Record a newly submitted job's edges. `dependencies` must already be
    /// de-duplicated; `unfinished` is how many of them have not finished.
    pub fn register<I>(&mut self, id: Uuid, dependencies: I, unfinished: usize)
    where
        I: IntoIterator<Item = Uuid>,
    {
        for dep in dependencies {
            self.dependents.entry(dep).or_default().insert(id);
        }
        self.outstanding.insert(id, unfinished);
    }

    pub fn dependents_of(&self, id: Uuid) -> Vec<Uuid> {
        self.dependents
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// One prerequisite of `id` finished; returns how many remain.
    pub fn prerequisite_finished(&mut self, id: Uuid) -> usize {
        let remaining = self.outstanding.entry(id).or_insert(0);
        *remaining = remaining.saturating_sub(1);
        *remaining
    }
}
