//! The public face of the queue: submit, dequeue, finish, cancel, status,
//! and args, safe under any number of concurrent callers.
//!
//! All state lives behind a single mutex (store, readiness index, reverse
//! dependencies). Critical sections are short and never cross an await
//! point; the one suspending operation, [`JobQueue::dequeue`], parks on a
//! broadcast [`Notify`] while the lock is released and re-checks the
//! readiness index on every wakeup.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::value::{to_raw_value, RawValue};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::id::IdGenerator;
use crate::jobqueue::job::{Dequeued, Job, JobStatus};
use crate::jobqueue::ready::{DependentsIndex, ReadyIndex};
use crate::store::{JobStore, MemoryStore};

struct QueueState {
    store: Box<dyn JobStore>,
    ready: ReadyIndex,
    deps: DependentsIndex,
    last_queued_at: Option<DateTime<Utc>>,
}

/// A dependency-aware job queue.
///
/// Jobs are submitted with a type, opaque JSON arguments, and an optional
/// set of prerequisite jobs. Workers block on [`dequeue`](Self::dequeue)
/// for the types they understand; a job is handed out only once all of its
/// prerequisites have finished, FIFO by submission time within the
/// accepted types. Cancellation cascades to transitive dependents.
///
/// Share the queue across tasks by wrapping it in an `Arc`.
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    ids: IdGenerator,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// An ephemeral queue backed by [`MemoryStore`].
    pub fn new() -> Self {
        Self::with_store(Box::new(MemoryStore::new()))
    }

    /// A queue over an existing store. The readiness and reverse-dependency
    /// indices are rebuilt in a single pass over all stored jobs, so a
    /// durable backend resumes where it left off: unclaimed jobs whose
    /// prerequisites have finished are dispatchable again, running jobs
    /// stay running and can still be finished.
    pub fn with_store(store: Box<dyn JobStore>) -> Self {
        let mut ready = ReadyIndex::default();
        let mut deps = DependentsIndex::default();
        let mut last_queued_at = None;

        for job in store.iter() {
            if last_queued_at.map_or(true, |last| job.queued_at > last) {
                last_queued_at = Some(job.queued_at);
            }
            let mut distinct = HashSet::new();
            let mut unfinished = 0;
            for dep in &job.dependencies {
                if !distinct.insert(*dep) {
                    continue;
                }
                if store.get(*dep).map_or(true, |d| !d.is_finished()) {
                    unfinished += 1;
                }
            }
            deps.register(job.id, distinct, unfinished);
            if unfinished == 0 && job.started_at.is_none() && !job.canceled {
                ready.insert(&job.job_type, job.queued_at, job.id);
            }
        }

        Self {
            state: Mutex::new(QueueState {
                store,
                ready,
                deps,
                last_queued_at,
            }),
            notify: Notify::new(),
            ids: IdGenerator,
        }
    }

    /// Submit a job.
    ///
    /// `args` must serialize cleanly to JSON and fit `job_type`: a worker
    /// dequeuing that type must know the format. All dependencies must
    /// already exist; the job is not dispatched until every one of them has
    /// finished. If a dependency is already canceled, the new job is
    /// admitted pre-canceled, since it can never become dispatchable.
    ///
    /// Returns the id of the new job.
    pub fn submit<T>(&self, job_type: &str, args: &T, dependencies: &[Uuid]) -> Result<Uuid>
    where
        T: Serialize + ?Sized,
    {
        if job_type.is_empty() || !job_type.is_ascii() {
            return Err(QueueError::BadArgs(format!(
                "job type must be non-empty ASCII, got {job_type:?}"
            )));
        }
        let args = to_raw_value(args).map_err(|e| QueueError::BadArgs(e.to_string()))?;

        let mut state = self.lock_state();

        let mut distinct = HashSet::new();
        let mut unfinished = 0;
        let mut dep_canceled = false;
        for dep in dependencies {
            let dep_job = state
                .store
                .get(*dep)
                .ok_or(QueueError::UnknownDependency(*dep))?;
            if !distinct.insert(*dep) {
                continue;
            }
            dep_canceled |= dep_job.canceled;
            if !dep_job.is_finished() {
                unfinished += 1;
            }
        }

        let id = self.ids.next_id();
        let queued_at = next_queued_at(state.last_queued_at);
        let mut job = Job::new(id, job_type.to_string(), args, dependencies.to_vec(), queued_at);
        job.canceled = dep_canceled;

        state.store.insert(job)?;
        state.last_queued_at = Some(queued_at);
        state.deps.register(id, distinct, unfinished);

        let dispatchable = unfinished == 0 && !dep_canceled;
        if dispatchable {
            state.ready.insert(job_type, queued_at, id);
        }
        drop(state);

        if dispatchable {
            self.notify.notify_waiters();
        }
        tracing::info!(job_id = %id, job_type, dispatchable, "Job submitted");
        Ok(id)
    }

    /// Dequeue a job, blocking until one is available.
    ///
    /// Waits until a dispatchable job with a type in `job_types` exists,
    /// atomically marks it running, and returns its descriptor. Among
    /// dispatchable jobs of accepted types, the earliest-submitted wins.
    ///
    /// Returns [`QueueError::Canceled`] if `cancel` fires before a job was
    /// claimed; a claim that races the token stands, and the job is then
    /// the caller's to finish.
    pub async fn dequeue(
        &self,
        job_types: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Dequeued> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            {
                let mut state = self.lock_state();
                if let Some(descriptor) = Self::claim_next(&mut state, job_types)? {
                    tracing::debug!(job_id = %descriptor.id, job_type = %descriptor.job_type, "Job claimed");
                    return Ok(descriptor);
                }
                // Register as a waiter while still holding the lock, so a
                // broadcast between unlock and await cannot be lost.
                notified.as_mut().enable();
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(QueueError::Canceled),
            }
        }
    }

    fn claim_next(state: &mut QueueState, job_types: &[&str]) -> Result<Option<Dequeued>> {
        let Some(id) = state.ready.peek_earliest(job_types) else {
            return Ok(None);
        };
        let (job_type, queued_at) = {
            let job = state.store.get(id).expect("ready job missing from store");
            (job.job_type.clone(), job.queued_at)
        };
        // Durable first: if the backend rejects the claim, the job stays in
        // the readiness index and remains claimable.
        state.store.mark_started(id, Utc::now())?;
        state.ready.remove(&job_type, queued_at, id);

        let job = state.store.get(id).expect("ready job missing from store");
        Ok(Some(Dequeued {
            id,
            dependencies: job.dependencies.clone(),
            job_type,
            args: job.args.clone(),
        }))
    }

    /// Report a claimed job as finished, recording its result.
    ///
    /// `result` must serialize cleanly to JSON. Fails with
    /// [`QueueError::NotRunning`] if the job was never claimed or has
    /// already finished. Dependents whose last outstanding prerequisite
    /// this was become dispatchable, and waiting workers are woken.
    ///
    /// Finishing a job that was canceled while running still succeeds and
    /// records the result; its dependents remain canceled.
    pub fn finish<T>(&self, id: Uuid, result: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let result = to_raw_value(result).map_err(|e| QueueError::BadArgs(e.to_string()))?;

        let mut state = self.lock_state();
        let job = state.store.get(id).ok_or(QueueError::UnknownJob(id))?;
        if !job.is_running() {
            return Err(QueueError::NotRunning(id));
        }
        state.store.mark_finished(id, result, Utc::now())?;

        let mut woke_any = false;
        for dependent in state.deps.dependents_of(id) {
            if state.deps.prerequisite_finished(dependent) > 0 {
                continue;
            }
            let now_ready = match state.store.get(dependent) {
                Some(dep) if !dep.canceled && dep.started_at.is_none() => {
                    Some((dep.job_type.clone(), dep.queued_at))
                }
                _ => None,
            };
            if let Some((dep_type, dep_queued_at)) = now_ready {
                state.ready.insert(&dep_type, dep_queued_at, dependent);
                woke_any = true;
            }
        }
        drop(state);

        if woke_any {
            self.notify.notify_waiters();
        }
        tracing::info!(job_id = %id, "Job finished");
        Ok(())
    }

    /// Cancel a job and every job transitively depending on it.
    ///
    /// A no-op returning success if the job has already finished. A running
    /// job keeps running: the flag becomes visible through
    /// [`status`](Self::status) and its eventual [`finish`](Self::finish)
    /// still succeeds. Its dependents are canceled now, since their
    /// prerequisites will never all complete.
    ///
    /// Canceling an already-canceled job also succeeds, but still walks its
    /// dependents: a cascade that a backend failure cut short is completed
    /// by retrying the call.
    pub fn cancel(&self, id: Uuid) -> Result<()> {
        let mut state = self.lock_state();
        let job = state.store.get(id).ok_or(QueueError::UnknownJob(id))?;
        if job.is_finished() {
            return Ok(());
        }

        let mut visited = HashSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            let Some(job) = state.store.get(next) else {
                continue;
            };
            if job.is_finished() {
                continue;
            }
            let (job_type, queued_at, claimed, already_canceled) = (
                job.job_type.clone(),
                job.queued_at,
                job.started_at.is_some(),
                job.canceled,
            );

            if !already_canceled {
                state.store.mark_canceled(next)?;
                if !claimed {
                    state.ready.remove(&job_type, queued_at, next);
                }
                tracing::info!(job_id = %next, cascaded = next != id, "Job canceled");
            }
            stack.extend(state.deps.dependents_of(next));
        }
        Ok(())
    }

    /// Current lifecycle snapshot of a job. Pure read; the fields are
    /// captured under the lock, so no torn state is observable.
    pub fn status(&self, id: Uuid) -> Result<JobStatus> {
        let state = self.lock_state();
        let job = state.store.get(id).ok_or(QueueError::UnknownJob(id))?;
        Ok(JobStatus::snapshot(job))
    }

    /// The job's immutable argument blob, byte-for-byte as submitted.
    pub fn args(&self, id: Uuid) -> Result<Box<RawValue>> {
        let state = self.lock_state();
        let job = state.store.get(id).ok_or(QueueError::UnknownJob(id))?;
        Ok(job.args.clone())
    }

    /// Number of jobs the queue knows about, in any lifecycle stage.
    pub fn len(&self) -> usize {
        self.lock_state().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned mutex means another caller panicked mid-mutation; the
        // state can no longer be trusted, so crash loudly.
        self.state.lock().expect("job queue state mutex poisoned")
    }
}

/// Submission timestamps form a strictly increasing sequence per queue, so
/// FIFO-by-`queued_at` is exactly submission order even when the clock
/// stalls within its resolution.
fn next_queued_at(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if now <= last => last + Duration::nanoseconds(1),
        _ => now,
    }
}
