//! Cancellation tests: single jobs, cascades over the reverse-dependency
//! graph, and cancel/finish races.


use std::io;

use chrono::{DateTime, Utc};
use kiln_queue::error::{QueueError, Result};
use kiln_queue::jobqueue::{Job, JobQueue};
use kiln_queue::store::{JobStore, MemoryStore};
use serde_json::json;
use serde_json::value::RawValue;
use test_harness::{init_tracing, must_dequeue, must_find_nothing};
use uuid::Uuid;

#[tokio::test]
async fn test_cancel_before_dispatch() {
    init_tracing();
    let queue = JobQueue::new();

    let a = queue.submit("t", &json!({}), &[]).unwrap();
    queue.cancel(a).unwrap();

    must_find_nothing(&queue, &["t"]).await;

    let status = queue.status(a).unwrap();
    assert!(status.canceled);
    assert!(status.started_at.is_none());
}

#[tokio::test]
async fn test_cancel_cascades_through_chain() {
    init_tracing();
    let queue = JobQueue::new();

    let a = queue.submit("t", &json!({}), &[]).unwrap();
    let b = queue.submit("t", &json!({}), &[a]).unwrap();
    let c = queue.submit("t", &json!({}), &[b]).unwrap();

    queue.cancel(a).unwrap();

    for id in [a, b, c] {
        let status = queue.status(id).unwrap();
        assert!(status.canceled, "{id} should be canceled by the cascade");
        assert!(status.started_at.is_none(), "{id} was never dispatched");
    }
    must_find_nothing(&queue, &["t"]).await;
}

#[tokio::test]
async fn test_cancel_after_finish_is_a_noop() {
    init_tracing();
    let queue = JobQueue::new();

    let a = queue.submit("t", &json!({}), &[]).unwrap();
    must_dequeue(&queue, &["t"]).await;
    queue.finish(a, &json!({"ok": 1})).unwrap();

    queue.cancel(a).unwrap();

    let status = queue.status(a).unwrap();
    assert!(!status.canceled);
    assert_eq!(status.result.unwrap().get(), json!({"ok": 1}).to_string());
}

#[test]
fn test_cancel_is_idempotent_and_checks_existence() {
    init_tracing();
    let queue = JobQueue::new();

    assert!(matches!(
        queue.cancel(Uuid::new_v4()),
        Err(QueueError::UnknownJob(_))
    ));

    let a = queue.submit("t", &json!({}), &[]).unwrap();
    queue.cancel(a).unwrap();
    queue.cancel(a).unwrap();
    assert!(queue.status(a).unwrap().canceled);
}

/// Canceling one branch leaves the rest of the graph dispatchable.
#[tokio::test]
async fn test_cancel_is_scoped_to_the_dependent_subgraph() {
    init_tracing();
    let queue = JobQueue::new();

    let root = queue.submit("t", &json!({}), &[]).unwrap();
    let left = queue.submit("t", &json!({}), &[root]).unwrap();
    let right = queue.submit("t", &json!({}), &[root]).unwrap();
    let left_child = queue.submit("t", &json!({}), &[left]).unwrap();

    let job = must_dequeue(&queue, &["t"]).await;
    assert_eq!(job.id, root);
    queue.finish(root, &json!({"ok": 1})).unwrap();

    queue.cancel(left).unwrap();

    assert!(queue.status(left).unwrap().canceled);
    assert!(queue.status(left_child).unwrap().canceled);
    assert!(!queue.status(root).unwrap().canceled);
    assert!(!queue.status(right).unwrap().canceled);

    // The untouched branch still runs.
    assert_eq!(must_dequeue(&queue, &["t"]).await.id, right);
}

/// Cancel does not interrupt a running worker: its finish still succeeds
/// and the result is recorded alongside the canceled flag.
#[tokio::test]
async fn test_cancel_of_running_job_lets_finish_succeed() {
    init_tracing();
    let queue = JobQueue::new();

    let a = queue.submit("t", &json!({}), &[]).unwrap();
    must_dequeue(&queue, &["t"]).await;

    queue.cancel(a).unwrap();
    assert!(queue.status(a).unwrap().canceled);

    queue.finish(a, &json!({"ok": 1})).unwrap();

    let status = queue.status(a).unwrap();
    assert!(status.canceled);
    assert!(status.finished_at.is_some());
    assert_eq!(status.result.unwrap().get(), json!({"ok": 1}).to_string());
}

/// Dependents of a canceled-then-finished job stay canceled: the cascade
/// already ran when the flag was set, and the late result does not
/// resurrect them.
#[tokio::test]
async fn test_dependents_of_canceled_running_job_stay_blocked() {
    init_tracing();
    let queue = JobQueue::new();

    let a = queue.submit("t", &json!({}), &[]).unwrap();
    let b = queue.submit("t", &json!({}), &[a]).unwrap();
    must_dequeue(&queue, &["t"]).await;

    queue.cancel(a).unwrap();
    queue.finish(a, &json!({"ok": 1})).unwrap();

    assert!(queue.status(b).unwrap().canceled);
    assert!(queue.status(b).unwrap().started_at.is_none());
    must_find_nothing(&queue, &["t"]).await;
}

/// A job submitted against an already-canceled prerequisite can never run,
/// so it is admitted pre-canceled.
#[tokio::test]
async fn test_submit_on_canceled_dependency_is_admitted_canceled() {
    init_tracing();
    let queue = JobQueue::new();

    let a = queue.submit("t", &json!({}), &[]).unwrap();
    queue.cancel(a).unwrap();

    let b = queue.submit("t", &json!({}), &[a]).unwrap();
    assert!(queue.status(b).unwrap().canceled);
    must_find_nothing(&queue, &["t"]).await;
}

/// Store wrapper that fails a configurable cancellation mark, for driving
/// the cascade into a mid-walk backend failure.
struct FlakyCancelStore {
    inner: MemoryStore,
    cancels_until_failure: Option<usize>,
}

impl FlakyCancelStore {
    fn failing_after(cancels: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            cancels_until_failure: Some(cancels),
        }
    }
}

impl JobStore for FlakyCancelStore {
    fn insert(&mut self, job: Job) -> Result<()> {
        self.inner.insert(job)
    }

    fn get(&self, id: Uuid) -> Option<&Job> {
        self.inner.get(id)
    }

    fn mark_started(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.inner.mark_started(id, at)
    }

    fn mark_finished(
        &mut self,
        id: Uuid,
        result: Box<RawValue>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.mark_finished(id, result, at)
    }

    fn mark_canceled(&mut self, id: Uuid) -> Result<()> {
        match self.cancels_until_failure {
            Some(0) => {
                self.cancels_until_failure = None;
                Err(QueueError::Backend(io::Error::new(
                    io::ErrorKind::Other,
                    "injected backend failure",
                )))
            }
            Some(n) => {
                self.cancels_until_failure = Some(n - 1);
                self.inner.mark_canceled(id)
            }
            None => self.inner.mark_canceled(id),
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &Job> + '_> {
        self.inner.iter()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// A cascade cut short by a backend failure is completed by retrying the
/// cancel, even though the root is already marked canceled.
#[test]
fn test_cancel_retry_resumes_interrupted_cascade() {
    init_tracing();
    let store = FlakyCancelStore::failing_after(1);
    let queue = JobQueue::with_store(Box::new(store));

    let a = queue.submit("t", &json!({}), &[]).unwrap();
    let b = queue.submit("t", &json!({}), &[a]).unwrap();
    let c = queue.submit("t", &json!({}), &[b]).unwrap();

    // The root is durably canceled, then the walk dies on a dependent.
    let err = queue.cancel(a).unwrap_err();
    assert!(matches!(err, QueueError::Backend(_)));
    assert!(queue.status(a).unwrap().canceled);
    assert!(
        !queue.status(b).unwrap().canceled && !queue.status(c).unwrap().canceled,
        "the tail of the cascade was left behind by the failure"
    );

    queue.cancel(a).unwrap();
    for id in [a, b, c] {
        assert!(queue.status(id).unwrap().canceled);
    }
}

/// Cascade closure over a deeper graph: every transitive dependent of the
/// canceled job ends up canceled, nothing else does.
#[test]
fn test_cascade_covers_every_transitive_dependent() {
    init_tracing();
    let queue = JobQueue::new();

    // Three chains off one root, plus one independent job per layer.
    let root = queue.submit("t", &json!({}), &[]).unwrap();
    let mut dependents = Vec::new();
    for _ in 0..3 {
        let mut prev = root;
        for _ in 0..4 {
            prev = queue.submit("t", &json!({}), &[prev]).unwrap();
            dependents.push(prev);
        }
    }
    let bystanders: Vec<Uuid> = (0..4)
        .map(|_| queue.submit("t", &json!({}), &[]).unwrap())
        .collect();

    queue.cancel(root).unwrap();

    assert!(queue.status(root).unwrap().canceled);
    for id in &dependents {
        assert!(queue.status(*id).unwrap().canceled);
    }
    for id in &bystanders {
        assert!(!queue.status(*id).unwrap().canceled);
    }
}
