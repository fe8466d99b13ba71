pub mod error;
pub mod id;
pub mod jobqueue;
pub mod store;

pub use error::{QueueError, Result};
pub use jobqueue::{Dequeued, Job, JobQueue, JobStatus};
pub use store::{FsStore, JobStore, MemoryStore};
