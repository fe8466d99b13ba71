use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job does not exist: {0}")]
    UnknownJob(Uuid),

    #[error("Dependency does not exist: {0}")]
    UnknownDependency(Uuid),

    #[error("Bad job arguments: {0}")]
    BadArgs(String),

    #[error("Job is not running: {0}")]
    NotRunning(Uuid),

    #[error("Dequeue was canceled")]
    Canceled,

    #[error("Storage backend failure: {0}")]
    Backend(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
