//! Queue error types.

use std::path::PathBuf;
use thiserror::Error;
use vrender_models::{JobId, JobStatus};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {id} is {status} and cannot be removed")]
    JobActive { id: JobId, status: JobStatus },

    #[error("Job {id} is {status}, not the running job")]
    JobNotActive { id: JobId, status: JobStatus },

    #[error("Output {} is already claimed by job {owner}", .path.display())]
    OutputInUse { path: PathBuf, owner: JobId },

    #[error("Queue is shutting down")]
    ShuttingDown,

    #[error("Worker task panicked: {0}")]
    WorkerPanicked(String),
}
