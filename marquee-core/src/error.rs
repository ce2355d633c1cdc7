use std::time::Duration;

use thiserror::Error;

/// Terminal failure of a submitted task.
///
/// Every task settles with exactly one outcome; these are the failure arms.
/// Worker crashes never surface to other callers - the pool replaces the unit
/// and only the task that was in flight on it is lost.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("worker stopped before settling the task: {0}")]
    WorkerCrashed(String),

    #[error("worker reported an error: {0}")]
    Runner(String),

    #[error("pool is shut down")]
    PoolClosed,
}

pub type TaskResult<T> = std::result::Result<T, TaskError>;
