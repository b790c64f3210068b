use thiserror::Error;

use crate::models::{ReindexStatus, ReindexStep};

/// Persistence failures surfaced by the store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored version advanced past the version the caller observed.
    #[error("version conflict on document {0}")]
    Conflict(String),

    #[error("document {0} not found")]
    NotFound(String),

    #[error("corrupt document {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failures talking to the target cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("cluster returned {status} for {path}: {body}")]
    Response {
        status: u16,
        path: String,
        body: String,
    },

    #[error("unexpected cluster response for {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Everything that can go wrong while driving a reindex operation.
///
/// Variants fall into three classes. Preconditions are caller errors and
/// never mutate a record. Transient errors leave the record as-is so the
/// worker retries on its next tick. Anything else escaping a step body is
/// fatal: the record is marked failed and cleanup runs.
#[derive(Debug, Error)]
pub enum ReindexError {
    // Preconditions.
    #[error("index {0} does not exist")]
    IndexNotFound(String),

    #[error("a reindex operation already exists for {0}")]
    OperationExists(String),

    #[error("no reindex operation found for {0}")]
    OperationNotFound(String),

    #[error("reindex operation for {index} is {actual:?}, expected {expected:?}")]
    InvalidState {
        index: String,
        expected: ReindexStatus,
        actual: ReindexStatus,
    },

    #[error("reindex operation for {index} is at step {step:?}, no task is running")]
    NoRunningTask { index: String, step: ReindexStep },

    #[error("multiple reindex operations found for {0}")]
    MultipleOperations(String),

    #[error("no free destination index name for {index} after {attempts} attempts")]
    NameExhausted { index: String, attempts: u32 },

    // Transient: retried on the worker's next poll tick.
    #[error("reindex operation for {0} is locked by another worker")]
    Locked(String),

    #[error("stored version advanced while updating the record")]
    VersionConflict,

    #[error("cluster did not acknowledge {0}")]
    NotAcknowledged(&'static str),

    #[error("all cluster nodes must be at least {required}, found {found}")]
    NodeVersionBelowMinimum { required: String, found: String },

    // Fatal inside a step body.
    #[error("reindex task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },

    #[error("could not acquire the ML counter lock")]
    MlLockUnavailable,

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ReindexError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => ReindexError::VersionConflict,
            other => ReindexError::Store(other),
        }
    }
}

impl ReindexError {
    /// Errors that resolve on their own; the step is simply retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReindexError::Locked(_)
                | ReindexError::VersionConflict
                | ReindexError::NotAcknowledged(_)
                | ReindexError::NodeVersionBelowMinimum { .. }
        )
    }

    /// Caller errors that never mutate a record.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ReindexError::IndexNotFound(_)
                | ReindexError::OperationExists(_)
                | ReindexError::OperationNotFound(_)
                | ReindexError::InvalidState { .. }
                | ReindexError::NoRunningTask { .. }
                | ReindexError::MultipleOperations(_)
        )
    }
}
