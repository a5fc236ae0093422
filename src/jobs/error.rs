use strum::Display;
use uuid::Uuid;

use crate::models::job::{ErrorKind, JobError, JobState};
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;
use crate::services::store::StoreError;

/// Submission rejected before a job exists.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Document is empty")]
    EmptyDocument,

    #[error("Document is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("Document store unavailable: {0}")]
    DocumentStore(#[from] StorageError),

    #[error("Job store unavailable: {0}")]
    JobStore(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job store unavailable: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {job_id} already {state}")]
    AlreadyTerminal { job_id: Uuid, state: JobState },

    #[error("Job store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Why a document can never be processed.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum PermanentReason {
    MalformedDocument,
    UnsupportedDocument,
    MissingDocument,
}

/// Failure while extracting or classifying one document.
///
/// The variant decides retry behaviour; nothing downstream inspects the message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessingError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{reason}: {message}")]
    Permanent {
        reason: PermanentReason,
        message: String,
    },
}

impl ProcessingError {
    pub fn transient(message: impl Into<String>) -> Self {
        ProcessingError::Transient(message.into())
    }

    pub fn permanent(reason: PermanentReason, message: impl Into<String>) -> Self {
        ProcessingError::Permanent {
            reason,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessingError::Transient(_))
    }

    /// The terminal error recorded when this failure ends a job.
    pub fn to_job_error(&self) -> JobError {
        match self {
            ProcessingError::Transient(_) => {
                JobError::new(ErrorKind::TransientProcessingError, self.to_string())
            }
            ProcessingError::Permanent { .. } => {
                JobError::new(ErrorKind::PermanentProcessingError, self.to_string())
            }
        }
    }
}

impl From<StorageError> for ProcessingError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) => {
                ProcessingError::permanent(PermanentReason::MissingDocument, e.to_string())
            }
            StorageError::Corrupt(_) => {
                ProcessingError::permanent(PermanentReason::MalformedDocument, e.to_string())
            }
            e => ProcessingError::transient(e.to_string()),
        }
    }
}

/// Broker or record store unreachable from a worker or the sweep.
#[derive(Debug, thiserror::Error)]
pub enum InfrastructureError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Broker error: {0}")]
    Queue(#[from] QueueError),
}
