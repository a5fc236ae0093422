use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::classification::Classification;

/// Lifecycle state of a classification job.
///
/// Transitions run `Pending -> Running -> {Succeeded, Failed}`. `Running -> Pending`
/// is only taken as an explicit retry requeue, and terminal states never change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Running -> Running` is allowed for reclaiming a job whose previous
    /// holder crashed; `Pending -> Failed` covers cancellation and exhausted
    /// crash loops.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match self {
            Pending => matches!(next, Running | Failed),
            Running => true,
            Succeeded | Failed => false,
        }
    }
}

/// Category of a terminal failure as surfaced to clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
pub enum ErrorKind {
    PermanentProcessingError,
    TransientProcessingError,
    Cancelled,
}

/// Error recorded on a job that reached `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A document classification job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub state: JobState,
    pub attempt_count: i32,
    pub document_ref: String,
    pub result: Option<Classification>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh job in `Pending` with no attempts.
    pub fn new(document_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: JobState::Pending,
            attempt_count: 0,
            document_ref: document_ref.into(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The compare-and-set guard matching this job as currently read.
    pub fn expected(&self) -> Expected {
        Expected {
            state: self.state,
            attempt_count: self.attempt_count,
        }
    }
}

/// Precondition for a compare-and-set write.
///
/// Both the state and the attempt counter must match, so a worker whose claim
/// has been superseded by a newer attempt cannot overwrite the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub state: JobState,
    pub attempt_count: i32,
}

/// The full set of mutable fields written by a compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub state: JobState,
    pub attempt_count: i32,
    pub result: Option<Classification>,
    pub error: Option<JobError>,
}

impl JobUpdate {
    /// Claim for execution: move to `Running` and count the attempt up front.
    pub fn claim(job: &Job) -> Self {
        Self {
            state: JobState::Running,
            attempt_count: job.attempt_count + 1,
            result: None,
            error: None,
        }
    }

    /// Put a running job back to `Pending` for a later retry.
    pub fn requeue(job: &Job) -> Self {
        Self {
            state: JobState::Pending,
            attempt_count: job.attempt_count,
            result: None,
            error: None,
        }
    }

    pub fn succeed(job: &Job, result: Classification) -> Self {
        Self {
            state: JobState::Succeeded,
            attempt_count: job.attempt_count,
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(job: &Job, error: JobError) -> Self {
        Self {
            state: JobState::Failed,
            attempt_count: job.attempt_count,
            result: None,
            error: Some(error),
        }
    }

    /// Rewrite the record unchanged, refreshing only `updated_at`.
    pub fn touch(job: &Job) -> Self {
        Self {
            state: job.state,
            attempt_count: job.attempt_count,
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }

    /// Check the update against the record it is about to replace.
    pub fn is_valid_from(&self, current: &Job) -> bool {
        self.is_valid_after(current.expected())
    }

    /// Check the update against a compare-and-set precondition, which is what
    /// the record looks like whenever the write applies.
    pub fn is_valid_after(&self, expected: Expected) -> bool {
        if expected.state.is_terminal() {
            return false;
        }
        let is_touch =
            self.state == expected.state && self.attempt_count == expected.attempt_count;
        if !is_touch && !expected.state.can_transition_to(self.state) {
            return false;
        }
        if self.attempt_count < expected.attempt_count {
            return false;
        }
        match self.state {
            JobState::Succeeded => self.result.is_some() && self.error.is_none(),
            JobState::Failed => self.error.is_some() && self.result.is_none(),
            JobState::Pending | JobState::Running => self.result.is_none() && self.error.is_none(),
        }
    }
}

/// Payload carried by the broker for each enqueue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMessage {
    pub job_id: Uuid,
    /// Distinguishes re-publications of the same job so each is tracked separately.
    pub message_id: Uuid,
}

impl JobMessage {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            message_id: Uuid::new_v4(),
        }
    }
}
