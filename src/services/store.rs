use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::job::{Expected, Job, JobState, JobUpdate};

/// Durable mapping from job id to job state.
///
/// `compare_and_set` is the only way to mutate a job. It must apply the update
/// atomically, and only when the stored state and attempt count match `expected`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<(), StoreError>;

    async fn read(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Returns the updated job, or `None` if the precondition did not hold.
    async fn compare_and_set(
        &self,
        job_id: Uuid,
        expected: Expected,
        update: JobUpdate,
    ) -> Result<Option<Job>, StoreError>;

    /// Jobs in one of `states` whose last update is older than `updated_before`,
    /// oldest first.
    async fn list_stale(
        &self,
        states: &[JobState],
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} already exists")]
    Duplicate(Uuid),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),

    #[error("Rejected update for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: Uuid,
        from: JobState,
        to: JobState,
    },

    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}
