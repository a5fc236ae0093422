use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::classification::Classification;
use crate::models::job::{ErrorKind, Expected, Job, JobError, JobState, JobUpdate};
use crate::services::store::{JobStore, StoreError};

const JOB_COLUMNS: &str = "id, state, attempt_count, document_ref, result, error_kind, \
                           error_message, created_at, updated_at";

/// Job record store on PostgreSQL. Compare-and-set is a single conditional
/// `UPDATE ... WHERE state = $expected AND attempt_count = $expected`.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let id: Uuid = row.try_get("id")?;

    let state_str: String = row.try_get("state")?;
    let state = state_str
        .parse::<JobState>()
        .map_err(|_| StoreError::Corrupt(format!("job {id} has unknown state {state_str:?}")))?;

    let result = row
        .try_get::<Option<serde_json::Value>, _>("result")?
        .map(serde_json::from_value::<Classification>)
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("job {id} result: {e}")))?;

    let error_kind: Option<String> = row.try_get("error_kind")?;
    let error_message: Option<String> = row.try_get("error_message")?;
    let error = match (error_kind, error_message) {
        (Some(kind), message) => {
            let kind = kind
                .parse::<ErrorKind>()
                .map_err(|_| StoreError::Corrupt(format!("job {id} has unknown error kind {kind:?}")))?;
            Some(JobError::new(kind, message.unwrap_or_default()))
        }
        (None, _) => None,
    };

    Ok(Job {
        id,
        state,
        attempt_count: row.try_get("attempt_count")?,
        document_ref: row.try_get("document_ref")?,
        result,
        error,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO classification_jobs
                (id, state, attempt_count, document_ref, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.id)
        .bind(job.state.to_string())
        .bind(job.attempt_count)
        .bind(&job.document_ref)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => StoreError::Duplicate(job.id),
            _ => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn read(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM classification_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn compare_and_set(
        &self,
        job_id: Uuid,
        expected: Expected,
        update: JobUpdate,
    ) -> Result<Option<Job>, StoreError> {
        if !update.is_valid_after(expected) {
            return Err(StoreError::IllegalTransition {
                job_id,
                from: expected.state,
                to: update.state,
            });
        }

        let result = update
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("job {job_id} result: {e}")))?;
        let error_kind = update.error.as_ref().map(|e| e.kind.to_string());
        let error_message = update.error.as_ref().map(|e| e.message.clone());

        let row = sqlx::query(&format!(
            r#"
            UPDATE classification_jobs
            SET state = $4,
                attempt_count = $5,
                result = $6,
                error_kind = $7,
                error_message = $8,
                updated_at = NOW()
            WHERE id = $1 AND state = $2 AND attempt_count = $3
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(expected.state.to_string())
        .bind(expected.attempt_count)
        .bind(update.state.to_string())
        .bind(update.attempt_count)
        .bind(result)
        .bind(error_kind)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_stale(
        &self,
        states: &[JobState],
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let states: Vec<String> = states.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM classification_jobs
            WHERE state = ANY($1) AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#
        ))
        .bind(states)
        .bind(updated_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
