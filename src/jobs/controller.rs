use std::sync::Arc;

use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::jobs::error::{CancelError, StatusError, SubmissionError};
use crate::models::job::{ErrorKind, Job, JobError, JobMessage, JobState, JobUpdate};
use crate::services::queue::Broker;
use crate::services::storage::ObjectStore;
use crate::services::store::JobStore;

/// Registers submissions and answers status queries.
///
/// Runs on the request path and never waits on worker activity.
pub struct JobController {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
    documents: Arc<dyn ObjectStore>,
    max_document_size: usize,
}

impl JobController {
    pub fn new(
        store: Arc<dyn JobStore>,
        broker: Arc<dyn Broker>,
        documents: Arc<dyn ObjectStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            broker,
            documents,
            max_document_size: config.max_document_size,
        }
    }

    /// Store the document, record a `Pending` job and enqueue it.
    ///
    /// The stored document is removed again if the record cannot be written.
    ///
    /// If publishing fails after the record is written, the job is still
    /// returned: it stays `Pending` until the reconciliation sweep re-publishes it.
    pub async fn submit(&self, document: &[u8]) -> Result<Job, SubmissionError> {
        if document.is_empty() {
            return Err(SubmissionError::EmptyDocument);
        }
        if document.len() > self.max_document_size {
            return Err(SubmissionError::TooLarge {
                size: document.len(),
                max: self.max_document_size,
            });
        }

        let document_ref = self.documents.put(document).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to store document");
            SubmissionError::DocumentStore(e)
        })?;

        let job = Job::new(document_ref);
        if let Err(e) = self.store.create(&job).await {
            tracing::error!(
                job_id = %job.id,
                document_ref = %job.document_ref,
                error = %e,
                "Failed to create job record"
            );
            if let Err(cleanup) = self.documents.delete(&job.document_ref).await {
                tracing::warn!(
                    document_ref = %job.document_ref,
                    error = %cleanup,
                    "Orphaned document left in object store"
                );
            }
            return Err(SubmissionError::JobStore(e));
        }

        metrics::counter!("classification_jobs_submitted").increment(1);

        if let Err(e) = self.broker.publish(&JobMessage::new(job.id)).await {
            metrics::counter!("classification_publish_failures").increment(1);
            tracing::warn!(
                job_id = %job.id,
                error = %e,
                "Failed to publish job, leaving it for the reconciliation sweep"
            );
        } else {
            tracing::info!(
                job_id = %job.id,
                size_bytes = document.len(),
                "Job submitted"
            );
        }

        Ok(job)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<Job, StatusError> {
        self.store
            .read(job_id)
            .await?
            .ok_or(StatusError::NotFound(job_id))
    }

    /// Mark a job `Failed` with kind `Cancelled`.
    ///
    /// A job already running is cancelled best-effort: if its worker commits
    /// a terminal state first, that state stands and `AlreadyTerminal` is returned.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job, CancelError> {
        loop {
            let job = self
                .store
                .read(job_id)
                .await?
                .ok_or(CancelError::NotFound(job_id))?;

            if job.state.is_terminal() {
                return Err(CancelError::AlreadyTerminal {
                    job_id,
                    state: job.state,
                });
            }

            let update = JobUpdate::fail(
                &job,
                JobError::new(ErrorKind::Cancelled, "cancelled by request"),
            );
            if let Some(cancelled) = self
                .store
                .compare_and_set(job_id, job.expected(), update)
                .await?
            {
                metrics::counter!("classification_jobs_cancelled").increment(1);
                tracing::info!(
                    job_id = %job_id,
                    was_running = job.state == JobState::Running,
                    "Job cancelled"
                );
                return Ok(cancelled);
            }
            // Lost a race with a worker; look again.
        }
    }
}
