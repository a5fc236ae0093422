use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinError;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::jobs::error::{InfrastructureError, ProcessingError};
use crate::models::classification::Classification;
use crate::models::job::{ErrorKind, Job, JobError, JobState, JobUpdate};
use crate::services::classifier::Classifier;
use crate::services::extract::Extractor;
use crate::services::queue::{AckHandle, Broker, Delivery};
use crate::services::storage::ObjectStore;
use crate::services::store::JobStore;

/// What happened to a single delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded,
    Failed(ErrorKind),
    /// Put back to `Pending`; the message reappears after `delay`.
    Requeued { attempt: i32, delay: Duration },
    /// Duplicate delivery for a finished or unknown job.
    Discarded,
    /// The job looks held by another worker; the message was hidden for a while.
    Deferred,
    /// A compare-and-set lost to a concurrent writer; our work was dropped.
    Superseded,
}

/// The collaborators a worker needs, shared by every worker in a pool.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn JobStore>,
    pub broker: Arc<dyn Broker>,
    pub documents: Arc<dyn ObjectStore>,
    pub extractor: Arc<dyn Extractor>,
    pub classifier: Arc<dyn Classifier>,
}

/// Claims jobs from the broker one at a time and runs extract + classify.
pub struct Worker {
    name: String,
    deps: WorkerDeps,
    config: PipelineConfig,
}

impl Worker {
    pub fn new(name: impl Into<String>, deps: WorkerDeps, config: PipelineConfig) -> Self {
        Self {
            name: name.into(),
            deps,
            config,
        }
    }

    /// Claim loop. Returns once `shutdown` fires; a job in progress is
    /// finished first.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(worker = %self.name, "Worker started");
        let mut consecutive_failures = 0;

        while !shutdown.is_cancelled() {
            let idle = match self.poll_once().await {
                Ok(Some(outcome)) => {
                    consecutive_failures = 0;
                    tracing::debug!(worker = %self.name, outcome = ?outcome, "Delivery handled");
                    continue;
                }
                Ok(None) => {
                    consecutive_failures = 0;
                    tracing::trace!(worker = %self.name, "No jobs available, sleeping");
                    self.config.poll_interval
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let delay = self.config.retry.delay(consecutive_failures);
                    tracing::error!(
                        worker = %self.name,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Infrastructure error, will retry"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(idle) => {}
            }
        }

        tracing::info!(worker = %self.name, "Worker stopped");
    }

    /// Receive and handle at most one message.
    pub async fn poll_once(&self) -> Result<Option<Outcome>, InfrastructureError> {
        match self.deps.broker.receive(self.config.lease_duration).await? {
            Some(delivery) => self.handle(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn handle(&self, delivery: Delivery) -> Result<Outcome, InfrastructureError> {
        let Delivery { message, handle } = delivery;
        let job_id = message.job_id;

        let Some(job) = self.deps.store.read(job_id).await? else {
            tracing::warn!(worker = %self.name, job_id = %job_id, "Message for unknown job, discarding");
            self.ack(&handle, job_id).await?;
            return Ok(Outcome::Discarded);
        };

        if job.state.is_terminal() {
            tracing::debug!(
                worker = %self.name,
                job_id = %job_id,
                state = %job.state,
                "Duplicate delivery for finished job, discarding"
            );
            self.ack(&handle, job_id).await?;
            return Ok(Outcome::Discarded);
        }

        if job.state == JobState::Running {
            let age = (Utc::now() - job.updated_at).to_std().unwrap_or_default();
            if age < self.config.lease_duration {
                let wait = self.config.lease_duration - age;
                tracing::debug!(
                    worker = %self.name,
                    job_id = %job_id,
                    wait_ms = wait.as_millis() as u64,
                    "Job running elsewhere, deferring delivery"
                );
                self.deps.broker.defer(&handle, wait).await?;
                return Ok(Outcome::Deferred);
            }
            tracing::warn!(
                worker = %self.name,
                job_id = %job_id,
                attempt = job.attempt_count,
                "Reclaiming job abandoned by a previous worker"
            );
        }

        if !self.config.retry.should_retry(job.attempt_count) {
            let error = JobError::new(
                ErrorKind::TransientProcessingError,
                format!(
                    "gave up after {} attempts that never completed",
                    job.attempt_count
                ),
            );
            return self.finish(&job, JobUpdate::fail(&job, error), &handle).await;
        }

        let Some(claimed) = self
            .deps
            .store
            .compare_and_set(job_id, job.expected(), JobUpdate::claim(&job))
            .await?
        else {
            tracing::info!(worker = %self.name, job_id = %job_id, "Lost claim to another worker");
            self.ack(&handle, job_id).await?;
            return Ok(Outcome::Superseded);
        };

        tracing::info!(
            worker = %self.name,
            job_id = %job_id,
            attempt = claimed.attempt_count,
            document_ref = %claimed.document_ref,
            "Processing classification job"
        );

        let started = Instant::now();
        let result = self.execute_guarded(&claimed).await;
        metrics::histogram!("classification_processing_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(classification) => {
                let update = JobUpdate::succeed(&claimed, classification);
                self.finish(&claimed, update, &handle).await
            }
            Err(e) if e.is_transient() && self.config.retry.should_retry(claimed.attempt_count) => {
                self.requeue(&claimed, &handle, &e).await
            }
            Err(e) => {
                let error = if e.is_transient() {
                    JobError::new(
                        ErrorKind::TransientProcessingError,
                        format!("gave up after {} attempts: {e}", claimed.attempt_count),
                    )
                } else {
                    e.to_job_error()
                };
                self.finish(&claimed, JobUpdate::fail(&claimed, error), &handle)
                    .await
            }
        }
    }

    /// Run the pipeline on its own task, bounded by the lease. A panic or a
    /// timeout comes back as a transient failure, so this worker never leaves
    /// the job `Running`.
    async fn execute_guarded(&self, job: &Job) -> Result<Classification, ProcessingError> {
        let task = tokio::spawn(execute(self.deps.clone(), job.clone()));
        let abort = task.abort_handle();

        match timeout(self.config.lease_duration, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ProcessingError::transient(format!(
                "processing panicked: {}",
                join_error_message(e)
            ))),
            Err(_) => {
                abort.abort();
                Err(ProcessingError::transient(
                    "processing exceeded the lease duration",
                ))
            }
        }
    }

    async fn requeue(
        &self,
        job: &Job,
        handle: &AckHandle,
        cause: &ProcessingError,
    ) -> Result<Outcome, InfrastructureError> {
        let delay = self.config.retry.delay(job.attempt_count);
        let requeued = self
            .deps
            .store
            .compare_and_set(job.id, job.expected(), JobUpdate::requeue(job))
            .await?;

        if requeued.is_none() {
            tracing::warn!(job_id = %job.id, "Job changed while processing, dropping retry");
            self.ack(handle, job.id).await?;
            return Ok(Outcome::Superseded);
        }

        if !self.deps.broker.defer(handle, delay).await? {
            // Someone else holds the message now and will redeliver it.
            tracing::warn!(job_id = %job.id, "Lease lost before requeue");
        }

        metrics::counter!("classification_jobs_retried").increment(1);
        tracing::warn!(
            worker = %self.name,
            job_id = %job.id,
            attempt = job.attempt_count,
            retry_in_ms = delay.as_millis() as u64,
            error = %cause,
            "Transient failure, job requeued"
        );
        Ok(Outcome::Requeued {
            attempt: job.attempt_count,
            delay,
        })
    }

    /// Commit a terminal update, then acknowledge the message.
    async fn finish(
        &self,
        job: &Job,
        update: JobUpdate,
        handle: &AckHandle,
    ) -> Result<Outcome, InfrastructureError> {
        let outcome = match &update.error {
            Some(error) => Outcome::Failed(error.kind),
            None => Outcome::Succeeded,
        };
        let label = update
            .result
            .as_ref()
            .map(|r| (r.label, r.confidence.value()));
        let message = update.error.as_ref().map(|e| e.message.clone());

        let committed = self
            .deps
            .store
            .compare_and_set(job.id, job.expected(), update)
            .await?;
        self.ack(handle, job.id).await?;

        let Some(updated) = committed else {
            tracing::warn!(
                worker = %self.name,
                job_id = %job.id,
                "Job changed while processing, discarding outcome"
            );
            return Ok(Outcome::Superseded);
        };

        match (&outcome, label) {
            (Outcome::Succeeded, Some((label, confidence))) => {
                metrics::counter!("classification_jobs_succeeded").increment(1);
                tracing::info!(
                    worker = %self.name,
                    job_id = %job.id,
                    attempt = updated.attempt_count,
                    label = %label,
                    confidence = confidence,
                    "Job completed successfully"
                );
            }
            _ => {
                metrics::counter!("classification_jobs_failed").increment(1);
                tracing::warn!(
                    worker = %self.name,
                    job_id = %job.id,
                    attempt = updated.attempt_count,
                    outcome = ?outcome,
                    error = message.as_deref().unwrap_or_default(),
                    "Job failed"
                );
            }
        }
        Ok(outcome)
    }

    async fn ack(&self, handle: &AckHandle, job_id: Uuid) -> Result<(), InfrastructureError> {
        if !self.deps.broker.ack(handle).await? {
            tracing::warn!(worker = %self.name, job_id = %job_id, "Lease expired before acknowledgement");
        }
        Ok(())
    }
}

async fn execute(deps: WorkerDeps, job: Job) -> Result<Classification, ProcessingError> {
    let document = deps.documents.get(&job.document_ref).await?;

    let content = deps.extractor.extract(&document).await?;
    tracing::debug!(
        job_id = %job.id,
        format = %content.format,
        chars = content.text.len(),
        "Text extracted"
    );

    deps.classifier.classify(&content).await
}

fn join_error_message(error: JoinError) -> String {
    let fallback = error.to_string();
    match error.try_into_panic() {
        Ok(panic) => panic
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or(fallback),
        Err(_) => fallback,
    }
}

/// Block until the record store and broker both answer, backing off between
/// probes. Returns `false` if `shutdown` fires first.
pub async fn wait_until_ready(
    store: &dyn JobStore,
    broker: &dyn Broker,
    config: &PipelineConfig,
    shutdown: &CancellationToken,
) -> bool {
    let mut attempt = 0;
    loop {
        let store_ok = store.health_check().await;
        let broker_ok = broker.health_check().await;
        match (store_ok, broker_ok) {
            (Ok(()), Ok(())) => return true,
            (store_result, broker_result) => {
                attempt += 1;
                let delay = config.retry.delay(attempt);
                tracing::warn!(
                    store = store_result.err().map(|e| e.to_string()).unwrap_or_else(|| "ok".into()),
                    broker = broker_result.err().map(|e| e.to_string()).unwrap_or_else(|| "ok".into()),
                    retry_in_ms = delay.as_millis() as u64,
                    "Backends not ready"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return false,
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}
