use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::jobs::error::InfrastructureError;
use crate::models::job::{JobMessage, JobState, JobUpdate};
use crate::services::queue::Broker;
use crate::services::store::JobStore;

/// Re-publishes jobs that have sat in `Pending` or `Running` for too long.
/// An abandoned `Running` job is put back to `Pending` first, keeping its
/// attempt count.
///
/// Covers submissions whose publish failed, messages lost by the broker, and
/// workers that died without their message being redelivered. Running it
/// alongside workers is safe because every delivery is checked against the
/// job's current state before anything happens.
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
    config: PipelineConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn JobStore>, broker: Arc<dyn Broker>, config: PipelineConfig) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// One pass. Returns how many jobs were re-published.
    pub async fn sweep_once(&self) -> Result<usize, InfrastructureError> {
        let threshold = TimeDelta::from_std(self.config.staleness_threshold)
            .unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(threshold)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let stale = self
            .store
            .list_stale(
                &[JobState::Pending, JobState::Running],
                cutoff,
                self.config.sweep_batch_size,
            )
            .await?;

        let lease = TimeDelta::from_std(self.config.lease_duration).unwrap_or(TimeDelta::MAX);
        let mut republished = 0;
        for job in stale {
            // A running job is only abandoned once its lease has run out too.
            let update = match job.state {
                JobState::Running if Utc::now() - job.updated_at < lease => continue,
                JobState::Running => JobUpdate::requeue(&job),
                _ => JobUpdate::touch(&job),
            };

            // Writing first refreshes updated_at, so the next pass does not
            // pick the job up again while this message is still queued.
            let refreshed = self
                .store
                .compare_and_set(job.id, job.expected(), update)
                .await?;
            if refreshed.is_none() {
                tracing::debug!(job_id = %job.id, "Job moved on during sweep, skipping");
                continue;
            }

            self.broker.publish(&JobMessage::new(job.id)).await?;
            republished += 1;
            tracing::info!(
                job_id = %job.id,
                state = %job.state,
                attempt = job.attempt_count,
                stale_since = %job.updated_at,
                "Re-published stale job"
            );
        }

        if republished > 0 {
            metrics::counter!("classification_jobs_requeued_by_sweep").increment(republished as u64);
        }
        if let Ok(depth) = self.broker.depth().await {
            metrics::gauge!("classification_queue_depth").set(depth as f64);
        }

        Ok(republished)
    }

    /// Sweep every `sweep_interval` until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            staleness_secs = self.config.staleness_threshold.as_secs(),
            "Reconciliation sweep started"
        );

        loop {
            match self.sweep_once().await {
                Ok(0) => tracing::debug!("Sweep found no stale jobs"),
                Ok(n) => tracing::info!(republished = n, "Sweep complete"),
                Err(e) => tracing::error!(error = %e, "Sweep failed, will retry next interval"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.config.sweep_interval) => {}
            }
        }

        tracing::info!("Reconciliation sweep stopped");
    }
}
