//! Prometheus exporter for the worker process.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global recorder and serve it over HTTP on `addr`.
///
/// Must be called from within a Tokio runtime, once per process.
pub fn install_worker_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_worker_metrics();
    Ok(())
}

fn describe_worker_metrics() {
    metrics::describe_histogram!(
        "classification_processing_seconds",
        "Time spent extracting and classifying one document"
    );
    metrics::describe_counter!(
        "classification_jobs_succeeded",
        "Total classification jobs completed successfully"
    );
    metrics::describe_counter!(
        "classification_jobs_failed",
        "Total classification jobs that failed"
    );
    metrics::describe_counter!(
        "classification_jobs_retried",
        "Total transient failures put back on the queue"
    );
    metrics::describe_counter!(
        "classification_jobs_requeued_by_sweep",
        "Total stale jobs re-published by the reconciliation sweep"
    );
    metrics::describe_gauge!(
        "classification_queue_depth",
        "Current number of messages waiting in the broker"
    );
}
