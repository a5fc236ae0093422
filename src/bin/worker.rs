use document_classifier::{
    app_state::Backends,
    config::AppConfig,
    jobs::{
        sweep::Reconciler,
        telemetry::install_worker_exporter,
        worker::{wait_until_ready, Worker, WorkerDeps},
    },
    services::{classifier::KeywordClassifier, extract::DocumentExtractor, ocr::OcrClient},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting document classification worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let pipeline = config.pipeline();

    // Worker metrics scrape endpoint
    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .expect("METRICS_ADDR must be a socket address");
    install_worker_exporter(metrics_addr).expect("Failed to install Prometheus metrics exporter");
    tracing::info!(addr = %metrics_addr, "Serving worker metrics");

    let backends = Backends::connect(&config)
        .await
        .expect("Failed to connect to backends");

    tracing::info!("Initializing services");
    let ocr = match (&config.ocr_account_id, &config.ocr_api_token) {
        (Some(account_id), Some(api_token)) => {
            tracing::info!("OCR enabled for PDF and image documents");
            Some(Arc::new(
                OcrClient::new(account_id, api_token).expect("Failed to initialize OCR client"),
            ))
        }
        _ => {
            tracing::warn!("OCR credentials not set, only plain-text documents can be classified");
            None
        }
    };
    let classifier = KeywordClassifier::new().expect("Failed to compile classification rules");

    let deps = WorkerDeps {
        store: backends.store.clone(),
        broker: backends.broker.clone(),
        documents: backends.documents.clone(),
        extractor: Arc::new(DocumentExtractor::new(ocr)),
        classifier: Arc::new(classifier),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received, finishing in-flight jobs"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        }
    });

    if !wait_until_ready(&*deps.store, &*deps.broker, &pipeline, &shutdown).await {
        tracing::info!("Shut down before backends became ready");
        return;
    }

    tracing::info!(
        concurrency = config.worker_concurrency,
        "Worker ready, starting job processing loop"
    );

    let mut tasks = JoinSet::new();
    for n in 0..config.worker_concurrency {
        let worker = Worker::new(format!("worker-{n}"), deps.clone(), pipeline.clone());
        let shutdown = shutdown.clone();
        tasks.spawn(async move { worker.run(shutdown).await });
    }

    let reconciler = Reconciler::new(backends.store, backends.broker, pipeline);
    {
        let shutdown = shutdown.clone();
        tasks.spawn(async move { reconciler.run(shutdown).await });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Worker task ended abnormally");
        }
    }

    tracing::info!("Worker stopped");
}
