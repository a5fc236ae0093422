use std::sync::Arc;

use crate::config::{AppConfig, PipelineConfig};
use crate::db::{self, queries::PgJobStore};
use crate::jobs::controller::JobController;
use crate::jobs::retry::with_backoff;
use crate::services::{
    encryption::{EncryptionError, EncryptionService},
    queue::{Broker, QueueError, RedisBroker},
    storage::{ObjectStore, S3ObjectStore, SealedStore, StorageError},
    store::JobStore,
};

/// Database connection tries before bootstrap gives up.
const CONNECT_ATTEMPTS: i32 = 5;

/// Connected external collaborators, shared by the API server and workers.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn JobStore>,
    pub broker: Arc<dyn Broker>,
    pub documents: Arc<dyn ObjectStore>,
}

impl Backends {
    /// Connect to PostgreSQL, Redis and the object store described by `config`.
    pub async fn connect(config: &AppConfig) -> Result<Self, BootstrapError> {
        tracing::info!("Connecting to PostgreSQL database");
        let policy = config.pipeline().retry;
        let pool = with_backoff(&policy, CONNECT_ATTEMPTS, "connect to PostgreSQL", || {
            db::init_pool(&config.database_url, config.worker_concurrency)
        })
        .await?;

        tracing::info!("Running database migrations");
        db::run_migrations(&pool).await?;

        tracing::info!("Connecting to Redis broker");
        let broker = RedisBroker::new(&config.redis_url)?;

        tracing::info!(bucket = %config.s3_bucket, "Initializing object store client");
        let bucket = S3ObjectStore::new(
            &config.s3_bucket,
            &config.s3_endpoint,
            &config.s3_region,
            &config.s3_access_key,
            &config.s3_secret_key,
        )?;

        let documents: Arc<dyn ObjectStore> = match &config.encryption_key {
            Some(key) => {
                tracing::info!("Encrypting documents at rest with AES-256-GCM");
                let encryption = Arc::new(EncryptionService::new(key)?);
                Arc::new(SealedStore::new(bucket, encryption))
            }
            None => {
                tracing::warn!("ENCRYPTION_KEY not set, documents are stored unencrypted");
                Arc::new(bucket)
            }
        };

        Ok(Self {
            store: Arc::new(PgJobStore::new(pool)),
            broker: Arc::new(broker),
            documents,
        })
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<JobController>,
    pub store: Arc<dyn JobStore>,
    pub broker: Arc<dyn Broker>,
    pub documents: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn new(backends: Backends, config: &PipelineConfig) -> Self {
        let controller = JobController::new(
            backends.store.clone(),
            backends.broker.clone(),
            backends.documents.clone(),
            config,
        );
        Self {
            controller: Arc::new(controller),
            store: backends.store,
            broker: backends.broker,
            documents: backends.documents,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Broker error: {0}")]
    Queue(#[from] QueueError),

    #[error("Object store error: {0}")]
    Storage(#[from] StorageError),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),
}
