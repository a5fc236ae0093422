use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::jobs::retry::RetryPolicy;

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Prometheus scrape address served by the worker process.
    #[serde(default = "default_metrics_addr")]
    #[garde(length(min = 1))]
    pub metrics_addr: String,

    /// PostgreSQL connection string
    #[garde(length(min = 1))]
    pub database_url: String,

    /// Redis connection string for the job broker
    #[garde(length(min = 1))]
    pub redis_url: String,

    /// Object store bucket name
    #[garde(length(min = 1))]
    pub s3_bucket: String,

    /// Object store endpoint URL (S3-compatible)
    #[garde(length(min = 1))]
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    #[garde(skip)]
    pub s3_region: String,

    #[garde(skip)]
    pub s3_access_key: String,

    #[garde(skip)]
    pub s3_secret_key: String,

    /// AES-256-GCM key for documents at rest (base64-encoded, 32 bytes).
    /// Documents are stored unencrypted when unset.
    #[serde(default)]
    #[garde(skip)]
    pub encryption_key: Option<String>,

    /// OCR inference account. PDFs and images are rejected when unset.
    #[serde(default)]
    #[garde(skip)]
    pub ocr_account_id: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub ocr_api_token: Option<String>,

    /// Retry ceiling, counting the first attempt.
    #[serde(default = "default_max_attempts")]
    #[garde(range(min = 1, max = 100))]
    pub max_attempts: i32,

    #[serde(default = "default_lease_duration_secs")]
    #[garde(range(min = 1))]
    pub lease_duration_secs: u64,

    #[serde(default = "default_staleness_threshold_secs")]
    #[garde(range(min = 1))]
    pub staleness_threshold_secs: u64,

    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_document_size")]
    #[garde(range(min = 1))]
    pub max_document_size: usize,

    #[serde(default = "default_worker_concurrency")]
    #[garde(range(min = 1, max = 256))]
    pub worker_concurrency: usize,

    #[serde(default = "default_sweep_interval_secs")]
    #[garde(range(min = 1))]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_sweep_batch_size")]
    #[garde(range(min = 1))]
    pub sweep_batch_size: i64,

    #[serde(default = "default_backoff_base_secs")]
    #[garde(range(min = 1))]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_max_secs")]
    #[garde(range(min = 1))]
    pub backoff_max_secs: u64,

    /// Random spread applied to every backoff, as a percentage of it.
    #[serde(default = "default_backoff_jitter_percent")]
    #[garde(range(max = 100))]
    pub backoff_jitter_percent: u32,

    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 1))]
    pub poll_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_max_attempts() -> i32 {
    3
}

fn default_lease_duration_secs() -> u64 {
    300
}

fn default_staleness_threshold_secs() -> u64 {
    900
}

fn default_max_document_size() -> usize {
    10 * 1024 * 1024
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_sweep_batch_size() -> i64 {
    100
}

fn default_backoff_base_secs() -> u64 {
    2
}

fn default_backoff_max_secs() -> u64 {
    60
}

fn default_backoff_jitter_percent() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// The options the job pipeline itself reads.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            retry: RetryPolicy::new(
                self.max_attempts,
                Duration::from_secs(self.backoff_base_secs),
                Duration::from_secs(self.backoff_max_secs),
            )
            .with_jitter(self.backoff_jitter_percent),
            lease_duration: Duration::from_secs(self.lease_duration_secs),
            staleness_threshold: Duration::from_secs(self.staleness_threshold_secs),
            max_document_size: self.max_document_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            sweep_batch_size: self.sweep_batch_size,
        }
    }
}

/// Settings shared by the controller, workers and the reconciliation sweep.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub lease_duration: Duration,
    pub staleness_threshold: Duration,
    pub max_document_size: usize,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    pub sweep_batch_size: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::new(
                default_max_attempts(),
                Duration::from_secs(default_backoff_base_secs()),
                Duration::from_secs(default_backoff_max_secs()),
            )
            .with_jitter(default_backoff_jitter_percent()),
            lease_duration: Duration::from_secs(default_lease_duration_secs()),
            staleness_threshold: Duration::from_secs(default_staleness_threshold_secs()),
            max_document_size: default_max_document_size(),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            sweep_interval: Duration::from_secs(default_sweep_interval_secs()),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
