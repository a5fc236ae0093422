//! PostgreSQL backing for the job record store.

use sqlx::migrate::MigrateError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub mod queries;

/// Connections beyond one per worker task, for the sweep and health probes.
const SPARE_CONNECTIONS: u32 = 4;

/// Open a pool sized for `concurrency` tasks issuing compare-and-set writes.
pub async fn init_pool(database_url: &str, concurrency: usize) -> Result<PgPool, sqlx::Error> {
    let max = u32::try_from(concurrency)
        .unwrap_or(u32::MAX)
        .saturating_add(SPARE_CONNECTIONS);

    PgPoolOptions::new()
        .max_connections(max)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await
}

/// Create or upgrade the `classification_jobs` table.
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
