//! Durable work queue backed by PostgreSQL.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::QueueError;

pub mod item;
pub mod store;

pub use item::{ItemStatus, QueueItem};
pub use store::{is_retriable, QueueStore, UpdateFields, NON_RETRIABLE_PREFIX};

/// Open the bounded connection pool shared by every worker.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, QueueError> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.connect_url())
        .await?;
    info!("queue database connection pool created");
    Ok(pool)
}

/// Apply the embedded schema migrations. Safe to run on every startup.
pub async fn run_migrations(pool: &PgPool) -> Result<(), QueueError> {
    sqlx::migrate!().run(pool).await?;
    info!("queue database schema is up to date");
    Ok(())
}
