pub mod models;
pub mod notifications;
pub mod queries;
pub mod store;

pub use notifications::RedisNotificationLedger;
pub use store::PgStore;

use sqlx::postgres::{PgPool, PgPoolOptions};
use stampsync_core::{SyncError, SyncResult};
use std::time::Duration;
use tracing::info;

/// `timeout` bounds both connecting and every later wait for a pooled
/// connection.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    timeout: Duration,
) -> SyncResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(timeout)
        .connect(database_url)
        .await
        .map_err(storage_error)?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> SyncResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| SyncError::Storage(format!("migration failed: {}", e)))?;
    info!("database migrations complete");
    Ok(())
}

pub(crate) fn storage_error(err: sqlx::Error) -> SyncError {
    match err {
        sqlx::Error::RowNotFound => SyncError::NotFound("row".to_string()),
        // a registration or strip row pointing at a customer/design that is gone
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            SyncError::NotFound(db.constraint().unwrap_or("referenced row").to_string())
        }
        other => SyncError::Storage(other.to_string()),
    }
}

pub(crate) fn redis_error(err: redis::RedisError) -> SyncError {
    SyncError::Storage(format!("redis: {}", err))
}
