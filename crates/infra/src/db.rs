//! Connection pool setup.

use std::time::Duration;

use keel_core::{DEFAULT_OPERATION_TIMEOUT, RepositoryError, RepositoryResult, with_timeout};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub max_idle: Duration,
    /// Deadline for the initial connect and ping.
    pub connect_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 25,
            max_idle: Duration::from_secs(15 * 60),
            connect_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// Open a pool and verify it answers a ping within `connect_timeout`.
pub async fn connect(config: &DatabaseConfig) -> RepositoryResult<PgPool> {
    let pool = with_timeout(config.connect_timeout, async {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(config.max_idle)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| RepositoryError::storage(format!("failed to connect to database: {e}")))
    })
    .await?;

    with_timeout(config.connect_timeout, async {
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| RepositoryError::storage(format!("database ping failed: {e}")))
    })
    .await?;

    tracing::info!(
        max_connections = config.max_connections,
        max_idle_ms = config.max_idle.as_millis() as u64,
        "database connection pool established"
    );
    Ok(pool)
}
