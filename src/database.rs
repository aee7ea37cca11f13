use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::config::PoolConfig;

/// Every store call holds a connection for one statement or one short
/// transaction, so the pool stays small and fails fast when exhausted.
pub fn pool_options(config: &PoolConfig) -> PgPoolOptions {
    let max = config.max_connections.max(1);
    PgPoolOptions::new()
        .max_connections(max)
        .min_connections(config.min_connections.min(max))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
}

pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool, sqlx::Error> {
    let pool = pool_options(config).connect(database_url).await?;
    tracing::info!(
        "Database connection pool created ({}..{} connections)",
        config.min_connections.min(config.max_connections.max(1)),
        config.max_connections.max(1)
    );
    Ok(pool)
}

/// Applies the `documents` schema.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
