//! # Database Connection
//!
//! Pool construction from [`DatabaseConfig`] and the embedded schema
//! migrations for the `images` and `processing_tasks` tables.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::PipelineResult;

/// Embedded migrations from `./migrations`
///
/// Use this in tests with: `#[sqlx::test(migrator = "image_pipeline::database::MIGRATOR")]`
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open a connection pool sized by `config`
pub async fn connect(config: &DatabaseConfig) -> PipelineResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect_with(config.connect_options()?)
        .await?;

    info!(
        host = %config.host,
        database = %config.name,
        max_connections = config.max_connections,
        "Connected to PostgreSQL"
    );

    Ok(pool)
}

/// Apply pending migrations
pub async fn migrate(pool: &PgPool) -> PipelineResult<()> {
    MIGRATOR.run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

/// Revert every applied migration newer than `target_version`
///
/// A target of `0` reverts the whole schema.
pub async fn rollback(pool: &PgPool, target_version: i64) -> PipelineResult<()> {
    MIGRATOR.undo(pool, target_version).await?;
    info!(target_version, "Database migrations reverted");
    Ok(())
}

/// Version of the migration preceding the newest one, or `0` when there is one
pub fn previous_version() -> i64 {
    let mut versions: Vec<i64> = MIGRATOR
        .iter()
        .filter(|m| m.migration_type.is_up_migration())
        .map(|m| m.version)
        .collect();
    versions.sort_unstable();
    versions.pop();
    versions.pop().unwrap_or(0)
}
