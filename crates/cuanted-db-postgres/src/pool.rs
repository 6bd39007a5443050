//! Connection pool management.

use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::Postgres;
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::{PgPool, StorageResult};

pub type PgPoolOptions = PoolOptions<Postgres>;

/// Creates a pool and opens its first connection.
#[instrument(skip(config), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> StorageResult<PgPool> {
    info!(
        pool_size = config.pool_size,
        connect_timeout_ms = config.connect_timeout_ms,
        "Creating PostgreSQL connection pool"
    );
    let pool = pool_options(config).connect(&config.url).await?;
    debug!("PostgreSQL connection pool created");
    Ok(pool)
}

/// Builds a pool that opens connections on first use.
///
/// The server's readiness probe reports the database state, so startup does
/// not block on it.
pub fn connect_lazy(config: &PostgresConfig) -> StorageResult<PgPool> {
    Ok(pool_options(config).connect_lazy(&config.url)?)
}

fn pool_options(config: &PostgresConfig) -> PgPoolOptions {
    let options = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .test_before_acquire(false);
    match config.idle_timeout_ms {
        Some(ms) => options.idle_timeout(Duration::from_millis(ms)),
        None => options,
    }
}

/// Runs `SELECT 1` against the pool.
pub async fn ping(pool: &PgPool) -> StorageResult<()> {
    sqlx_core::query::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Masks the password in a database URL for logging.
pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@')
        && let Some(colon_pos) = url[..at_pos].rfind(':')
    {
        let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
        if colon_pos > scheme_end {
            return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_only_the_password() {
        assert_eq!(
            mask_password("postgres://cuanted:hunter2@db:5432/cuanted"),
            "postgres://cuanted:****@db:5432/cuanted"
        );
        assert_eq!(
            mask_password("postgres://localhost/cuanted"),
            "postgres://localhost/cuanted"
        );
        assert_eq!(
            mask_password("postgres://cuanted@localhost/cuanted"),
            "postgres://cuanted@localhost/cuanted"
        );
    }
}
