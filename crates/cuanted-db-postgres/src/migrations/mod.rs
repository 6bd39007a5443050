//! Embedded schema migrations.

use sqlx_core::migrate::{Migration, MigrationType, Migrator};
use std::borrow::Cow;
use tracing::{info, instrument};

use crate::{PgPool, StorageError, StorageResult};

/// (version, description, sql) in chronological order.
macro_rules! embedded_migrations {
    () => {
        &[(
            20250101000001i64,
            "initial_schema",
            include_str!("../../migrations/20250101000001_initial_schema.sql"),
        )]
    };
}

fn build_migrations() -> Vec<Migration> {
    embedded_migrations!()
        .iter()
        .map(|(version, description, sql)| Migration {
            version: *version,
            description: Cow::Borrowed(description),
            migration_type: MigrationType::Simple,
            sql: Cow::Borrowed(sql),
            checksum: Cow::Borrowed(&[]),
            no_tx: false,
        })
        .collect()
}

/// Applies pending migrations, tracked in `_sqlx_migrations`.
#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> StorageResult<()> {
    let migrations = build_migrations();
    info!(count = migrations.len(), "Running database migrations");

    let migrator = Migrator {
        migrations: Cow::Owned(migrations),
        ignore_missing: false,
        locking: true,
        no_tx: false,
    };

    migrator
        .run(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    info!("Database migrations completed");
    Ok(())
}
