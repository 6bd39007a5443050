//! Strategies drafted on the landing page before the visitor has an account.
//!
//! Rows are keyed by lower-cased email and picked up after sign-up.

use serde::Serialize;
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::PgRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, StorageResult};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingStrategyRow {
    pub id: Uuid,
    pub email: String,
    pub strategy_data: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PendingStrategyRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx_core::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            strategy_data: row.try_get("strategy_data")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

pub struct PendingStrategyStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> PendingStrategyStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn latest(&self, email: &str) -> StorageResult<Option<PendingStrategyRow>> {
        let row = query(
            r#"
            SELECT id, email, strategy_data, created_at
            FROM pending_strategies
            WHERE email = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(normalize_email(email))
        .fetch_optional(self.pool)
        .await?;
        Ok(row.as_ref().map(PendingStrategyRow::from_row).transpose()?)
    }

    pub async fn upsert(&self, email: &str, strategy_data: &Value) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO pending_strategies (email, strategy_data)
            VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET
                strategy_data = EXCLUDED.strategy_data,
                created_at = timezone('utc', now())
            "#,
        )
        .bind(normalize_email(email))
        .bind(strategy_data)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, email: &str) -> StorageResult<u64> {
        let result = query("DELETE FROM pending_strategies WHERE email = $1")
            .bind(normalize_email(email))
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
