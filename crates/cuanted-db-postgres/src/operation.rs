//! Signal audit log (`operaciones`).

use serde::Serialize;
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::PgRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, StorageResult};

/// Upper bound on rows returned by [`OperationStorage::list`].
const LIST_LIMIT: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Executed,
    Rejected,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Executed => "executed",
            OperationStatus::Rejected => "rejected",
            OperationStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OperationRow {
    pub id: Uuid,
    pub strategy_id: Option<Uuid>,
    pub symbol: String,
    pub action: String,
    pub side: Option<String>,
    pub market_type: String,
    pub quantity: Option<String>,
    pub status: String,
    pub exchange_order_id: Option<String>,
    pub message: Option<String>,
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl OperationRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx_core::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            strategy_id: row.try_get("strategy_id")?,
            symbol: row.try_get("symbol")?,
            action: row.try_get("action")?,
            side: row.try_get("side")?,
            market_type: row.try_get("market_type")?,
            quantity: row.try_get("quantity")?,
            status: row.try_get("status")?,
            exchange_order_id: row.try_get("exchange_order_id")?,
            message: row.try_get("message")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewOperation {
    pub user_id: String,
    pub strategy_id: Option<Uuid>,
    pub symbol: String,
    pub action: String,
    pub side: Option<String>,
    pub market_type: String,
    pub quantity: Option<String>,
    pub status: OperationStatus,
    pub exchange_order_id: Option<String>,
    pub message: Option<String>,
    pub payload: Value,
}

pub struct OperationStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> OperationStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, uid: &str) -> StorageResult<Vec<OperationRow>> {
        let rows = query(
            r#"
            SELECT id, strategy_id, symbol, action, side, market_type, quantity, status,
                   exchange_order_id, message, payload, created_at
            FROM operaciones
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(uid)
        .bind(LIST_LIMIT)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(OperationRow::from_row)
            .collect::<Result<_, _>>()?)
    }

    pub async fn record(&self, op: &NewOperation) -> StorageResult<Uuid> {
        let row = query(
            r#"
            INSERT INTO operaciones (
                user_id, strategy_id, symbol, action, side, market_type, quantity,
                status, exchange_order_id, message, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(&op.user_id)
        .bind(op.strategy_id)
        .bind(&op.symbol)
        .bind(&op.action)
        .bind(&op.side)
        .bind(&op.market_type)
        .bind(&op.quantity)
        .bind(op.status.as_str())
        .bind(&op.exchange_order_id)
        .bind(&op.message)
        .bind(&op.payload)
        .fetch_one(self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_stored_values() {
        assert_eq!(OperationStatus::Executed.as_str(), "executed");
        assert_eq!(
            serde_json::to_value(OperationStatus::Rejected).unwrap(),
            "rejected"
        );
    }
}
