//! Strategy storage.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::PgRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::update::{BindValue, Column, UpdateSet};
use crate::{PgPool, StorageError, StorageResult};

/// Columns editable through PATCH. `is_active` goes through
/// [`StrategyStorage::set_active`] so plan limits apply.
pub const UPDATABLE: &[Column] = &[
    Column::text("name"),
    Column::text("description"),
    Column::uuid("exchange_id"),
    Column::text("exchange_name"),
    Column::text("trading_pair"),
    Column::text("market_type"),
    Column::int("leverage"),
    Column::text("risk_type"),
    Column::float("risk_value"),
    Column::text("webhook_url"),
    Column::text("position_side"),
];

const SELECT_COLUMNS: &str = r#"
    id, user_id, name, description, exchange_id, exchange_name, trading_pair, market_type,
    leverage, risk_type, risk_value, webhook_url, is_active, position_side, created_at, updated_at
"#;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StrategyRow {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub exchange_id: Option<Uuid>,
    pub exchange_name: Option<String>,
    pub trading_pair: Option<String>,
    pub market_type: Option<String>,
    pub leverage: Option<i32>,
    pub risk_type: Option<String>,
    pub risk_value: Option<f64>,
    pub webhook_url: Option<String>,
    pub is_active: bool,
    pub position_side: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StrategyRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx_core::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            exchange_id: row.try_get("exchange_id")?,
            exchange_name: row.try_get("exchange_name")?,
            trading_pair: row.try_get("trading_pair")?,
            market_type: row.try_get("market_type")?,
            leverage: row.try_get("leverage")?,
            risk_type: row.try_get("risk_type")?,
            risk_value: row.try_get("risk_value")?,
            webhook_url: row.try_get("webhook_url")?,
            is_active: row.try_get("is_active")?,
            position_side: row.try_get("position_side")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Body of `POST /api/strategies`. A caller-chosen `id` is kept.
#[derive(Debug, Clone, Deserialize)]
pub struct NewStrategy {
    pub id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub exchange_id: Option<Uuid>,
    pub exchange_name: Option<String>,
    pub trading_pair: Option<String>,
    pub market_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub leverage: Option<i32>,
    pub risk_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub risk_value: Option<f64>,
    pub webhook_url: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub position_side: Option<String>,
}

fn default_active() -> bool {
    true
}

impl NewStrategy {
    /// Range checks on the sizing settings the webhook trades with.
    pub fn check(&self) -> StorageResult<()> {
        check_risk(self.leverage, self.risk_value)
    }
}

/// Highest leverage Binance futures accepts.
pub const MAX_LEVERAGE: i32 = 125;

/// `leverage` must be in `1..=MAX_LEVERAGE` and `risk_value` finite and
/// positive. Absent values pass.
pub fn check_risk(leverage: Option<i32>, risk_value: Option<f64>) -> StorageResult<()> {
    if let Some(leverage) = leverage
        && !(1..=MAX_LEVERAGE).contains(&leverage)
    {
        return Err(StorageError::invalid_input(format!(
            "leverage must be between 1 and {MAX_LEVERAGE}"
        )));
    }
    if let Some(value) = risk_value
        && !(value.is_finite() && value > 0.0)
    {
        return Err(StorageError::invalid_input(
            "risk_value must be a number greater than 0",
        ));
    }
    Ok(())
}

/// [`check_risk`] for a PATCH. Setting either column to null is allowed.
pub fn check_update(set: &UpdateSet) -> StorageResult<()> {
    let leverage = match set.get("leverage") {
        Some(BindValue::Int(v)) => *v,
        _ => None,
    };
    let risk_value = match set.get("risk_value") {
        Some(BindValue::Float(v)) => *v,
        _ => None,
    };
    check_risk(leverage, risk_value)
}

/// Accepts `5` or `"5"`.
fn lenient_i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected an integer")),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom("expected an integer")),
        Some(_) => Err(serde::de::Error::custom("expected an integer")),
    }
}

/// Accepts `2.5` or `"2.5"`.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected a number")),
        Some(_) => Err(serde::de::Error::custom("expected a number")),
    }
}

pub struct StrategyStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> StrategyStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, uid: &str) -> StorageResult<Vec<StrategyRow>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM strategies WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let rows = query(&sql).bind(uid).fetch_all(self.pool).await?;
        Ok(rows
            .iter()
            .map(StrategyRow::from_row)
            .collect::<Result<_, _>>()?)
    }

    pub async fn find(&self, uid: &str, id: Uuid) -> StorageResult<Option<StrategyRow>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM strategies WHERE id = $1 AND user_id = $2");
        let row = query(&sql)
            .bind(id)
            .bind(uid)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.as_ref().map(StrategyRow::from_row).transpose()?)
    }

    pub async fn create(&self, uid: &str, strategy: &NewStrategy) -> StorageResult<StrategyRow> {
        let sql = format!(
            r#"
            INSERT INTO strategies (
                id, user_id, name, description, exchange_id, exchange_name, trading_pair,
                market_type, leverage, risk_type, risk_value, webhook_url, is_active, position_side
            )
            VALUES (COALESCE($1, gen_random_uuid()), $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let row = query(&sql)
            .bind(strategy.id)
            .bind(uid)
            .bind(&strategy.name)
            .bind(&strategy.description)
            .bind(strategy.exchange_id)
            .bind(&strategy.exchange_name)
            .bind(&strategy.trading_pair)
            .bind(&strategy.market_type)
            .bind(strategy.leverage)
            .bind(&strategy.risk_type)
            .bind(strategy.risk_value)
            .bind(&strategy.webhook_url)
            .bind(strategy.is_active)
            .bind(&strategy.position_side)
            .fetch_one(self.pool)
            .await
            .map_err(|e| StorageError::from_unique(e, "Strategy id already exists"))?;
        Ok(StrategyRow::from_row(&row)?)
    }

    pub async fn update(
        &self,
        uid: &str,
        id: Uuid,
        set: &UpdateSet,
    ) -> StorageResult<Option<StrategyRow>> {
        let sql = format!(
            "UPDATE strategies SET {} WHERE id = $1 AND user_id = $2 RETURNING {SELECT_COLUMNS}",
            set.set_clause(3, true)
        );
        let row = set
            .bind_to_query(query(&sql).bind(id).bind(uid))
            .fetch_optional(self.pool)
            .await?;
        Ok(row.as_ref().map(StrategyRow::from_row).transpose()?)
    }

    pub async fn delete(&self, uid: &str, id: Uuid) -> StorageResult<bool> {
        let result = query("DELETE FROM strategies WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(uid)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn has_any(&self, uid: &str) -> StorageResult<bool> {
        let row = query("SELECT 1 FROM strategies WHERE user_id = $1 LIMIT 1")
            .bind(uid)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn name_exists(&self, uid: &str, name: &str) -> StorageResult<bool> {
        let row = query("SELECT 1 FROM strategies WHERE user_id = $1 AND name = $2 LIMIT 1")
            .bind(uid)
            .bind(name)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// First unused name among `base`, `base (copia)`, `base (copia 2)`, ...
    pub async fn unique_copy_name(&self, uid: &str, base: &str) -> StorageResult<String> {
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let candidate = copy_name_candidate(base, attempt);
            if !self.name_exists(uid, &candidate).await? {
                return Ok(candidate);
            }
        }
        Err(StorageError::conflict(format!(
            "No free strategy name for base '{base}'"
        )))
    }

    pub async fn set_active(
        &self,
        uid: &str,
        id: Uuid,
        active: bool,
    ) -> StorageResult<Option<(Uuid, bool)>> {
        let row = query(
            r#"
            UPDATE strategies
            SET is_active = $3, updated_at = timezone('utc', now())
            WHERE id = $1 AND user_id = $2
            RETURNING id, is_active
            "#,
        )
        .bind(id)
        .bind(uid)
        .bind(active)
        .fetch_optional(self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some((row.try_get("id")?, row.try_get("is_active")?))),
            None => Ok(None),
        }
    }

    /// Turns off every active strategy of the user. Returns how many changed.
    pub async fn deactivate_all(&self, uid: &str) -> StorageResult<u64> {
        let result = query(
            r#"
            UPDATE strategies
            SET is_active = FALSE, updated_at = timezone('utc', now())
            WHERE user_id = $1 AND is_active
            "#,
        )
        .bind(uid)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// `base`, `base (copia)`, `base (copia 2)`, ... for attempts 1, 2, 3, ...
pub fn copy_name_candidate(base: &str, attempt: u32) -> String {
    match attempt {
        0 | 1 => base.to_string(),
        2 => format!("{base} (copia)"),
        n => format!("{base} (copia {})", n - 1),
    }
}
