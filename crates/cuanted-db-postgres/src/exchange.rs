//! Exchange credential storage.

use serde::{Deserialize, Serialize};
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::PgRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::update::{Column, UpdateSet};
use crate::{PgPool, StorageResult};

pub const UPDATABLE: &[Column] = &[
    Column::text("exchange_name"),
    Column::text("api_key"),
    Column::text("api_secret"),
    Column::bool("testnet"),
];

const SELECT_COLUMNS: &str =
    "id, user_id, exchange_name, api_key, api_secret, testnet, created_at, updated_at";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExchangeRow {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub exchange_name: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub testnet: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ExchangeRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx_core::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            exchange_name: row.try_get("exchange_name")?,
            api_key: row.try_get("api_key")?,
            api_secret: row.try_get("api_secret")?,
            testnet: row.try_get("testnet")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Copy safe to return to the browser.
    #[must_use]
    pub fn masked(mut self) -> Self {
        self.api_secret = self.api_secret.as_deref().map(mask_secret);
        self
    }

    /// Key and secret, when both are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.api_key.as_deref(), self.api_secret.as_deref()) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some((key, secret))
            }
            _ => None,
        }
    }
}

/// Keeps the last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExchange {
    pub exchange_name: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    #[serde(default = "default_testnet")]
    pub testnet: bool,
}

fn default_testnet() -> bool {
    true
}

pub struct ExchangeStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> ExchangeStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, uid: &str) -> StorageResult<Vec<ExchangeRow>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM exchanges WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let rows = query(&sql).bind(uid).fetch_all(self.pool).await?;
        Ok(rows
            .iter()
            .map(ExchangeRow::from_row)
            .collect::<Result<_, _>>()?)
    }

    pub async fn create(&self, uid: &str, exchange: &NewExchange) -> StorageResult<ExchangeRow> {
        let sql = format!(
            r#"
            INSERT INTO exchanges (user_id, exchange_name, api_key, api_secret, testnet)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let row = query(&sql)
            .bind(uid)
            .bind(&exchange.exchange_name)
            .bind(&exchange.api_key)
            .bind(&exchange.api_secret)
            .bind(exchange.testnet)
            .fetch_one(self.pool)
            .await?;
        Ok(ExchangeRow::from_row(&row)?)
    }

    /// `None` when the row does not exist or belongs to another user.
    pub async fn update(
        &self,
        uid: &str,
        id: Uuid,
        set: &UpdateSet,
    ) -> StorageResult<Option<ExchangeRow>> {
        let sql = format!(
            "UPDATE exchanges SET {} WHERE id = $1 AND user_id = $2 RETURNING {SELECT_COLUMNS}",
            set.set_clause(3, true)
        );
        let row = set
            .bind_to_query(query(&sql).bind(id).bind(uid))
            .fetch_optional(self.pool)
            .await?;
        Ok(row.as_ref().map(ExchangeRow::from_row).transpose()?)
    }

    pub async fn delete(&self, uid: &str, id: Uuid) -> StorageResult<bool> {
        let result = query("DELETE FROM exchanges WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(uid)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Most recently updated credentials the user saved for an exchange.
    pub async fn find_by_name(
        &self,
        uid: &str,
        exchange_name: &str,
    ) -> StorageResult<Option<ExchangeRow>> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM exchanges
            WHERE user_id = $1 AND lower(exchange_name) = lower($2)
            ORDER BY updated_at DESC
            LIMIT 1
            "#
        );
        let row = query(&sql)
            .bind(uid)
            .bind(exchange_name)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.as_ref().map(ExchangeRow::from_row).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: Option<&str>, secret: Option<&str>) -> ExchangeRow {
        ExchangeRow {
            id: Uuid::nil(),
            user_id: "u1".into(),
            exchange_name: "binance".into(),
            api_key: key.map(String::from),
            api_secret: secret.map(String::from),
            testnet: true,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn mask_keeps_last_four_characters() {
        assert_eq!(mask_secret("abcdefgh1234"), "****1234");
        assert_eq!(mask_secret("abc"), "****");
    }

    #[test]
    fn masked_row_hides_secret_and_user() {
        let masked = row(Some("key"), Some("supersecretvalue")).masked();
        assert_eq!(masked.api_secret.as_deref(), Some("****alue"));

        let json = serde_json::to_value(&masked).unwrap();
        assert!(json.get("user_id").is_none());
        assert_eq!(json["exchange_name"], "binance");
    }

    #[test]
    fn credentials_require_both_values() {
        assert_eq!(row(Some("k"), Some("s")).credentials(), Some(("k", "s")));
        assert_eq!(row(Some("k"), Some("")).credentials(), None);
        assert_eq!(row(None, Some("s")).credentials(), None);
    }

    #[test]
    fn new_exchange_defaults_to_testnet() {
        let parsed: NewExchange =
            serde_json::from_str(r#"{"exchange_name":"binance","api_key":"k"}"#).unwrap();
        assert!(parsed.testnet);
        assert!(parsed.api_secret.is_none());
    }
}
