//! PostgreSQL storage for Cuanted
//!
//! Provides persistent storage for:
//!
//! - User profiles, including plan and billing state
//! - Exchange API credentials
//! - Trading strategies
//! - The executed-signal audit log (`operaciones`)
//! - Strategies drafted before sign-up (`pending_strategies`)
//!
//! Each storage type borrows the shared pool:
//!
//! ```ignore
//! let strategies = StrategyStorage::new(&pool);
//! let active = strategies.set_active(uid, id, true).await?;
//! ```

pub mod config;
pub mod exchange;
pub mod migrations;
pub mod operation;
pub mod pending_strategy;
pub mod pool;
pub mod profile;
pub mod strategy;
pub mod update;

use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use config::PostgresConfig;
pub use exchange::{ExchangeRow, ExchangeStorage, NewExchange, mask_secret};
pub use operation::{NewOperation, OperationRow, OperationStatus, OperationStorage};
pub use pending_strategy::{PendingStrategyRow, PendingStrategyStorage};
pub use pool::{connect_lazy, create_pool, mask_password, ping};
pub use profile::{NewProfile, ProfileChange, ProfileKey, ProfileRow, ProfileStorage};
pub use strategy::{NewStrategy, StrategyRow, StrategyStorage};
pub use update::{BindValue, Column, ColumnKind, UpdateSet};

/// PostgreSQL error code for unique constraint violations.
const PG_UNIQUE_VIOLATION: &str = "23505";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested row was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row already exists (unique constraint).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl StorageError {
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Turns a unique-constraint violation into `Conflict`, leaving other errors as-is.
    pub(crate) fn from_unique(err: sqlx_core::Error, message: &str) -> Self {
        if let sqlx_core::Error::Database(db_err) = &err
            && db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION)
        {
            return Self::Conflict(message.to_string());
        }
        Self::Database(err)
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for cuanted_api::ApiError {
    fn from(err: StorageError) -> Self {
        use cuanted_api::ApiError;
        match err {
            StorageError::NotFound(msg) => ApiError::not_found(msg),
            StorageError::Conflict(msg) => ApiError::conflict(msg),
            StorageError::InvalidInput(msg) => ApiError::bad_request(msg),
            other => {
                tracing::error!(error = %other, "storage failure");
                ApiError::internal("Database error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_variants() {
        assert!(StorageError::not_found("strategy").is_not_found());
        assert!(StorageError::conflict("username taken").is_conflict());
        assert!(StorageError::invalid_input("No fields to update").is_invalid_input());
        assert!(!StorageError::Migration("x".into()).is_not_found());
    }

    #[test]
    fn api_mapping_keeps_client_messages() {
        use cuanted_api::ApiError;
        let err = ApiError::from(StorageError::invalid_input("Unknown field: plan"));
        assert_eq!(err.to_body().error, "Unknown field: plan");
        let err = ApiError::from(StorageError::Database(sqlx_core::Error::PoolTimedOut));
        assert_eq!(err.to_body().error, "Database error");
    }

    #[test]
    fn non_database_errors_pass_through_unique_mapping() {
        let err = StorageError::from_unique(sqlx_core::Error::RowNotFound, "taken");
        assert!(matches!(err, StorageError::Database(_)));
    }
}
