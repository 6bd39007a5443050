//! Partial updates from request payloads.
//!
//! A PATCH body is a JSON object whose keys name columns. Only columns on
//! the table's allowlist are accepted, each value is coerced to the
//! column's type, and the result renders as a parameterized `SET` clause.
//! Column names never come from user input: they are the `&'static str`
//! from the allowlist.

use serde_json::{Map, Value};
use sqlx_core::query::Query;
use sqlx_core::query_as::QueryAs;
use sqlx_postgres::{PgArguments, Postgres};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::{StorageError, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Bool,
    Int,
    Float,
    Uuid,
    Timestamp,
}

/// An updatable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Text,
        }
    }
    pub const fn bool(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Bool,
        }
    }
    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Int,
        }
    }
    pub const fn float(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Float,
        }
    }
    pub const fn uuid(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Uuid,
        }
    }
    pub const fn timestamp(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Timestamp,
        }
    }
}

/// A typed value bound to a `$n` placeholder. `None` writes SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(Option<String>),
    Bool(Option<bool>),
    Int(Option<i32>),
    Float(Option<f64>),
    Uuid(Option<Uuid>),
    Timestamp(Option<OffsetDateTime>),
}

impl BindValue {
    /// Coerces a JSON value to the column kind.
    pub fn from_json(kind: ColumnKind, value: &Value) -> Result<Self, String> {
        if value.is_null() {
            return Ok(match kind {
                ColumnKind::Text => Self::Text(None),
                ColumnKind::Bool => Self::Bool(None),
                ColumnKind::Int => Self::Int(None),
                ColumnKind::Float => Self::Float(None),
                ColumnKind::Uuid => Self::Uuid(None),
                ColumnKind::Timestamp => Self::Timestamp(None),
            });
        }

        match kind {
            ColumnKind::Text => match value {
                Value::String(s) => Ok(Self::Text(Some(s.clone()))),
                _ => Err("expected a string".to_string()),
            },
            ColumnKind::Bool => value
                .as_bool()
                .map(|b| Self::Bool(Some(b)))
                .ok_or_else(|| "expected a boolean".to_string()),
            ColumnKind::Int => {
                let n = match value {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                n.and_then(|n| i32::try_from(n).ok())
                    .map(|n| Self::Int(Some(n)))
                    .ok_or_else(|| "expected an integer".to_string())
            }
            ColumnKind::Float => {
                let n = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                n.filter(|n| n.is_finite())
                    .map(|n| Self::Float(Some(n)))
                    .ok_or_else(|| "expected a number".to_string())
            }
            ColumnKind::Uuid => value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(|id| Self::Uuid(Some(id)))
                .ok_or_else(|| "expected a UUID".to_string()),
            ColumnKind::Timestamp => value
                .as_str()
                .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
                .map(|ts| Self::Timestamp(Some(ts)))
                .ok_or_else(|| "expected an RFC 3339 timestamp".to_string()),
        }
    }
}

/// Ordered column assignments for an `UPDATE ... SET` statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSet {
    assignments: Vec<(&'static str, BindValue)>,
}

impl UpdateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from a request object, accepting only `allowed` columns.
    ///
    /// Fails on unknown keys, values of the wrong type, and empty objects.
    pub fn from_json(object: &Map<String, Value>, allowed: &[Column]) -> StorageResult<Self> {
        let mut set = Self::new();
        for (key, value) in object {
            let column = allowed
                .iter()
                .find(|c| c.name == key.as_str())
                .ok_or_else(|| StorageError::invalid_input(format!("Unknown field: {key}")))?;
            let bound = BindValue::from_json(column.kind, value)
                .map_err(|e| StorageError::invalid_input(format!("Invalid {key}: {e}")))?;
            set.push(column.name, bound);
        }

        if set.is_empty() {
            return Err(StorageError::invalid_input("No fields to update"));
        }
        Ok(set)
    }

    /// Adds an assignment, replacing an earlier one for the same column.
    pub fn push(&mut self, column: &'static str, value: BindValue) {
        if let Some(existing) = self.assignments.iter_mut().find(|(c, _)| *c == column) {
            existing.1 = value;
        } else {
            self.assignments.push((column, value));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.assignments.iter().map(|(c, _)| *c)
    }

    pub fn get(&self, column: &str) -> Option<&BindValue> {
        self.assignments
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    /// Renders `col = $n, ...` starting at `first_placeholder`, followed by
    /// the `updated_at` touch when `touch` is set.
    pub fn set_clause(&self, first_placeholder: usize, touch: bool) -> String {
        let mut parts: Vec<String> = self
            .assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ${}", first_placeholder + i))
            .collect();
        if touch {
            parts.push("updated_at = timezone('utc', now())".to_string());
        }
        parts.join(", ")
    }

    pub fn bind_to_query<'q>(
        &self,
        mut query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        for (_, value) in &self.assignments {
            query = match value.clone() {
                BindValue::Text(v) => query.bind(v),
                BindValue::Bool(v) => query.bind(v),
                BindValue::Int(v) => query.bind(v),
                BindValue::Float(v) => query.bind(v),
                BindValue::Uuid(v) => query.bind(v),
                BindValue::Timestamp(v) => query.bind(v),
            };
        }
        query
    }

    pub fn bind_to_query_as<'q, O>(
        &self,
        mut query: QueryAs<'q, Postgres, O, PgArguments>,
    ) -> QueryAs<'q, Postgres, O, PgArguments> {
        for (_, value) in &self.assignments {
            query = match value.clone() {
                BindValue::Text(v) => query.bind(v),
                BindValue::Bool(v) => query.bind(v),
                BindValue::Int(v) => query.bind(v),
                BindValue::Float(v) => query.bind(v),
                BindValue::Uuid(v) => query.bind(v),
                BindValue::Timestamp(v) => query.bind(v),
            };
        }
        query
    }
}
