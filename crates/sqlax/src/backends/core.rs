//! Core Database Backend Traits
//!
//! These traits are the seams between the connection manager and a concrete
//! driver:
//!
//! - [`DatabaseBackend`]: "create engine from URL", including a connectivity probe
//! - [`DatabaseEngine`]: one live endpoint; produces a [`SessionFactory`] and reflects its schema
//! - [`SessionFactory`]: produces independent [`DatabaseSession`]s bound to one engine
//! - [`DatabaseSession`]: a unit of work the caller owns (execute, commit, rollback, close)

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{DatabaseError, DbResult};
use crate::schema::TableMetadata;

/// Column name to value mapping of one record
pub type Fields = BTreeMap<String, DatabaseValue>;

/// Creates engines from connection URLs
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Create an engine for `url` and verify it with a lightweight probe
    ///
    /// Failures are reported as [`DatabaseError::ConnectionAttemptFailed`].
    async fn create_engine(&self, url: &str, config: &EngineConfig) -> DbResult<Arc<dyn DatabaseEngine>>;
}

/// A driver-owned handle able to produce sessions for one endpoint
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// URL this engine was created from
    fn url(&self) -> &str;

    /// SQL dialect spoken by this engine
    fn sql_dialect(&self) -> SqlDialect;

    /// Build a session factory bound to this engine
    fn session_factory(&self) -> DbResult<Arc<dyn SessionFactory>>;

    /// Round-trip a trivial statement and report how long it took
    async fn health_check(&self) -> DbResult<Duration>;

    /// Introspect every table visible to this engine
    async fn reflect(&self) -> DbResult<Vec<TableMetadata>>;

    /// Current pool statistics
    fn stats(&self) -> EnginePoolStats;

    /// Release every connection held by this engine
    async fn dispose(&self);
}

/// Produces new sessions bound to a fixed engine
///
/// Factories are shared between tasks once built, so creating a session never
/// needs the manager's lock.
pub trait SessionFactory: Send + Sync {
    fn new_session(&self) -> DbResult<Box<dyn DatabaseSession>>;
}

/// A unit of work bound to one engine
///
/// A transaction is begun implicitly by the first statement and ends with
/// [`commit`](DatabaseSession::commit) or [`rollback`](DatabaseSession::rollback);
/// the next statement begins a new one. [`close`](DatabaseSession::close)
/// rolls back anything pending and makes the session unusable.
#[async_trait]
pub trait DatabaseSession: Send {
    /// Identity of this session, unique per factory call
    fn id(&self) -> Uuid;

    fn sql_dialect(&self) -> SqlDialect;

    /// Whether a transaction is currently open
    fn in_transaction(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Execute a statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64>;

    /// Execute a query and return every row
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Row>>;

    /// Execute a query and return the first row, if any
    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Option<Row>>;

    /// Commit the open transaction; a no-op when none is open
    async fn commit(&mut self) -> DbResult<()>;

    /// Roll back the open transaction; a no-op when none is open
    async fn rollback(&mut self) -> DbResult<()>;

    /// Roll back anything pending and release the session
    async fn close(&mut self) -> DbResult<()>;
}

/// Engine pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnginePoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
}

/// A fully decoded result row
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<DatabaseValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, DatabaseValue)>,
        S: Into<String>,
    {
        let (columns, values) = pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self { columns, values }
    }

    pub fn get_by_index(&self, index: usize) -> DbResult<&DatabaseValue> {
        self.values
            .get(index)
            .ok_or_else(|| DatabaseError::Query(format!("Column index {} out of range", index)))
    }

    pub fn get_by_name(&self, name: &str) -> DbResult<&DatabaseValue> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DatabaseError::Query(format!("Column '{}' not found", name)))?;
        self.get_by_index(index)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn to_json(&self) -> JsonValue {
        let map = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| (c.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        JsonValue::Object(map)
    }

    pub fn to_map(&self) -> Fields {
        self.columns.iter().cloned().zip(self.values.iter().cloned()).collect()
    }

    /// Get a typed value from a column
    pub fn get<T>(&self, column: &str) -> DbResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let value = self.get_by_name(column)?;
        serde_json::from_value(value.to_json()).map_err(|e| {
            DatabaseError::Serialization(format!("Failed to deserialize column '{}': {}", column, e))
        })
    }

    /// Get an optional typed value; `None` for NULL or a missing column
    pub fn try_get<T>(&self, column: &str) -> DbResult<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        match self.get_by_name(column) {
            Ok(value) if value.is_null() => Ok(None),
            Ok(_) => self.get(column).map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as i64),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float32(f) => serde_json::Number::from_f64(*f as f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect()),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }

    /// Create a value from JSON; strings stay strings, objects and arrays become `Json`
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(small) => DatabaseValue::Int32(small),
                        Err(_) => DatabaseValue::Int64(i),
                    }
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Null
                }
            }
            JsonValue::String(s) => DatabaseValue::String(s),
            other => DatabaseValue::Json(other),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f32> for DatabaseValue {
    fn from(value: f32) -> Self {
        DatabaseValue::Float32(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<Uuid> for DatabaseValue {
    fn from(value: Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Parameter placeholder for the zero-based `index`
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Quote character for identifiers
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => '"',
            SqlDialect::MySQL => '`',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_json_conversion() {
        assert_eq!(DatabaseValue::from_json(json!(5)), DatabaseValue::Int32(5));
        assert_eq!(
            DatabaseValue::from_json(json!(5_000_000_000i64)),
            DatabaseValue::Int64(5_000_000_000)
        );
        assert_eq!(DatabaseValue::from_json(json!(1.5)), DatabaseValue::Float64(1.5));
        assert_eq!(DatabaseValue::from_json(json!(null)), DatabaseValue::Null);
        // Timestamps and UUID-looking strings are not reinterpreted
        assert_eq!(
            DatabaseValue::from_json(json!("2024-01-01T00:00:00Z")),
            DatabaseValue::String("2024-01-01T00:00:00Z".to_string())
        );
        assert!(matches!(
            DatabaseValue::from_json(json!({"a": 1})),
            DatabaseValue::Json(_)
        ));
    }

    #[test]
    fn test_option_conversion() {
        let some: DatabaseValue = Some(3i64).into();
        let none: DatabaseValue = Option::<i64>::None.into();
        assert_eq!(some, DatabaseValue::Int64(3));
        assert!(none.is_null());
    }

    #[test]
    fn test_row_access() {
        let row = Row::from_pairs(vec![
            ("id", DatabaseValue::Int64(7)),
            ("name", DatabaseValue::from("orders")),
            ("note", DatabaseValue::Null),
        ]);

        assert_eq!(row.column_count(), 3);
        assert_eq!(row.get::<i64>("id").unwrap(), 7);
        assert_eq!(row.get::<String>("name").unwrap(), "orders");
        assert_eq!(row.try_get::<String>("note").unwrap(), None);
        assert_eq!(row.try_get::<String>("absent").unwrap(), None);
        assert!(row.get_by_name("absent").is_err());
        assert!(row.get_by_index(3).is_err());
        assert_eq!(row.to_json(), json!({"id": 7, "name": "orders", "note": null}));
        assert_eq!(row.to_map().get("id"), Some(&DatabaseValue::Int64(7)));
    }

    #[test]
    fn test_dialect_placeholders() {
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(0), "$1");
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(2), "$3");
        assert_eq!(SqlDialect::SQLite.parameter_placeholder(4), "?");
        assert_eq!(SqlDialect::MySQL.identifier_quote(), '`');
    }
}
