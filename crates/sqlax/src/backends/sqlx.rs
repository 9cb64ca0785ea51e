//! sqlx Backend Implementation
//!
//! One backend for every URL scheme sqlx's `Any` driver understands
//! (PostgreSQL, MySQL, SQLite), so a single manager can fail over between
//! heterogeneous endpoints. Pooling is delegated to sqlx's pool; an engine is
//! one pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Column, Row as SqlxRow, Transaction, TypeInfo, ValueRef};
use uuid::Uuid;

use super::core::*;
use super::{introspection, DatabaseBackendType};
use crate::config::EngineConfig;
use crate::error::{DatabaseError, DbResult};
use crate::schema::TableMetadata;
use crate::security::redact_url;

/// sqlx-backed engine factory
#[derive(Debug)]
pub struct SqlxBackend;

impl SqlxBackend {
    pub fn new() -> Self {
        // Idempotent; registers the compiled-in drivers with `Any`
        sqlx::any::install_default_drivers();
        Self
    }
}

impl Default for SqlxBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseBackend for SqlxBackend {
    fn name(&self) -> &'static str {
        "sqlx"
    }

    async fn create_engine(&self, url: &str, config: &EngineConfig) -> DbResult<Arc<dyn DatabaseEngine>> {
        let attempt_failed = |reason: String| DatabaseError::ConnectionAttemptFailed {
            url: redact_url(url),
            reason,
        };

        let backend_type = DatabaseBackendType::from_url(url).map_err(|e| attempt_failed(e.to_string()))?;

        let pool = pool_options(url, backend_type, config)
            .connect(url)
            .await
            .map_err(|e| attempt_failed(e.to_string()))?;

        let engine = SqlxEngine {
            url: url.to_string(),
            backend_type,
            pool,
        };

        match engine.health_check().await {
            Ok(duration) => {
                tracing::debug!("Engine for {} passed its probe in {:?}", redact_url(url), duration);
                Ok(Arc::new(engine))
            }
            Err(e) => {
                engine.dispose().await;
                Err(attempt_failed(e.to_string()))
            }
        }
    }
}

fn is_in_memory_sqlite(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn pool_options(url: &str, backend_type: DatabaseBackendType, config: &EngineConfig) -> AnyPoolOptions {
    let options = AnyPoolOptions::new()
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .test_before_acquire(config.test_before_acquire);

    if backend_type == DatabaseBackendType::SQLite && is_in_memory_sqlite(url) {
        // Each connection to an in-memory database is its own database
        return options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>);
    }

    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .idle_timeout(config.idle_timeout_seconds.map(Duration::from_secs))
        .max_lifetime(config.max_lifetime_seconds.map(Duration::from_secs))
}

/// One sqlx pool for one URL
pub struct SqlxEngine {
    url: String,
    backend_type: DatabaseBackendType,
    pool: AnyPool,
}

impl std::fmt::Debug for SqlxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxEngine")
            .field("url", &redact_url(&self.url))
            .field("backend_type", &self.backend_type)
            .finish_non_exhaustive()
    }
}

impl SqlxEngine {
    pub fn backend_type(&self) -> DatabaseBackendType {
        self.backend_type
    }
}

#[async_trait]
impl DatabaseEngine for SqlxEngine {
    fn url(&self) -> &str {
        &self.url
    }

    fn sql_dialect(&self) -> SqlDialect {
        self.backend_type.sql_dialect()
    }

    fn session_factory(&self) -> DbResult<Arc<dyn SessionFactory>> {
        if self.pool.is_closed() {
            return Err(DatabaseError::Transaction("Engine has been disposed".to_string()));
        }

        Ok(Arc::new(SqlxSessionFactory {
            pool: self.pool.clone(),
            dialect: self.sql_dialect(),
        }))
    }

    async fn health_check(&self) -> DbResult<Duration> {
        let start = Instant::now();

        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => DatabaseError::PoolTimeout(format!("Health check of {}", redact_url(&self.url))),
            other => DatabaseError::Query(format!("Health check failed: {}", other)),
        })?;

        Ok(start.elapsed())
    }

    async fn reflect(&self) -> DbResult<Vec<TableMetadata>> {
        introspection::reflect(&self.pool, self.backend_type).await
    }

    fn stats(&self) -> EnginePoolStats {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        EnginePoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
        }
    }

    async fn dispose(&self) {
        self.pool.close().await;
    }
}

/// Hands out lazily-connected sessions over a shared pool
pub struct SqlxSessionFactory {
    pool: AnyPool,
    dialect: SqlDialect,
}

impl SessionFactory for SqlxSessionFactory {
    fn new_session(&self) -> DbResult<Box<dyn DatabaseSession>> {
        Ok(Box::new(SqlxSession {
            id: Uuid::new_v4(),
            pool: self.pool.clone(),
            dialect: self.dialect,
            tx: None,
            closed: false,
        }))
    }
}

/// Session over a pooled connection; the connection is only taken from the
/// pool when the first statement begins a transaction
pub struct SqlxSession {
    id: Uuid,
    pool: AnyPool,
    dialect: SqlDialect,
    tx: Option<Transaction<'static, Any>>,
    closed: bool,
}

impl SqlxSession {
    fn ensure_open(&self) -> DbResult<()> {
        if self.closed {
            Err(DatabaseError::Transaction(format!("Session {} is closed", self.id)))
        } else {
            Ok(())
        }
    }

    async fn transaction(&mut self) -> DbResult<&mut Transaction<'static, Any>> {
        self.ensure_open()?;

        if self.tx.is_none() {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| match e {
                    sqlx::Error::PoolTimedOut => DatabaseError::PoolTimeout(format!("Session {}", self.id)),
                    other => DatabaseError::Transaction(format!("Failed to begin transaction: {}", other)),
                })?;
            tracing::debug!("Session {} began a transaction", self.id);
            self.tx = Some(tx);
        }

        self.tx
            .as_mut()
            .ok_or_else(|| DatabaseError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseSession for SqlxSession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn sql_dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let query = bind_all(sqlx::query(sql), params);
        let tx = self.transaction().await?;

        let result = query.execute(&mut **tx).await.map_err(query_error)?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Row>> {
        let query = bind_all(sqlx::query(sql), params);
        let tx = self.transaction().await?;

        let rows = query.fetch_all(&mut **tx).await.map_err(query_error)?;

        rows.iter().map(decode_row).collect()
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Option<Row>> {
        let query = bind_all(sqlx::query(sql), params);
        let tx = self.transaction().await?;

        let row = query.fetch_optional(&mut **tx).await.map_err(query_error)?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.ensure_open()?;

        if let Some(tx) = self.tx.take() {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Transaction(format!("Transaction commit failed: {}", e)))?;
            tracing::debug!("Session {} committed", self.id);
        }

        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback()
                .await
                .map_err(|e| DatabaseError::Transaction(format!("Transaction rollback failed: {}", e)))?;
            tracing::debug!("Session {} rolled back", self.id);
        }

        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if self.closed {
            return Ok(());
        }

        let result = self.rollback().await;
        self.closed = true;
        result
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[DatabaseValue],
) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = bind_database_value(query, param);
    }
    query
}

/// Bind a DatabaseValue to a sqlx query; types `Any` cannot carry are sent as text
fn bind_database_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &DatabaseValue,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float32(f) => query.bind(*f),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(u.to_string()),
        DatabaseValue::DateTime(dt) => query.bind(dt.to_rfc3339()),
        DatabaseValue::Json(j) => query.bind(j.to_string()),
    }
}

/// Map a driver error, recognising unique-constraint violations
pub(super) fn query_error(err: sqlx::Error) -> DatabaseError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return DatabaseError::DuplicateRecord(db_err.message().to_string());
        }
    }
    DatabaseError::Query(format!("Query execution failed: {}", err))
}

pub(super) fn decode_row(row: &AnyRow) -> DbResult<Row> {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..columns.len())
        .map(|index| decode_value(row, index))
        .collect::<DbResult<Vec<_>>>()?;

    Ok(Row::new(columns, values))
}

/// Convert one `Any` column value to a DatabaseValue
fn decode_value(row: &AnyRow, index: usize) -> DbResult<DatabaseValue> {
    let type_name = {
        let raw = row.try_get_raw(index).map_err(query_error)?;
        // SQLite reports the storage class of a NULL cell as type NULL
        if raw.is_null() || raw.type_info().is_null() {
            return Ok(DatabaseValue::Null);
        }
        raw.type_info().name().to_string()
    };

    let decode_err = |e: sqlx::Error| {
        DatabaseError::Query(format!("Failed to decode column {} as {}: {}", index, type_name, e))
    };

    let value = match type_name.as_str() {
        "NULL" => DatabaseValue::Null,
        "BOOLEAN" => DatabaseValue::Bool(row.try_get(index).map_err(decode_err)?),
        "SMALLINT" => DatabaseValue::Int32(row.try_get::<i16, _>(index).map_err(decode_err)?.into()),
        "INTEGER" => DatabaseValue::Int32(row.try_get(index).map_err(decode_err)?),
        "BIGINT" => DatabaseValue::Int64(row.try_get(index).map_err(decode_err)?),
        "REAL" => DatabaseValue::Float32(row.try_get(index).map_err(decode_err)?),
        "DOUBLE" => DatabaseValue::Float64(row.try_get(index).map_err(decode_err)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get(index).map_err(decode_err)?),
        _ => DatabaseValue::String(row.try_get(index).map_err(decode_err)?),
    };

    Ok(value)
}
