//! # sqlax: Multi-URL Database Connection Manager
//!
//! A thin layer over sqlx that picks a working database out of an ordered list
//! of candidate URLs, retrying with backoff and failing over between them, and
//! hands out sessions bound to the selected engine.
//!
//! - [`DatabaseManager`]: engine selection, the lazily built session factory,
//!   schema reflection and table lookup
//! - [`Service`]: managed sessions plus CRUD and upsert helpers over
//!   [`Record`] types
//! - [`backends`]: the pluggable primitives the manager drives, with the
//!   production [`SqlxBackend`]
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqlax::{Conditions, DatabaseManager, Service};
//!
//! # async fn run() -> sqlax::DbResult<()> {
//! let manager = Arc::new(DatabaseManager::sqlx([
//!     "postgres://app@primary/app",
//!     "postgres://app@replica/app",
//! ])?);
//!
//! let mut session = manager.new_session().await?;
//! session.execute("UPDATE jobs SET state = 'queued' WHERE state = 'stale'", &[]).await?;
//! session.commit().await?;
//! session.close().await?;
//!
//! manager.reflect_schema().await?;
//! assert!(manager.lookup_table("jobs").is_some());
//!
//! let service = Service::new(manager);
//! let _removed = service.execute(|s| Box::pin(async move { s.execute("DELETE FROM jobs", &[]).await })).await?;
//! # let _ = Conditions::new();
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod manager;
pub mod schema;
pub mod security;
pub mod service;

pub use backends::{
    DatabaseBackend, DatabaseBackendType, DatabaseEngine, DatabaseSession, DatabaseValue, EnginePoolStats, Fields,
    Row, SessionFactory, SqlDialect, SqlxBackend,
};
pub use config::{EngineConfig, FailoverStrategy, ManagerConfig, RetryPolicy};
pub use error::{DatabaseError, DbResult};
pub use manager::{ConnectionState, DatabaseManager, EngineHealthReport, HealthStatus, ManagerStats};
pub use schema::{ColumnMetadata, TableMetadata};
pub use service::{records_to_fields, Conditions, Record, Service, UpsertSummary};
