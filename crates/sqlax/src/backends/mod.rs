//! Database Backend Abstractions
//!
//! The manager never talks to a driver directly. It goes through the
//! pluggable primitives in [`core`]: a [`DatabaseBackend`] creates and probes
//! engines from URLs, a [`DatabaseEngine`] hands out a [`SessionFactory`] and
//! reflects its schema. [`SqlxBackend`] is the production implementation.

pub mod core;
mod introspection;
pub mod sqlx;

pub use self::core::*;
pub use self::sqlx::SqlxBackend;

use crate::error::{DatabaseError, DbResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect the backend from a connection URL scheme
    pub fn from_url(url: &str) -> DbResult<Self> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            Ok(DatabaseBackendType::MySQL)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseBackendType::SQLite)
        } else {
            Err(DatabaseError::Configuration(format!(
                "Unable to detect database backend from URL: {}",
                crate::security::redact_url(url)
            )))
        }
    }

    pub fn sql_dialect(&self) -> SqlDialect {
        match self {
            DatabaseBackendType::PostgreSQL => SqlDialect::PostgreSQL,
            DatabaseBackendType::MySQL => SqlDialect::MySQL,
            DatabaseBackendType::SQLite => SqlDialect::SQLite,
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatabaseBackendType::MySQL),
            "sqlite" => Ok(DatabaseBackendType::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}
