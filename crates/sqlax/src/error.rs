//! Error types for the connection manager and the helpers built on it
//!
//! A single [`DatabaseError`] enum covers configuration, connection
//! acquisition, reflection and the data-access helpers. Per-URL probe failures
//! ([`DatabaseError::ConnectionAttemptFailed`]) are logged by the manager and
//! only surface to callers once every candidate is exhausted
//! ([`DatabaseError::ConnectionUnavailable`]).

use crate::config::ConfigError;

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DatabaseError>;

/// Error types for database operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatabaseError {
    /// Invalid manager configuration (e.g. an empty URL list). Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A single candidate URL could not be connected or failed its probe
    #[error("Connection attempt to {url} failed: {reason}")]
    ConnectionAttemptFailed { url: String, reason: String },

    /// Every candidate URL was exhausted within the retry budget
    #[error("No valid connection exists: {candidates} url(s) tried, {attempts} attempt(s) over {rounds} round(s)")]
    ConnectionUnavailable {
        candidates: usize,
        attempts: u32,
        rounds: u32,
    },

    /// Every pooled connection stayed checked out past the acquire timeout.
    /// The engine is busy, not unreachable.
    #[error("Timed out waiting for a pooled connection: {0}")]
    PoolTimeout(String),

    /// Schema reflection could not be performed on the selected engine
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    /// Statement execution or row decoding failed
    #[error("Query error: {0}")]
    Query(String),

    /// Begin/commit/rollback failed or the session was already closed
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// No record matched in the given table
    #[error("Record not found in table '{0}'")]
    RecordNotFound(String),

    /// A unique constraint rejected the write
    #[error("Duplicate record: {0}")]
    DuplicateRecord(String),

    /// Invalid identifiers or arguments handed to a helper
    #[error("Validation error: {0}")]
    Validation(String),

    /// Record <-> row mapping failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A managed-session operation failed and was rolled back
    #[error("Database operation failed: {0}")]
    Operation(#[source] Box<DatabaseError>),
}

impl DatabaseError {
    /// Whether this error means no engine could be obtained at all
    pub fn is_connection_unavailable(&self) -> bool {
        match self {
            DatabaseError::ConnectionUnavailable { .. } => true,
            DatabaseError::Operation(inner) => inner.is_connection_unavailable(),
            _ => false,
        }
    }

    /// Whether the engine answered too slowly because its pool was exhausted
    pub fn is_pool_timeout(&self) -> bool {
        matches!(self.root_cause(), DatabaseError::PoolTimeout(_))
    }

    /// Strip any [`DatabaseError::Operation`] wrappers and return the root cause
    pub fn root_cause(&self) -> &DatabaseError {
        match self {
            DatabaseError::Operation(inner) => inner.root_cause(),
            other => other,
        }
    }

    pub(crate) fn wrap_operation(err: DatabaseError) -> Self {
        match err {
            // Never double-wrap
            DatabaseError::Operation(_) => err,
            other => DatabaseError::Operation(Box::new(other)),
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

impl From<ConfigError> for DatabaseError {
    fn from(err: ConfigError) -> Self {
        DatabaseError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_unavailable_message_names_budget() {
        let err = DatabaseError::ConnectionUnavailable {
            candidates: 2,
            attempts: 6,
            rounds: 3,
        };
        let message = err.to_string();
        assert!(message.contains("2 url(s)"));
        assert!(message.contains("6 attempt(s)"));
        assert!(message.contains("3 round(s)"));
    }

    #[test]
    fn test_operation_wrapping_is_flat() {
        let inner = DatabaseError::Query("boom".to_string());
        let wrapped = DatabaseError::wrap_operation(inner);
        let rewrapped = DatabaseError::wrap_operation(wrapped);

        match &rewrapped {
            DatabaseError::Operation(cause) => {
                assert!(matches!(**cause, DatabaseError::Query(_)));
            }
            other => panic!("Expected operation error, got {:?}", other),
        }
        assert!(matches!(rewrapped.root_cause(), DatabaseError::Query(_)));
    }

    #[test]
    fn test_connection_unavailable_detection_through_wrapper() {
        let err = DatabaseError::wrap_operation(DatabaseError::ConnectionUnavailable {
            candidates: 1,
            attempts: 3,
            rounds: 3,
        });
        assert!(err.is_connection_unavailable());
        assert!(!DatabaseError::Query("x".to_string()).is_connection_unavailable());
    }

    #[test]
    fn test_pool_timeout_detection() {
        assert!(DatabaseError::PoolTimeout("busy".to_string()).is_pool_timeout());
        assert!(DatabaseError::wrap_operation(DatabaseError::PoolTimeout("busy".to_string())).is_pool_timeout());
        assert!(!DatabaseError::Query("x".to_string()).is_pool_timeout());
    }

    #[test]
    fn test_config_error_conversion() {
        let err: DatabaseError = ConfigError::InvalidValue {
            field: "max_attempts".to_string(),
            value: "0".to_string(),
            expected: "at least 1".to_string(),
        }
        .into();
        assert!(matches!(err, DatabaseError::Configuration(_)));
    }
}
