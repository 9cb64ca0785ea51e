//! Record mapping
//!
//! A [`Record`] is a plain serde struct that names its table. Its fields map
//! one-to-one onto columns through `serde_json`, so renames and
//! `skip_serializing_if` work as usual.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::backends::{DatabaseValue, Fields, Row};
use crate::error::{DatabaseError, DbResult};

/// A struct stored as one row of [`Record::table_name`]
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn table_name() -> &'static str;

    /// Column values of this record
    fn to_fields(&self) -> DbResult<Fields> {
        match serde_json::to_value(self)? {
            JsonValue::Object(map) => Ok(map
                .into_iter()
                .map(|(column, value)| (column, DatabaseValue::from_json(value)))
                .collect()),
            other => Err(DatabaseError::Serialization(format!(
                "Record for table '{}' must serialize to an object, got {}",
                Self::table_name(),
                other
            ))),
        }
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        serde_json::from_value(row.to_json()).map_err(|e| {
            DatabaseError::Serialization(format!(
                "Failed to map a row of '{}' onto a record: {}",
                Self::table_name(),
                e
            ))
        })
    }
}

/// Convert a slice of records into their column maps
pub fn records_to_fields<R: Record>(records: &[R]) -> DbResult<Vec<Fields>> {
    records.iter().map(Record::to_fields).collect()
}
