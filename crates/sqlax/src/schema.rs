//! Reflected schema metadata
//!
//! Produced by [`crate::backends::DatabaseEngine::reflect`] and cached by the
//! manager by table name. The cache is only refreshed by an explicit
//! [`crate::DatabaseManager::reflect_schema`] call.

use serde::{Deserialize, Serialize};

/// One reflected column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Declared type as reported by the database (e.g. `INTEGER`, `text`)
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// One reflected table with its columns in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Group flat `(table, column)` rows into tables, keeping first-seen order
pub(crate) fn group_columns(rows: Vec<(String, ColumnMetadata)>) -> Vec<TableMetadata> {
    let mut tables: Vec<TableMetadata> = Vec::new();

    for (table, column) in rows {
        match tables.iter_mut().find(|t| t.name == table) {
            Some(existing) => existing.columns.push(column),
            None => tables.push(TableMetadata::new(table).with_column(column)),
        }
    }

    tables
}
