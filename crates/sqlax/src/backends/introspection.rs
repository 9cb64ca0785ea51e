//! Per-dialect schema reflection queries

use sqlx::AnyPool;

use super::core::{DatabaseValue, Row};
use super::sqlx::decode_row;
use super::DatabaseBackendType;
use crate::error::{DatabaseError, DbResult};
use crate::schema::{group_columns, ColumnMetadata, TableMetadata};

const SQLITE_TABLES: &str = "SELECT name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

const SQLITE_COLUMNS: &str = "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?) ORDER BY cid";

const POSTGRES_COLUMNS: &str = "SELECT c.table_name::text AS table_name, \
            c.column_name::text AS column_name, \
            c.data_type::text AS data_type, \
            (c.is_nullable = 'YES') AS nullable, \
            EXISTS ( \
                SELECT 1 FROM information_schema.table_constraints tc \
                JOIN information_schema.key_column_usage kcu \
                  ON tc.constraint_name = kcu.constraint_name \
                 AND tc.table_schema = kcu.table_schema \
                 AND tc.table_name = kcu.table_name \
                WHERE tc.constraint_type = 'PRIMARY KEY' \
                  AND tc.table_schema = c.table_schema \
                  AND tc.table_name = c.table_name \
                  AND kcu.column_name = c.column_name \
            ) AS primary_key \
     FROM information_schema.columns c \
     JOIN information_schema.tables t \
       ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
     WHERE c.table_schema = current_schema() AND t.table_type = 'BASE TABLE' \
     ORDER BY c.table_name, c.ordinal_position";

const MYSQL_COLUMNS: &str = "SELECT CAST(c.TABLE_NAME AS CHAR) AS table_name, \
            CAST(c.COLUMN_NAME AS CHAR) AS column_name, \
            CAST(c.COLUMN_TYPE AS CHAR) AS data_type, \
            CAST(c.IS_NULLABLE = 'YES' AS SIGNED) AS nullable, \
            CAST(c.COLUMN_KEY = 'PRI' AS SIGNED) AS primary_key \
     FROM information_schema.COLUMNS c \
     JOIN information_schema.TABLES t \
       ON t.TABLE_SCHEMA = c.TABLE_SCHEMA AND t.TABLE_NAME = c.TABLE_NAME \
     WHERE c.TABLE_SCHEMA = DATABASE() AND t.TABLE_TYPE = 'BASE TABLE' \
     ORDER BY c.TABLE_NAME, c.ORDINAL_POSITION";

/// Reflect every base table visible to `pool`
pub(super) async fn reflect(pool: &AnyPool, backend_type: DatabaseBackendType) -> DbResult<Vec<TableMetadata>> {
    let tables = match backend_type {
        DatabaseBackendType::SQLite => reflect_sqlite(pool).await,
        DatabaseBackendType::PostgreSQL => reflect_flat(pool, POSTGRES_COLUMNS).await,
        DatabaseBackendType::MySQL => reflect_flat(pool, MYSQL_COLUMNS).await,
    };

    tables.map_err(|e| DatabaseError::SchemaUnavailable(format!("{} reflection failed: {}", backend_type, e)))
}

async fn fetch(pool: &AnyPool, sql: &str, bind: Option<&str>) -> DbResult<Vec<Row>> {
    let mut query = sqlx::query(sql);
    if let Some(value) = bind {
        query = query.bind(value.to_string());
    }

    let rows = query.fetch_all(pool).await.map_err(super::sqlx::query_error)?;
    rows.iter().map(decode_row).collect()
}

async fn reflect_sqlite(pool: &AnyPool) -> DbResult<Vec<TableMetadata>> {
    let mut tables = Vec::new();

    for table_row in fetch(pool, SQLITE_TABLES, None).await? {
        let name: String = table_row.get("name")?;
        let mut table = TableMetadata::new(name.clone());

        for column_row in fetch(pool, SQLITE_COLUMNS, Some(&name)).await? {
            let primary_key = flag(&column_row, "pk")?;
            table = table.with_column(ColumnMetadata {
                name: column_row.get("name")?,
                data_type: column_row.try_get("type")?.unwrap_or_default(),
                nullable: !flag(&column_row, "notnull")? && !primary_key,
                primary_key,
            });
        }

        tables.push(table);
    }

    Ok(tables)
}

async fn reflect_flat(pool: &AnyPool, sql: &str) -> DbResult<Vec<TableMetadata>> {
    let rows = fetch(pool, sql, None).await?;

    let columns = rows
        .iter()
        .map(|row| {
            let table: String = row.get("table_name")?;
            let column = ColumnMetadata {
                name: row.get("column_name")?,
                data_type: row.get("data_type")?,
                nullable: flag(row, "nullable")?,
                primary_key: flag(row, "primary_key")?,
            };
            Ok((table, column))
        })
        .collect::<DbResult<Vec<_>>>()?;

    Ok(group_columns(columns))
}

/// Read a boolean that drivers may report as a bool or as a 0/1 integer
fn flag(row: &Row, column: &str) -> DbResult<bool> {
    match row.get_by_name(column)? {
        DatabaseValue::Bool(b) => Ok(*b),
        DatabaseValue::Null => Ok(false),
        other => other.as_i64().map(|n| n != 0).ok_or_else(|| {
            DatabaseError::Serialization(format!("Column '{}' is not a flag: {:?}", column, other))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_accepts_bools_and_integers() {
        let row = Row::from_pairs(vec![
            ("a", DatabaseValue::Bool(true)),
            ("b", DatabaseValue::Int64(0)),
            ("c", DatabaseValue::Int32(1)),
            ("d", DatabaseValue::Null),
            ("e", DatabaseValue::from("yes")),
        ]);

        assert!(flag(&row, "a").unwrap());
        assert!(!flag(&row, "b").unwrap());
        assert!(flag(&row, "c").unwrap());
        assert!(!flag(&row, "d").unwrap());
        assert!(flag(&row, "e").is_err());
    }
}
