//! Data-access helpers on top of the manager
//!
//! [`Service`] runs every operation in a managed session: a fresh session is
//! taken from the [`DatabaseManager`], committed when the operation succeeds,
//! rolled back when it fails, and closed on every path. Failures are reported
//! as [`DatabaseError::Operation`] wrapping the original cause.

mod conditions;
mod record;

pub use conditions::{Condition, ConditionOperator, Conditions};
pub use record::{records_to_fields, Record};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::backends::{DatabaseSession, DatabaseValue, Fields, Row, SqlDialect};
use crate::error::{DatabaseError, DbResult};
use crate::manager::DatabaseManager;
use crate::security::quote_identifier;

/// Future returned by a closure handed to [`Service::execute`]
pub type SessionFuture<'s, R> = Pin<Box<dyn Future<Output = DbResult<R>> + Send + 's>>;

/// Outcome of [`Service::upsert`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: u64,
    pub updated: u64,
}

/// CRUD helpers bound to one manager
#[derive(Debug, Clone)]
pub struct Service {
    manager: Arc<DatabaseManager>,
}

impl Service {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<DatabaseManager> {
        &self.manager
    }

    /// Run `operation` in a managed session
    ///
    /// ```no_run
    /// # async fn demo(service: sqlax::Service) -> sqlax::DbResult<()> {
    /// let removed = service
    ///     .execute(|session| Box::pin(async move { session.execute("DELETE FROM audit_log", &[]).await }))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute<R, F>(&self, operation: F) -> DbResult<R>
    where
        R: Send,
        F: for<'s> FnOnce(&'s mut dyn DatabaseSession) -> SessionFuture<'s, R>,
    {
        let mut session = self.manager.new_session().await?;
        let session_id = session.id();

        let outcome = match operation(session.as_mut()).await {
            Ok(value) => session.commit().await.map(|_| value),
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::debug!("Session {} operation failed, rolling back: {}", session_id, e);
                if let Err(rollback_err) = session.rollback().await {
                    tracing::warn!("Rollback of session {} failed: {}", session_id, rollback_err);
                }
                Err(DatabaseError::wrap_operation(e))
            }
        };

        if let Err(close_err) = session.close().await {
            tracing::warn!("Closing session {} failed: {}", session_id, close_err);
        }

        result
    }

    /// Insert one record and return the stored column values
    pub async fn add<R: Record>(&self, record: &R) -> DbResult<Fields> {
        let fields = record.to_fields()?;
        self.execute(move |session| Box::pin(async move { insert_fields(session, R::table_name(), &fields).await }))
            .await
    }

    /// Insert every record in one transaction
    pub async fn add_all<R: Record>(&self, records: &[R]) -> DbResult<Vec<Fields>> {
        let all_fields = records_to_fields(records)?;
        self.execute(move |session| {
            Box::pin(async move {
                let mut stored = Vec::with_capacity(all_fields.len());
                for fields in &all_fields {
                    stored.push(insert_fields(session, R::table_name(), fields).await?);
                }
                Ok::<_, DatabaseError>(stored)
            })
        })
        .await
    }

    pub async fn find<R: Record>(&self, conditions: Conditions) -> DbResult<Vec<R>> {
        let rows = self
            .execute(move |session| Box::pin(async move { select_rows(session, R::table_name(), &conditions, None).await }))
            .await?;
        rows.iter().map(R::from_row).collect()
    }

    pub async fn find_one<R: Record>(&self, conditions: Conditions) -> DbResult<Option<R>> {
        let rows = self
            .execute(move |session| {
                Box::pin(async move { select_rows(session, R::table_name(), &conditions, Some(1)).await })
            })
            .await?;
        rows.first().map(R::from_row).transpose()
    }

    /// Like [`Service::find_one`], but a missing record is [`DatabaseError::RecordNotFound`]
    pub async fn get<R: Record>(&self, conditions: Conditions) -> DbResult<R> {
        self.find_one(conditions)
            .await?
            .ok_or_else(|| DatabaseError::RecordNotFound(R::table_name().to_string()))
    }

    /// Find by one column: a single value compares with `=`, several with `IN`
    pub async fn quick_find_by<R, V>(&self, column: &str, values: Vec<V>) -> DbResult<Vec<R>>
    where
        R: Record,
        V: Into<DatabaseValue>,
    {
        let mut values: Vec<DatabaseValue> = values.into_iter().map(Into::into).collect();
        let conditions = match values.len() {
            0 => return Ok(Vec::new()),
            1 => Conditions::new().eq(column, values.remove(0)),
            _ => Conditions::new().is_in(column, values),
        };
        self.find(conditions).await
    }

    /// Set `values` on every row of `R`'s table matching `conditions`
    pub async fn update_where<R: Record>(&self, values: Fields, conditions: Conditions) -> DbResult<u64> {
        self.execute(move |session| {
            Box::pin(async move { update_rows(session, R::table_name(), &values, &conditions).await })
        })
        .await
    }

    /// Delete every row of `R`'s table matching `conditions`; no conditions deletes all rows
    pub async fn delete_where<R: Record>(&self, conditions: Conditions) -> DbResult<u64> {
        self.execute(move |session| Box::pin(async move { delete_rows(session, R::table_name(), &conditions).await }))
            .await
    }

    /// Update records that match on `conflict_target`, insert the others
    ///
    /// Runs in one transaction: each record is looked up by its conflict
    /// target columns, and either its remaining columns are updated or it is
    /// inserted.
    pub async fn upsert<R: Record>(&self, records: &[R], conflict_target: &[&str]) -> DbResult<UpsertSummary> {
        if conflict_target.is_empty() {
            return Err(DatabaseError::Validation(
                "Upsert requires at least one conflict target column".to_string(),
            ));
        }

        let all_fields = records_to_fields(records)?;
        let target: Vec<String> = conflict_target.iter().map(|c| c.to_string()).collect();

        self.execute(move |session| {
            Box::pin(async move {
                let mut summary = UpsertSummary::default();
                let table = R::table_name();

                for fields in &all_fields {
                    let (lookup, changes) = split_conflict_target(fields, &target)?;
                    let existing = select_rows(session, table, &lookup, Some(1)).await?;

                    if existing.is_empty() {
                        insert_fields(session, table, fields).await?;
                        summary.inserted += 1;
                    } else {
                        if !changes.is_empty() {
                            update_rows(session, table, &changes, &lookup).await?;
                        }
                        summary.updated += 1;
                    }
                }

                Ok::<_, DatabaseError>(summary)
            })
        })
        .await
    }
}

fn split_conflict_target(fields: &Fields, target: &[String]) -> DbResult<(Conditions, Fields)> {
    let mut lookup = Conditions::new();
    for column in target {
        let value = fields.get(column).ok_or_else(|| {
            DatabaseError::Validation(format!("Record has no value for conflict target column '{}'", column))
        })?;
        lookup = if value.is_null() {
            lookup.is_null(column.as_str())
        } else {
            lookup.eq(column.as_str(), value.clone())
        };
    }

    let changes = fields
        .iter()
        .filter(|(column, _)| !target.contains(*column))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();

    Ok((lookup, changes))
}

fn where_clause(conditions: &Conditions, session: &dyn DatabaseSession, first_param: usize) -> DbResult<(String, Vec<DatabaseValue>)> {
    let (predicate, params) = conditions.to_sql(session.sql_dialect(), first_param)?;
    if predicate.is_empty() {
        Ok((String::new(), params))
    } else {
        Ok((format!(" WHERE {}", predicate), params))
    }
}

/// Insert one row; NULL fields are left to the column default
async fn insert_fields(session: &mut dyn DatabaseSession, table: &str, fields: &Fields) -> DbResult<Fields> {
    let dialect = session.sql_dialect();
    let table_sql = quote_identifier(table, dialect)?;

    let mut columns = Vec::new();
    let mut placeholders = Vec::new();
    let mut params = Vec::new();
    for (column, value) in fields.iter().filter(|(_, value)| !value.is_null()) {
        columns.push(quote_identifier(column, dialect)?);
        placeholders.push(dialect.parameter_placeholder(params.len()));
        params.push(value.clone());
    }

    let mut sql = if columns.is_empty() {
        match dialect {
            SqlDialect::MySQL => format!("INSERT INTO {} () VALUES ()", table_sql),
            _ => format!("INSERT INTO {} DEFAULT VALUES", table_sql),
        }
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_sql,
            columns.join(", "),
            placeholders.join(", ")
        )
    };

    tracing::debug!("Inserting into {} ({} column(s))", table, params.len());

    match dialect {
        SqlDialect::MySQL => {
            session.execute(&sql, &params).await?;
            Ok(fields.clone())
        }
        _ => {
            sql.push_str(" RETURNING *");
            let row = session.fetch_optional(&sql, &params).await?;
            Ok(row.map(|r| r.to_map()).unwrap_or_else(|| fields.clone()))
        }
    }
}

async fn select_rows(
    session: &mut dyn DatabaseSession,
    table: &str,
    conditions: &Conditions,
    limit: Option<u64>,
) -> DbResult<Vec<Row>> {
    let table_sql = quote_identifier(table, session.sql_dialect())?;
    let (where_sql, params) = where_clause(conditions, session, 0)?;

    let mut sql = format!("SELECT * FROM {}{}", table_sql, where_sql);
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    session.fetch_all(&sql, &params).await
}

async fn update_rows(
    session: &mut dyn DatabaseSession,
    table: &str,
    values: &Fields,
    conditions: &Conditions,
) -> DbResult<u64> {
    if values.is_empty() {
        return Err(DatabaseError::Validation(format!(
            "Update of '{}' requires at least one column",
            table
        )));
    }

    let dialect = session.sql_dialect();
    let table_sql = quote_identifier(table, dialect)?;

    let mut assignments = Vec::with_capacity(values.len());
    let mut params = Vec::with_capacity(values.len());
    for (column, value) in values {
        assignments.push(format!(
            "{} = {}",
            quote_identifier(column, dialect)?,
            dialect.parameter_placeholder(params.len())
        ));
        params.push(value.clone());
    }

    let (where_sql, where_params) = where_clause(conditions, session, params.len())?;
    params.extend(where_params);

    let sql = format!("UPDATE {} SET {}{}", table_sql, assignments.join(", "), where_sql);
    let affected = session.execute(&sql, &params).await?;
    tracing::debug!("Updated {} row(s) of {}", affected, table);
    Ok(affected)
}

async fn delete_rows(session: &mut dyn DatabaseSession, table: &str, conditions: &Conditions) -> DbResult<u64> {
    let table_sql = quote_identifier(table, session.sql_dialect())?;
    let (where_sql, params) = where_clause(conditions, session, 0)?;

    let sql = format!("DELETE FROM {}{}", table_sql, where_sql);
    let affected = session.execute(&sql, &params).await?;
    tracing::debug!("Deleted {} row(s) of {}", affected, table);
    Ok(affected)
}
