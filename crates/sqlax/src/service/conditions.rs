//! WHERE clause builder
//!
//! A deliberately small expression builder: conditions are joined with `AND`,
//! every column is validated and quoted, and every value becomes a bound
//! parameter in the session's placeholder style.

use std::fmt;

use crate::backends::{DatabaseValue, Fields, SqlDialect};
use crate::error::DbResult;
use crate::security::quote_identifier;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    In,
    IsNull,
    IsNotNull,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionOperator::Equal => write!(f, "="),
            ConditionOperator::NotEqual => write!(f, "<>"),
            ConditionOperator::GreaterThan => write!(f, ">"),
            ConditionOperator::GreaterThanOrEqual => write!(f, ">="),
            ConditionOperator::LessThan => write!(f, "<"),
            ConditionOperator::LessThanOrEqual => write!(f, "<="),
            ConditionOperator::Like => write!(f, "LIKE"),
            ConditionOperator::In => write!(f, "IN"),
            ConditionOperator::IsNull => write!(f, "IS NULL"),
            ConditionOperator::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// One `column <op> value(s)` predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub operator: ConditionOperator,
    pub values: Vec<DatabaseValue>,
}

/// Conjunction of predicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    conditions: Vec<Condition>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality on every field; NULL values become `IS NULL`
    pub fn from_fields(fields: &Fields) -> Self {
        fields.iter().fold(Self::new(), |conditions, (column, value)| {
            if value.is_null() {
                conditions.is_null(column.as_str())
            } else {
                conditions.eq(column.as_str(), value.clone())
            }
        })
    }

    fn push(mut self, column: impl Into<String>, operator: ConditionOperator, values: Vec<DatabaseValue>) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            operator,
            values,
        });
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(column, ConditionOperator::Equal, vec![value.into()])
    }

    pub fn ne(self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(column, ConditionOperator::NotEqual, vec![value.into()])
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(column, ConditionOperator::GreaterThan, vec![value.into()])
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(column, ConditionOperator::GreaterThanOrEqual, vec![value.into()])
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(column, ConditionOperator::LessThan, vec![value.into()])
    }

    pub fn lte(self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(column, ConditionOperator::LessThanOrEqual, vec![value.into()])
    }

    pub fn like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push(column, ConditionOperator::Like, vec![DatabaseValue::String(pattern.into())])
    }

    /// `column IN (...)`; an empty list matches nothing
    pub fn is_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push(column, ConditionOperator::In, values)
    }

    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.push(column, ConditionOperator::IsNull, Vec::new())
    }

    pub fn is_not_null(self, column: impl Into<String>) -> Self {
        self.push(column, ConditionOperator::IsNotNull, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter()
    }

    /// Render the predicate body (without `WHERE`) and its parameters
    ///
    /// `first_param` is the zero-based index of the first placeholder, so the
    /// clause can follow parameters already bound by e.g. a `SET` list.
    /// Returns an empty string when there are no conditions.
    pub fn to_sql(&self, dialect: SqlDialect, first_param: usize) -> DbResult<(String, Vec<DatabaseValue>)> {
        let mut clauses = Vec::with_capacity(self.conditions.len());
        let mut params: Vec<DatabaseValue> = Vec::new();

        for condition in &self.conditions {
            let column = quote_identifier(&condition.column, dialect)?;

            let clause = match condition.operator {
                ConditionOperator::IsNull | ConditionOperator::IsNotNull => {
                    format!("{} {}", column, condition.operator)
                }
                ConditionOperator::In if condition.values.is_empty() => "1 = 0".to_string(),
                ConditionOperator::In => {
                    let placeholders: Vec<String> = condition
                        .values
                        .iter()
                        .map(|value| {
                            params.push(value.clone());
                            dialect.parameter_placeholder(first_param + params.len() - 1)
                        })
                        .collect();
                    format!("{} IN ({})", column, placeholders.join(", "))
                }
                operator => {
                    let value = condition.values.first().cloned().unwrap_or(DatabaseValue::Null);
                    params.push(value);
                    let placeholder = dialect.parameter_placeholder(first_param + params.len() - 1);
                    format!("{} {} {}", column, operator, placeholder)
                }
            };

            clauses.push(clause);
        }

        Ok((clauses.join(" AND "), params))
    }
}
