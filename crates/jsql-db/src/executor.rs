//! The execution seam between the query pipeline and a database.
//!
//! [`DbExecutor`] is the one capability the pipeline needs from a backend:
//! run a query with named parameters and return a [`ResultSet`]. Backends in
//! `jsql-db-backends` implement it; [`Session`](crate::session::Session)
//! wraps one in a transaction.

use jsql_core::error::{JsqlError, JsqlResult};

use crate::row::Row;
use crate::value::Value;

/// Minimal async database executor.
///
/// Parameters arrive keyword-expanded: one `(name, value)` pair per named
/// placeholder, names without the `:` sigil.
#[async_trait::async_trait]
pub trait DbExecutor: Send + Sync {
    /// Short name of the database vendor, e.g. `"sqlite"`.
    fn vendor(&self) -> &str;

    /// Runs a query and returns every row.
    async fn query(&self, sql: &str, params: &[(String, Value)]) -> JsqlResult<ResultSet>;

    /// Runs a statement that returns no rows; returns the number of rows affected.
    async fn execute_sql(&self, sql: &str, params: &[(String, Value)]) -> JsqlResult<u64>;

    /// Runs a query that must return at least one row and returns the first.
    ///
    /// Returns `DoesNotExist` when the result is empty.
    async fn query_one(&self, sql: &str, params: &[(String, Value)]) -> JsqlResult<Row> {
        self.query(sql, params)
            .await?
            .into_rows()
            .next()
            .ok_or_else(|| JsqlError::DoesNotExist("query returned no rows".to_string()))
    }
}

/// A tabular result: ordered column names and rows of equal width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Creates a result set.
    ///
    /// # Errors
    ///
    /// Returns a `DatabaseError` if any row's width differs from the number
    /// of columns.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> JsqlResult<Self> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(JsqlError::DatabaseError(format!(
                "row {i} has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the raw rows.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consumes the set into [`Row`]s that carry their column names.
    pub fn into_rows(self) -> impl Iterator<Item = Row> {
        let columns = self.columns;
        self.rows.into_iter().map(move |values| Row {
            columns: columns.clone(),
            values,
        })
    }

    /// Splits into columns and rows.
    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<Value>>) {
        (self.columns, self.rows)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! A recording executor for pipeline and session tests.

    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Call {
        pub sql: String,
        pub params: Vec<(String, Value)>,
    }

    #[derive(Default)]
    pub(crate) struct MockExecutor {
        result: ResultSet,
        calls: Mutex<Vec<Call>>,
    }

    impl MockExecutor {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn returning(result: ResultSet) -> Self {
            Self {
                result,
                calls: Mutex::default(),
            }
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn statements(&self) -> Vec<String> {
            self.calls().into_iter().map(|c| c.sql).collect()
        }

        fn record(&self, sql: &str, params: &[(String, Value)]) {
            self.calls.lock().unwrap().push(Call {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
        }
    }

    #[async_trait::async_trait]
    impl DbExecutor for MockExecutor {
        fn vendor(&self) -> &str {
            "mock"
        }

        async fn query(&self, sql: &str, params: &[(String, Value)]) -> JsqlResult<ResultSet> {
            self.record(sql, params);
            Ok(self.result.clone())
        }

        async fn execute_sql(&self, sql: &str, params: &[(String, Value)]) -> JsqlResult<u64> {
            self.record(sql, params);
            Ok(0)
        }
    }
}
