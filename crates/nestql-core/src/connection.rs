//! Connection collaborator contracts.
//!
//! The core never speaks a wire protocol. Everything that touches the
//! database goes through [`Connection`], and result sets come back as
//! seekable [`Cursor`]s. [`MemoryConnection`] is a scripted implementation
//! that records statements instead of running them.

use std::cell::RefCell;
use std::collections::VecDeque;

use tracing::debug;

use crate::error::DbError;
use crate::value::{bind_parameters, Param, SqlValue};

/// One row of a result set, in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    /// Creates a row from `(column, value)` pairs.
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<SqlValue>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns the value of a column. Missing columns read as `None`.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Iterates over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A forward-reading, seekable result set.
pub trait Cursor {
    /// Reads the row at the current position and moves past it.
    fn fetch_row(&mut self) -> Option<Row>;

    /// Moves the read position to `offset`.
    fn seek(&mut self, offset: usize);

    /// Total number of rows in the result set.
    fn row_count(&self) -> usize;
}

/// The raw connection the core runs statements through.
pub trait Connection {
    /// Runs a statement. Statements without a result set return an empty cursor.
    fn execute(&self, sql: &str) -> Result<Box<dyn Cursor>, DbError>;

    /// Escapes a string for use inside single quotes.
    fn escape_string(&self, value: &str) -> String;

    /// Id generated by the last insert.
    fn last_insert_id(&self) -> u64;

    /// Rows touched by the last write.
    fn affected_rows(&self) -> u64;

    /// Starts a transaction.
    fn begin_transaction(&self) -> Result<(), DbError>;

    /// Commits the current transaction.
    fn commit(&self) -> Result<(), DbError>;

    /// Rolls back the current transaction.
    fn rollback(&self) -> Result<(), DbError>;

    /// Runs a statement, logging it and attaching it to any error.
    fn query(&self, sql: &str) -> Result<Box<dyn Cursor>, DbError> {
        debug!(sql = %sql, "Executing SQL");
        self.execute(sql).map_err(|e| e.with_sql(sql))
    }

    /// Runs a statement after binding `:name` parameters.
    fn query_with(&self, sql: &str, params: &[(&str, Param)]) -> Result<Box<dyn Cursor>, DbError>
    where
        Self: Sized,
    {
        let bound = bind_parameters(self, sql, params);
        self.query(&bound)
    }
}

/// Escapes a string the way MySQL's `real_escape_string` does.
#[must_use]
pub fn escape_mysql(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\x1a' => out.push_str("\\Z"),
            other => out.push(other),
        }
    }
    out
}

/// An in-memory cursor over a fixed list of rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursor {
    rows: Vec<Row>,
    position: usize,
}

impl MemoryCursor {
    /// Creates a cursor positioned at the first row.
    #[must_use]
    pub const fn new(rows: Vec<Row>) -> Self {
        Self { rows, position: 0 }
    }
}

impl Cursor for MemoryCursor {
    fn fetch_row(&mut self) -> Option<Row> {
        let row = self.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        row
    }

    fn seek(&mut self, offset: usize) {
        self.position = offset;
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug)]
enum Response {
    Rows(Vec<Row>),
    Fail(DbError),
}

#[derive(Debug, Default)]
struct MemoryState {
    executed: Vec<String>,
    responses: Vec<(String, Response)>,
    insert_ids: VecDeque<u64>,
    last_insert_id: u64,
    affected: VecDeque<u64>,
    affected_rows: u64,
    transaction_depth: usize,
}

/// A scripted connection that records every statement it receives.
///
/// Responses are registered against a statement prefix and consumed by the
/// first statement that starts with it. Statements with no scripted response
/// produce an empty result set and report one affected row.
#[derive(Debug, Default)]
pub struct MemoryConnection {
    state: RefCell<MemoryState>,
}

impl MemoryConnection {
    /// Creates a connection with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the rows returned by the next statement starting with `prefix`.
    pub fn respond(&self, prefix: impl Into<String>, rows: Vec<Row>) -> &Self {
        self.state
            .borrow_mut()
            .responses
            .push((prefix.into(), Response::Rows(rows)));
        self
    }

    /// Scripts a failure for the next statement starting with `prefix`.
    pub fn fail(&self, prefix: impl Into<String>, error: DbError) -> &Self {
        self.state
            .borrow_mut()
            .responses
            .push((prefix.into(), Response::Fail(error)));
        self
    }

    /// Queues the id reported after the next successful statement.
    pub fn push_insert_id(&self, id: u64) -> &Self {
        self.state.borrow_mut().insert_ids.push_back(id);
        self
    }

    /// Queues the affected-row count reported after the next statement.
    pub fn push_affected_rows(&self, rows: u64) -> &Self {
        self.state.borrow_mut().affected.push_back(rows);
        self
    }

    /// Every statement received so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state.borrow().executed.clone()
    }

    /// Number of statements received so far.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.state.borrow().executed.len()
    }

    /// Current transaction nesting depth.
    #[must_use]
    pub fn transaction_depth(&self) -> usize {
        self.state.borrow().transaction_depth
    }
}

impl Connection for MemoryConnection {
    fn execute(&self, sql: &str) -> Result<Box<dyn Cursor>, DbError> {
        let mut state = self.state.borrow_mut();
        state.executed.push(sql.to_string());

        let response = state
            .responses
            .iter()
            .position(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|index| state.responses.remove(index).1);

        match response {
            Some(Response::Fail(error)) => Err(error),
            Some(Response::Rows(rows)) => {
                state.affected_rows = rows.len() as u64;
                Ok(Box::new(MemoryCursor::new(rows)))
            }
            None => {
                state.affected_rows = state.affected.pop_front().unwrap_or(1);
                if let Some(id) = state.insert_ids.pop_front() {
                    state.last_insert_id = id;
                }
                Ok(Box::new(MemoryCursor::default()))
            }
        }
    }

    fn escape_string(&self, value: &str) -> String {
        escape_mysql(value)
    }

    fn last_insert_id(&self) -> u64 {
        self.state.borrow().last_insert_id
    }

    fn affected_rows(&self) -> u64 {
        self.state.borrow().affected_rows
    }

    fn begin_transaction(&self) -> Result<(), DbError> {
        self.state.borrow_mut().transaction_depth += 1;
        self.query("START TRANSACTION").map(|_| ())
    }

    fn commit(&self) -> Result<(), DbError> {
        let mut state = self.state.borrow_mut();
        state.transaction_depth = state.transaction_depth.saturating_sub(1);
        drop(state);
        self.query("COMMIT").map(|_| ())
    }

    fn rollback(&self) -> Result<(), DbError> {
        let mut state = self.state.borrow_mut();
        state.transaction_depth = state.transaction_depth.saturating_sub(1);
        drop(state);
        self.query("ROLLBACK").map(|_| ())
    }
}
