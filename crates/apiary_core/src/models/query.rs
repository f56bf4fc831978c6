//! Query execution models.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ApiaryError;

/// A single value from a result row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text value.
    String(String),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the text when this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// One result row, in column order.
pub type Row = Vec<Value>;

/// Column metadata from a result descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name as reported by the server (often `table.column`)
    pub name: String,
    /// Server type name, e.g. "STRING_TYPE"
    pub type_name: String,
}

impl ColumnInfo {
    /// Creates a new column info with the given name and type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into() }
    }

    /// Column name without the `table.` prefix.
    pub fn short_name(&self) -> &str {
        self.name.rsplit_once('.').map_or(self.name.as_str(), |(_, column)| column)
    }
}

/// Outcome of executing one statement.
///
/// Three shapes exist: a result set (columns present, possibly zero rows), no
/// result set (no columns, no error) and an error (no columns, no rows). The
/// constructors are the only way to build one, so an error never carries data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
    row_count: usize,
    error: Option<String>,
    execution_time: Duration,
}

impl QueryResult {
    /// A statement that returned a result set.
    pub fn success(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self { columns, rows, row_count, error: None, execution_time: Duration::ZERO }
    }

    /// A statement without a result descriptor (session or DDL command).
    pub fn empty() -> Self {
        Self::success(Vec::new(), Vec::new())
    }

    /// A failed statement; the message is kept verbatim.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            error: Some(message.into()),
            execution_time: Duration::ZERO,
        }
    }

    /// Set the wall-clock time measured around execution.
    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = elapsed;
        self
    }

    pub(crate) fn set_execution_time(&mut self, elapsed: Duration) {
        self.execution_time = elapsed;
    }

    /// Column metadata; empty for errors and statements without a result set.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Get column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Result rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consume the result and return its rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Number of rows returned.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Driver error text, if the statement failed.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Wall-clock execution time.
    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// Check if the statement succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Check if the statement produced a result set (possibly empty).
    pub fn has_result_set(&self) -> bool {
        !self.columns.is_empty()
    }

    /// One-line text for the status bar.
    pub fn summary(&self) -> String {
        match &self.error {
            Some(message) => message.clone(),
            None if self.has_result_set() => format!(
                "{} rows returned in {:.5} seconds",
                self.row_count,
                self.execution_time.as_secs_f64()
            ),
            None => format!(
                "Statement executed in {:.5} seconds",
                self.execution_time.as_secs_f64()
            ),
        }
    }
}

/// Handle for tracking and cancelling a running query.
pub struct QueryHandle {
    /// Unique query identifier
    id: Uuid,
    /// The SQL being executed
    sql: String,
    /// Cancellation token checked between network legs
    cancel_token: CancellationToken,
    /// Execution start time
    started_at: DateTime<Utc>,
}

impl QueryHandle {
    /// Create a new query handle.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sql: sql.into(),
            cancel_token: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    /// Get the unique query identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the SQL being executed.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Get when execution started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    /// Request cancellation of the query.
    pub fn cancel(&self) {
        tracing::debug!(query_id = %self.id, "Cancellation requested");
        self.cancel_token.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a clone of the cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

impl fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandle")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("started_at", &self.started_at)
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Terminal event of one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The statement ran to completion (successfully or not).
    Completed(QueryResult),
    /// The run was cancelled and its result withheld.
    Cancelled {
        /// ID of the cancelled query.
        query_id: Uuid,
        /// The statement had already reached the server, so the session may
        /// be in an indeterminate state and should be reconnected.
        reconnect_advised: bool,
    },
}

impl QueryOutcome {
    /// The result, if the run was not cancelled.
    pub fn result(&self) -> Option<&QueryResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Cancelled { .. } => None,
        }
    }

    /// Consume the outcome and return the result, if any.
    pub fn into_result(self) -> Option<QueryResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Cancelled { .. } => None,
        }
    }

    /// Consume the outcome, turning a cancelled run into
    /// [`ApiaryError::QueryCancelled`].
    pub fn into_completed(self) -> Result<QueryResult, ApiaryError> {
        match self {
            Self::Completed(result) => Ok(result),
            Self::Cancelled { query_id, .. } => Err(ApiaryError::query_cancelled(query_id)),
        }
    }

    /// Check if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
