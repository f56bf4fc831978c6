//! Scripted in-memory driver for tests and headless runs.
//!
//! Responses are keyed by the trimmed statement text. Unscripted `SELECT`
//! statements return a one-row mock result and everything else behaves like a
//! session command with no result set. Connection failures, dropped sessions,
//! latency and statement gates can be injected at any time through a shared
//! handle, since the driver is cheap to clone.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{DriverError, RemoteSession, SessionDriver, SessionParams};
use crate::models::{ColumnInfo, Row, Value};

/// Error text reported by a session that the server has dropped.
pub const DROPPED_SESSION_MESSAGE: &str = "TSocket read 0 bytes";

/// Scripted reply to one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    /// A result set.
    ResultSet {
        /// Result descriptor.
        columns: Vec<ColumnInfo>,
        /// Rows returned by `fetch_all`.
        rows: Vec<Row>,
    },
    /// A statement without a result descriptor.
    NoResultSet,
    /// A failing statement.
    Error(String),
}

impl MockResponse {
    /// A result set of string columns.
    pub fn rows(columns: &[&str], rows: Vec<Row>) -> Self {
        Self::ResultSet {
            columns: columns.iter().map(|name| ColumnInfo::new(*name, "STRING_TYPE")).collect(),
            rows,
        }
    }

    /// A single-column result set of strings, one row per item.
    pub fn strings(column: &str, values: &[&str]) -> Self {
        Self::rows(&[column], values.iter().map(|v| vec![Value::from(*v)]).collect())
    }

    /// A failing statement.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

/// Holds one statement on the server until released.
///
/// Lets tests act while a statement is provably in flight.
#[derive(Debug, Clone, Default)]
pub struct StatementGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl StatementGate {
    /// Wait until the gated statement has been sent.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the gated statement complete.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Debug, Default)]
struct MockState {
    responses: HashMap<String, MockResponse>,
    gates: HashMap<String, StatementGate>,
    connect_failures: VecDeque<String>,
    refuse_message: Option<String>,
    close_failure: Option<String>,
    latency: Duration,
    epoch: u64,
    connect_attempts: usize,
    open_count: usize,
    close_count: usize,
    executed: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
    last_params: Option<SessionParams>,
}

/// In-memory [`SessionDriver`].
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Create a driver that accepts every connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a response, builder style.
    pub fn with_response(self, sql: &str, response: MockResponse) -> Self {
        self.respond(sql, response);
        self
    }

    /// Script the response for a statement.
    pub fn respond(&self, sql: &str, response: MockResponse) {
        self.state.lock().responses.insert(sql.trim().to_string(), response);
    }

    /// Make the next connection attempt fail with `message`.
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        self.state.lock().connect_failures.push_back(message.into());
    }

    /// Make every connection attempt fail until [`accept_connections`](Self::accept_connections).
    pub fn refuse_connections(&self, message: impl Into<String>) {
        self.state.lock().refuse_message = Some(message.into());
    }

    /// Stop refusing connections.
    pub fn accept_connections(&self) {
        self.state.lock().refuse_message = None;
    }

    /// Make every `close` report `message` after closing.
    pub fn fail_close(&self, message: impl Into<String>) {
        self.state.lock().close_failure = Some(message.into());
    }

    /// Delay every network call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Drop every open session server-side.
    pub fn kill_sessions(&self) {
        self.state.lock().epoch += 1;
    }

    /// Gate the next execution of `sql`.
    pub fn gate(&self, sql: &str) -> StatementGate {
        let gate = StatementGate::default();
        self.state.lock().gates.insert(sql.trim().to_string(), gate.clone());
        gate
    }

    /// Number of `open_session` calls, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    /// Number of sessions successfully opened.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    /// Every statement sent, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// How many times `sql` was sent.
    pub fn executed_count(&self, sql: &str) -> usize {
        self.state.lock().executed.iter().filter(|s| s.as_str() == sql).count()
    }

    /// Highest number of statements ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    /// Parameters of the last connection attempt.
    pub fn last_params(&self) -> Option<SessionParams> {
        self.state.lock().last_params.clone()
    }
}

fn default_response(sql: &str) -> MockResponse {
    let sql = sql.trim();
    if sql.eq_ignore_ascii_case("SELECT 1") {
        MockResponse::ResultSet {
            columns: vec![ColumnInfo::new("_c0", "INT_TYPE")],
            rows: vec![vec![Value::Int(1)]],
        }
    } else if sql.to_uppercase().starts_with("SELECT") {
        MockResponse::rows(&["result"], vec![vec![Value::String(format!("Mock result for: {sql}"))]])
    } else {
        MockResponse::NoResultSet
    }
}

#[async_trait]
impl SessionDriver for MockDriver {
    async fn open_session(
        &self,
        params: &SessionParams,
    ) -> Result<Box<dyn RemoteSession>, DriverError> {
        let latency = {
            let mut state = self.state.lock();
            state.connect_attempts += 1;
            state.last_params = Some(params.clone());
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if let Some(message) = state.connect_failures.pop_front() {
            return Err(DriverError::new(message));
        }
        if let Some(message) = &state.refuse_message {
            return Err(DriverError::new(message.clone()));
        }
        state.open_count += 1;

        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            epoch: state.epoch,
            pending: None,
            closed: false,
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    epoch: u64,
    pending: Option<Vec<Row>>,
    closed: bool,
}

impl MockSession {
    fn check_alive(&self, state: &MockState) -> Result<(), DriverError> {
        if self.closed || self.epoch != state.epoch {
            Err(DriverError::new(DROPPED_SESSION_MESSAGE))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn execute(&mut self, sql: &str) -> Result<Option<Vec<ColumnInfo>>, DriverError> {
        self.pending = None;

        let (latency, gate) = {
            let mut state = self.state.lock();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.executed.push(sql.to_string());
            (state.latency, state.gates.remove(sql.trim()))
        };

        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        state.in_flight -= 1;
        self.check_alive(&state)?;

        let response =
            state.responses.get(sql.trim()).cloned().unwrap_or_else(|| default_response(sql));
        match response {
            MockResponse::ResultSet { columns, rows } => {
                self.pending = Some(rows);
                Ok(Some(columns))
            }
            MockResponse::NoResultSet => Ok(None),
            MockResponse::Error(message) => Err(DriverError::new(message)),
        }
    }

    async fn fetch_all(&mut self) -> Result<Vec<Row>, DriverError> {
        self.check_alive(&self.state.lock())?;
        self.pending
            .take()
            .ok_or_else(|| DriverError::new("No results.  Previous SQL was not a query."))
    }

    async fn close_cursor(&mut self) -> Result<(), DriverError> {
        self.pending = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        let mut state = self.state.lock();
        state.close_count += 1;
        match &state.close_failure {
            Some(message) => Err(DriverError::new(message.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionConfig;

    fn params() -> SessionParams {
        let mut config = ConnectionConfig::new("mock", "localhost");
        config.username = "hive".to_string();
        SessionParams::from_config(&config)
    }

    #[tokio::test]
    async fn test_probe_returns_one_row() {
        let driver = MockDriver::new();
        let mut session = driver.open_session(&params()).await.unwrap();
        let columns = session.execute("SELECT 1").await.unwrap().unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(session.fetch_all().await.unwrap(), vec![vec![Value::Int(1)]]);
    }

    #[tokio::test]
    async fn test_scripted_responses() {
        let driver = MockDriver::new()
            .with_response("SHOW DATABASES", MockResponse::strings("database_name", &["default"]))
            .with_response("SELECT * FROM missing", MockResponse::error("Table not found"));
        let mut session = driver.open_session(&params()).await.unwrap();

        assert!(session.execute("SHOW DATABASES").await.unwrap().is_some());
        assert_eq!(session.fetch_all().await.unwrap().len(), 1);

        let err = session.execute("SELECT * FROM missing").await.unwrap_err();
        assert_eq!(err.message(), "Table not found");

        assert!(session.execute("USE default").await.unwrap().is_none());
        assert!(session.fetch_all().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failures() {
        let driver = MockDriver::new();
        driver.fail_next_connect("Could not connect to localhost:10000");
        let err = driver.open_session(&params()).await.err().unwrap();
        assert_eq!(err.message(), "Could not connect to localhost:10000");
        assert!(driver.open_session(&params()).await.is_ok());

        driver.refuse_connections("refused");
        assert!(driver.open_session(&params()).await.is_err());
        assert!(driver.open_session(&params()).await.is_err());
        driver.accept_connections();
        assert!(driver.open_session(&params()).await.is_ok());

        assert_eq!(driver.connect_attempts(), 5);
        assert_eq!(driver.open_count(), 2);
    }

    #[tokio::test]
    async fn test_killed_session_fails_until_reopened() {
        let driver = MockDriver::new();
        let mut session = driver.open_session(&params()).await.unwrap();
        driver.kill_sessions();

        let err = session.execute("SELECT 1").await.unwrap_err();
        assert_eq!(err.message(), DROPPED_SESSION_MESSAGE);

        let mut fresh = driver.open_session(&params()).await.unwrap();
        assert!(fresh.execute("SELECT 1").await.is_ok());
    }

    #[tokio::test]
    async fn test_close_failure_still_closes() {
        let driver = MockDriver::new();
        driver.fail_close("already closed");
        let mut session = driver.open_session(&params()).await.unwrap();
        assert!(session.close().await.is_err());
        assert!(session.execute("SELECT 1").await.is_err());
        assert_eq!(driver.close_count(), 1);
    }

    #[tokio::test]
    async fn test_gate_holds_statement() {
        let driver = MockDriver::new();
        let gate = driver.gate("SELECT 2");
        let mut session = driver.open_session(&params()).await.unwrap();

        let task = tokio::spawn(async move { session.execute("SELECT 2").await.is_ok() });
        gate.entered().await;
        assert_eq!(driver.max_in_flight(), 1);
        gate.release();
        assert!(task.await.unwrap());
        assert_eq!(driver.executed(), vec!["SELECT 2".to_string()]);
    }
}
