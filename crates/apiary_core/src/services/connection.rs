//! Session lifecycle for a single remote connection.
//!
//! Provides:
//! - Connect/disconnect with best-effort cleanup
//! - Liveness probing and a single implicit reconnect
//! - Statement execution that never fails past its boundary
//! - Catalog helpers (databases, tables, table schema)
//!
//! Every network operation holds the session lock for its whole duration, so
//! at most one statement is in flight on the session at any instant. Queued
//! callers are served in FIFO order.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::driver::{RemoteSession, SessionDriver, SessionParams};
use crate::error::ApiaryError;
use crate::models::{ConnectionConfig, ConnectionStatus, QueryResult, Row, TableColumn, Value};

/// Round-trip statement used to check that a session is usable.
pub const PROBE_STATEMENT: &str = "SELECT 1";

type SessionSlot = Option<Box<dyn RemoteSession>>;

/// How a cancellable statement run ended.
#[derive(Debug)]
pub(crate) enum StatementRun {
    /// The statement ran; the result may carry an error.
    Finished(QueryResult),
    /// Cancellation was observed between network legs.
    Abandoned {
        /// Whether the statement had already been sent to the server.
        statement_sent: bool,
    },
}

/// Owns one remote session and everything that runs on it.
pub struct ConnectionManager {
    driver: Arc<dyn SessionDriver>,
    /// The session, locked for the whole of every network operation.
    session: tokio::sync::Mutex<SessionSlot>,
    /// Config of the last connect attempt, reused for reconnects.
    config: RwLock<Option<ConnectionConfig>>,
    status: RwLock<ConnectionStatus>,
    /// Query currently claiming this connection.
    running: Mutex<Option<Uuid>>,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    pub fn new(driver: Arc<dyn SessionDriver>) -> Self {
        Self {
            driver,
            session: tokio::sync::Mutex::new(None),
            config: RwLock::new(None),
            status: RwLock::new(ConnectionStatus::Disconnected),
            running: Mutex::new(None),
        }
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Check if a session is open.
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Config of the last connect attempt.
    pub fn config(&self) -> Option<ConnectionConfig> {
        self.config.read().clone()
    }

    /// ID of the query currently claiming this connection.
    pub fn running_query(&self) -> Option<Uuid> {
        *self.running.lock()
    }

    /// Open a session for `config`, replacing any existing one.
    ///
    /// On failure the manager is left disconnected and the driver's message is
    /// returned.
    pub async fn connect(&self, config: ConnectionConfig) -> Result<(), ApiaryError> {
        config.validate().map_err(ApiaryError::config)?;

        let mut slot = self.session.lock().await;
        *self.config.write() = Some(config.clone());
        self.open_locked(&mut slot, &config).await
    }

    /// Close the cursor and session. Close-time errors are ignored.
    pub async fn disconnect(&self) {
        let mut slot = self.session.lock().await;
        self.close_locked(&mut slot).await;
    }

    /// Run the liveness probe. Any failure counts as "not alive".
    pub async fn is_alive(&self) -> bool {
        let mut slot = self.session.lock().await;
        Self::probe_locked(&mut slot).await
    }

    /// Make sure the session is usable.
    ///
    /// A live session is left untouched. Otherwise exactly one reconnect is
    /// attempted with the stored config.
    pub async fn ensure_connected(&self) -> Result<(), ApiaryError> {
        let mut slot = self.session.lock().await;
        self.ensure_locked(&mut slot).await
    }

    /// Drop the session and open a new one with the stored config.
    pub async fn force_reconnect(&self) -> Result<(), ApiaryError> {
        let mut slot = self.session.lock().await;
        let config = self.config.read().clone().ok_or(ApiaryError::NotConnected)?;
        tracing::info!(host = %config.host, "Forcing reconnect");
        self.open_locked(&mut slot, &config).await
    }

    /// Execute one statement.
    ///
    /// Failures are returned as an error result, never as a fault.
    pub async fn execute(&self, sql: &str) -> QueryResult {
        let start = Instant::now();
        match self.execute_with_token(sql, &CancellationToken::new()).await {
            StatementRun::Finished(result) => result.with_execution_time(start.elapsed()),
            StatementRun::Abandoned { .. } => QueryResult::error("Query cancelled"),
        }
    }

    /// Execute one statement, checking `token` between network legs.
    ///
    /// The token is checked while waiting for the session, before the
    /// liveness probe, before sending the statement, and before fetching
    /// rows. A leg already on the wire is never interrupted.
    pub(crate) async fn execute_with_token(
        &self,
        sql: &str,
        token: &CancellationToken,
    ) -> StatementRun {
        let mut slot = tokio::select! {
            biased;
            _ = token.cancelled() => return StatementRun::Abandoned { statement_sent: false },
            slot = self.session.lock() => slot,
        };

        if slot.is_none() {
            return StatementRun::Finished(QueryResult::error(ApiaryError::NotConnected.message()));
        }

        if token.is_cancelled() {
            return StatementRun::Abandoned { statement_sent: false };
        }
        if let Err(e) = self.ensure_locked(&mut slot).await {
            return StatementRun::Finished(QueryResult::error(format!(
                "Connection lost and reconnect failed: {}",
                e.message()
            )));
        }

        if token.is_cancelled() {
            return StatementRun::Abandoned { statement_sent: false };
        }
        let Some(session) = slot.as_mut() else {
            return StatementRun::Finished(QueryResult::error(ApiaryError::NotConnected.message()));
        };

        tracing::debug!(sql_len = sql.len(), "Sending statement");
        let columns = match session.execute(sql).await {
            Ok(Some(columns)) => columns,
            Ok(None) => return StatementRun::Finished(QueryResult::empty()),
            Err(e) => {
                tracing::warn!(error = %e, "Statement failed");
                return StatementRun::Finished(QueryResult::error(e.message()));
            }
        };

        if token.is_cancelled() {
            if let Err(e) = session.close_cursor().await {
                tracing::debug!(error = %e, "Ignoring cursor close failure after cancel");
            }
            return StatementRun::Abandoned { statement_sent: true };
        }

        match session.fetch_all().await {
            Ok(rows) => {
                tracing::debug!(row_count = rows.len(), "Fetched rows");
                StatementRun::Finished(QueryResult::success(columns, rows))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Fetching rows failed");
                StatementRun::Finished(QueryResult::error(e.message()))
            }
        }
    }

    /// List databases.
    pub async fn get_databases(&self) -> Result<Vec<String>, ApiaryError> {
        let rows = self.query_rows("SHOW DATABASES").await?;
        Ok(first_column(rows))
    }

    /// List tables of `database`, or of the session's current database.
    pub async fn get_tables(&self, database: Option<&str>) -> Result<Vec<String>, ApiaryError> {
        let sql = match database {
            Some(db) => format!("SHOW TABLES IN {}", quote_identifier(db)),
            None => "SHOW TABLES".to_string(),
        };
        let rows = self.query_rows(&sql).await?;
        Ok(first_column(rows))
    }

    /// Describe the columns of a table.
    ///
    /// Blank rows and `#` section rows (partition information and the like)
    /// are skipped.
    pub async fn get_table_schema(
        &self,
        table: &str,
        database: Option<&str>,
    ) -> Result<Vec<TableColumn>, ApiaryError> {
        let sql = match database {
            Some(db) => format!("DESCRIBE {}.{}", quote_identifier(db), quote_identifier(table)),
            None => format!("DESCRIBE {}", quote_identifier(table)),
        };
        let rows = self.query_rows(&sql).await?;
        Ok(rows.iter().filter_map(|row| parse_describe_row(row)).collect())
    }

    /// Switch the session's current database.
    pub async fn use_database(&self, database: &str) -> Result<(), ApiaryError> {
        self.query_rows(&format!("USE {}", quote_identifier(database))).await?;
        tracing::debug!(database, "Switched database");
        Ok(())
    }

    pub(crate) fn claim_execution(
        self: &Arc<Self>,
        query_id: Uuid,
    ) -> Result<ExecutionClaim, ApiaryError> {
        let mut running = self.running.lock();
        if let Some(current) = *running {
            return Err(ApiaryError::execution_busy(Some(current)));
        }
        *running = Some(query_id);
        Ok(ExecutionClaim { manager: Arc::clone(self) })
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>, ApiaryError> {
        if !self.is_connected() {
            return Err(ApiaryError::NotConnected);
        }
        let result = self.execute(sql).await;
        match result.error_message() {
            Some(message) => Err(ApiaryError::query(message)),
            None => Ok(result.into_rows()),
        }
    }

    async fn open_locked(
        &self,
        slot: &mut SessionSlot,
        config: &ConnectionConfig,
    ) -> Result<(), ApiaryError> {
        self.close_locked(slot).await;

        tracing::debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            auth = config.auth_mechanism.as_str(),
            "Opening session"
        );

        match self.driver.open_session(&SessionParams::from_config(config)).await {
            Ok(session) => {
                *slot = Some(session);
                *self.status.write() = ConnectionStatus::Connected;
                tracing::info!(
                    name = %config.name,
                    host = %config.host,
                    database = %config.database,
                    "Connected"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(host = %config.host, error = %e, "Connection failed");
                Err(ApiaryError::connection_with_source(e.message().to_string(), e))
            }
        }
    }

    async fn close_locked(&self, slot: &mut SessionSlot) {
        if let Some(mut session) = slot.take() {
            if let Err(e) = session.close_cursor().await {
                tracing::debug!(error = %e, "Ignoring cursor close failure");
            }
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "Ignoring session close failure");
            }
            tracing::debug!("Session closed");
        }
        *self.status.write() = ConnectionStatus::Disconnected;
    }

    async fn probe_locked(slot: &mut SessionSlot) -> bool {
        let Some(session) = slot.as_mut() else {
            return false;
        };
        match session.execute(PROBE_STATEMENT).await {
            Ok(Some(_)) => session.fetch_all().await.is_ok(),
            Ok(None) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Liveness probe failed");
                false
            }
        }
    }

    async fn ensure_locked(&self, slot: &mut SessionSlot) -> Result<(), ApiaryError> {
        if Self::probe_locked(slot).await {
            return Ok(());
        }
        let config = self.config.read().clone().ok_or(ApiaryError::NotConnected)?;
        tracing::info!(host = %config.host, "Session lost, reconnecting");
        self.open_locked(slot, &config).await
    }
}

/// Marks a connection as running one query; released on drop.
pub(crate) struct ExecutionClaim {
    manager: Arc<ConnectionManager>,
}

impl ExecutionClaim {
    pub(crate) fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }
}

impl Drop for ExecutionClaim {
    fn drop(&mut self) {
        *self.manager.running.lock() = None;
    }
}

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

fn first_column(rows: Vec<Row>) -> Vec<String> {
    rows.iter().map(|row| cell_text(row.first())).collect()
}

fn parse_describe_row(row: &Row) -> Option<TableColumn> {
    let name = cell_text(row.first());
    if name.is_empty() || name.starts_with('#') {
        return None;
    }
    Some(TableColumn {
        name,
        data_type: cell_text(row.get(1)),
        comment: cell_text(row.get(2)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, MockResponse};
    use crate::models::AuthMechanism;

    fn config() -> ConnectionConfig {
        ConnectionConfig::builder()
            .name("test")
            .host("localhost")
            .username("hive")
            .password("secret")
            .build()
            .unwrap()
    }

    fn manager(driver: &MockDriver) -> ConnectionManager {
        ConnectionManager::new(Arc::new(driver.clone()))
    }

    #[tokio::test]
    async fn test_connect_passes_credentials() {
        let driver = MockDriver::new();
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();

        assert!(manager.is_connected());
        let params = driver.last_params().unwrap();
        assert_eq!(params.username.as_deref(), Some("hive"));
        assert_eq!(params.password.as_deref(), Some("secret"));
        assert_eq!(params.auth_mechanism, AuthMechanism::PlainCredentials);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let driver = MockDriver::new();
        driver.fail_next_connect("Could not connect to any of [('localhost', 10000)]");
        let manager = manager(&driver);

        let err = manager.connect(config()).await.unwrap_err();
        assert_eq!(err.message(), "Could not connect to any of [('localhost', 10000)]");
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let driver = MockDriver::new();
        let manager = manager(&driver);
        let mut bad = config();
        bad.host.clear();
        let err = manager.connect(bad).await.unwrap_err();
        assert_eq!(err.category(), "Config");
        assert_eq!(driver.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_execute_without_connect_returns_error_result() {
        let driver = MockDriver::new();
        let manager = manager(&driver);
        let result = manager.execute("SELECT 1").await;
        assert_eq!(result.error_message(), Some("Not connected to a database"));
        assert!(result.columns().is_empty());
        assert!(driver.executed().is_empty());
    }

    #[tokio::test]
    async fn test_execute_probes_then_runs() {
        let driver = MockDriver::new().with_response(
            "SELECT name FROM users",
            MockResponse::strings("users.name", &["alice", "bob"]),
        );
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();

        let result = manager.execute("SELECT name FROM users").await;
        assert!(result.is_success());
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.columns()[0].short_name(), "name");
        assert_eq!(driver.executed(), vec!["SELECT 1", "SELECT name FROM users"]);
    }

    #[tokio::test]
    async fn test_execute_without_result_set() {
        let driver = MockDriver::new();
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();

        let result = manager.execute("SET hive.exec.dynamic.partition=true").await;
        assert!(result.is_success());
        assert!(!result.has_result_set());
    }

    #[tokio::test]
    async fn test_execute_error_is_verbatim() {
        let message = "Error while compiling statement: FAILED: SemanticException [Error 10001]";
        let driver =
            MockDriver::new().with_response("SELECT * FROM nope", MockResponse::error(message));
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();

        let result = manager.execute("SELECT * FROM nope").await;
        assert_eq!(result.error_message(), Some(message));
        assert!(result.rows().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_connected_on_live_session_does_not_connect() {
        let driver = MockDriver::new();
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();

        manager.ensure_connected().await.unwrap();
        manager.ensure_connected().await.unwrap();
        assert_eq!(driver.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_ensure_connected_reconnects_exactly_once() {
        let driver = MockDriver::new();
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();
        driver.kill_sessions();

        assert!(!manager.is_alive().await);
        manager.ensure_connected().await.unwrap();
        assert_eq!(driver.connect_attempts(), 2);
        assert!(manager.is_alive().await);
    }

    #[tokio::test]
    async fn test_failed_reconnect_skips_statement() {
        let driver = MockDriver::new();
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();
        driver.kill_sessions();
        driver.refuse_connections("Connection refused");

        let result = manager.execute("SELECT * FROM t").await;
        assert_eq!(
            result.error_message(),
            Some("Connection lost and reconnect failed: Connection refused")
        );
        assert_eq!(driver.executed_count("SELECT * FROM t"), 0);
        assert_eq!(driver.connect_attempts(), 2);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        let result = manager.execute("SELECT * FROM t").await;
        assert_eq!(result.error_message(), Some("Not connected to a database"));
        assert_eq!(driver.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_swallows_close_errors() {
        let driver = MockDriver::new();
        driver.fail_close("Session already closed");
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();

        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(driver.close_count(), 1);
        assert!(!manager.is_alive().await);
    }

    #[tokio::test]
    async fn test_force_reconnect_opens_new_session() {
        let driver = MockDriver::new();
        let manager = manager(&driver);
        assert!(manager.force_reconnect().await.is_err());

        manager.connect(config()).await.unwrap();
        manager.force_reconnect().await.unwrap();
        assert_eq!(driver.open_count(), 2);
        assert_eq!(driver.close_count(), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_catalog_helpers_quote_identifiers() {
        let driver = MockDriver::new()
            .with_response("SHOW DATABASES", MockResponse::strings("database_name", &["default", "sales"]))
            .with_response("SHOW TABLES IN `sales`", MockResponse::strings("tab_name", &["orders"]))
            .with_response("SHOW TABLES", MockResponse::strings("tab_name", &["t1"]));
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();

        assert_eq!(manager.get_databases().await.unwrap(), vec!["default", "sales"]);
        assert_eq!(manager.get_tables(Some("sales")).await.unwrap(), vec!["orders"]);
        assert_eq!(manager.get_tables(None).await.unwrap(), vec!["t1"]);
        manager.use_database("we`ird").await.unwrap();
        assert_eq!(driver.executed_count("USE `we``ird`"), 1);
    }

    #[tokio::test]
    async fn test_table_schema_skips_section_rows() {
        let describe = MockResponse::rows(
            &["col_name", "data_type", "comment"],
            vec![
                vec!["id ".into(), " bigint".into(), "primary key".into()],
                vec!["amount".into(), "decimal(10,2)".into(), Value::Null],
                vec!["".into(), Value::Null, Value::Null],
                vec!["# Partition Information".into(), "".into(), "".into()],
                vec!["# col_name".into(), "data_type".into(), "comment".into()],
                vec!["dt".into(), "string".into(), "".into()],
            ],
        );
        let driver = MockDriver::new().with_response("DESCRIBE `sales`.`orders`", describe);
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();

        let columns = manager.get_table_schema("orders", Some("sales")).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "amount", "dt"]);
        assert_eq!(columns[0].data_type, "bigint");
        assert_eq!(columns[0].comment, "primary key");
        assert_eq!(columns[1].comment, "");
    }

    #[tokio::test]
    async fn test_catalog_helpers_report_errors() {
        let driver = MockDriver::new()
            .with_response("SHOW DATABASES", MockResponse::error("Permission denied"));
        let manager = manager(&driver);
        assert!(matches!(manager.get_databases().await, Err(ApiaryError::NotConnected)));

        manager.connect(config()).await.unwrap();
        let err = manager.get_databases().await.unwrap_err();
        assert_eq!(err.message(), "Permission denied");
    }

    #[tokio::test]
    async fn test_claim_execution_is_exclusive() {
        let driver = MockDriver::new();
        let manager = Arc::new(manager(&driver));
        let first = Uuid::new_v4();

        let claim = manager.claim_execution(first).unwrap();
        let err = manager.claim_execution(Uuid::new_v4()).err().unwrap();
        assert!(matches!(err, ApiaryError::ExecutionBusy { query_id: Some(id) } if id == first));
        assert_eq!(manager.running_query(), Some(first));

        drop(claim);
        assert_eq!(manager.running_query(), None);
        assert!(manager.claim_execution(Uuid::new_v4()).is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_token_never_sends_statement() {
        let driver = MockDriver::new();
        let manager = manager(&driver);
        manager.connect(config()).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let run = manager.execute_with_token("SELECT * FROM t", &token).await;
        assert!(matches!(run, StatementRun::Abandoned { statement_sent: false }));
        assert_eq!(driver.executed_count("SELECT * FROM t"), 0);
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("orders"), "`orders`");
        assert_eq!(quote_identifier("a`b"), "`a``b`");
    }
}
