//! Query execution with cancellation support.
//!
//! Provides query execution with:
//! - Unique query identifiers for tracking
//! - One execution in flight per connection; a second `start` is rejected
//! - Cooperative cancellation via tokio-util CancellationToken
//! - Exactly one terminal event per run, delivered over a oneshot channel

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use uuid::Uuid;

use crate::error::ApiaryError;
use crate::models::{QueryHandle, QueryOutcome};
use crate::services::connection::{ConnectionManager, ExecutionClaim, StatementRun};

/// Service for running statements off the control thread.
pub struct QueryService {
    connection: Arc<ConnectionManager>,
    runtime: Handle,
}

impl QueryService {
    /// Create a service that runs statements on `runtime`.
    pub fn new(connection: Arc<ConnectionManager>, runtime: Handle) -> Self {
        Self { connection, runtime }
    }

    /// The connection statements run on.
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Start executing `sql` on a worker.
    ///
    /// Fails with [`ApiaryError::ExecutionBusy`] while another run holds the
    /// connection.
    pub fn start(&self, sql: impl Into<String>) -> Result<QueryTask, ApiaryError> {
        let handle = Arc::new(QueryHandle::new(sql));
        let claim = self.connection.claim_execution(handle.id())?;
        let (tx, rx) = oneshot::channel();

        tracing::debug!(query_id = %handle.id(), "Starting query");

        let worker_handle = Arc::clone(&handle);
        self.runtime.spawn(async move {
            let outcome = run(claim, &worker_handle).await;
            if tx.send(outcome).is_err() {
                tracing::debug!(query_id = %worker_handle.id(), "Query outcome dropped, task was discarded");
            }
        });

        Ok(QueryTask { handle, receiver: Some(rx) })
    }
}

async fn run(claim: ExecutionClaim, handle: &QueryHandle) -> QueryOutcome {
    let token = handle.cancel_token();
    let start = Instant::now();
    let run = claim.manager().execute_with_token(handle.sql(), &token).await;
    let elapsed = start.elapsed();
    // The connection is free again before anyone sees the outcome.
    drop(claim);

    match run {
        StatementRun::Finished(_) if token.is_cancelled() => {
            tracing::debug!(query_id = %handle.id(), "Query finished after cancel, result withheld");
            QueryOutcome::Cancelled { query_id: handle.id(), reconnect_advised: false }
        }
        StatementRun::Finished(mut result) => {
            result.set_execution_time(elapsed);
            tracing::debug!(
                query_id = %handle.id(),
                execution_time_ms = elapsed.as_millis() as u64,
                row_count = result.row_count(),
                success = result.is_success(),
                "Query completed"
            );
            QueryOutcome::Completed(result)
        }
        StatementRun::Abandoned { statement_sent } => {
            if statement_sent {
                tracing::warn!(
                    query_id = %handle.id(),
                    "Query cancelled after it reached the server; reconnect advised"
                );
            } else {
                tracing::debug!(query_id = %handle.id(), "Query cancelled before it was sent");
            }
            QueryOutcome::Cancelled { query_id: handle.id(), reconnect_advised: statement_sent }
        }
    }
}

/// A running execution.
///
/// Yields exactly one [`QueryOutcome`], through [`wait`](Self::wait),
/// [`blocking_wait`](Self::blocking_wait) or [`try_outcome`](Self::try_outcome).
pub struct QueryTask {
    handle: Arc<QueryHandle>,
    receiver: Option<oneshot::Receiver<QueryOutcome>>,
}

impl QueryTask {
    /// The query identifier.
    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    /// The shared handle, for registries that cancel by id.
    pub fn handle(&self) -> &Arc<QueryHandle> {
        &self.handle
    }

    /// Request best-effort cancellation.
    ///
    /// Suppresses the result; a statement already on the server is not
    /// interrupted.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Wait for the terminal event.
    pub async fn wait(mut self) -> Result<QueryOutcome, ApiaryError> {
        let query_id = self.id();
        let receiver = self.receiver.take().ok_or_else(|| already_taken(query_id))?;
        receiver.await.map_err(|_| worker_lost(query_id))
    }

    /// Block the calling thread until the terminal event arrives.
    ///
    /// Must not be called from inside the runtime.
    pub fn blocking_wait(mut self) -> Result<QueryOutcome, ApiaryError> {
        let query_id = self.id();
        let receiver = self.receiver.take().ok_or_else(|| already_taken(query_id))?;
        receiver.blocking_recv().map_err(|_| worker_lost(query_id))
    }

    /// Poll for the terminal event without blocking.
    ///
    /// Returns `Some` once, when the event is available.
    pub fn try_outcome(&mut self) -> Option<Result<QueryOutcome, ApiaryError>> {
        let query_id = self.id();
        let receiver = self.receiver.as_mut()?;
        let polled = match receiver.try_recv() {
            Ok(outcome) => Ok(outcome),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(worker_lost(query_id)),
        };
        self.receiver = None;
        Some(polled)
    }
}

impl std::fmt::Debug for QueryTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTask")
            .field("handle", &self.handle)
            .field("delivered", &self.receiver.is_none())
            .finish()
    }
}

fn worker_lost(query_id: Uuid) -> ApiaryError {
    ApiaryError::internal(format!("Worker for query {query_id} stopped without a result"))
}

fn already_taken(query_id: Uuid) -> ApiaryError {
    ApiaryError::internal(format!("Outcome of query {query_id} was already delivered"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, MockResponse};
    use crate::models::ConnectionConfig;
    use std::time::Duration;

    async fn service(driver: &MockDriver) -> QueryService {
        let manager = Arc::new(ConnectionManager::new(Arc::new(driver.clone())));
        let mut config = ConnectionConfig::new("test", "localhost");
        config.username = "hive".to_string();
        manager.connect(config).await.unwrap();
        QueryService::new(manager, Handle::current())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_completed_result_has_execution_time() {
        let driver = MockDriver::new();
        let service = service(&driver).await;
        driver.set_latency(Duration::from_millis(20));

        let outcome = service.start("SELECT 1").unwrap().wait().await.unwrap();
        let result = outcome.into_result().unwrap();
        assert!(result.is_success());
        assert_eq!(result.row_count(), 1);
        assert!(result.execution_time() >= Duration::from_millis(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_error_result_is_forwarded_unchanged() {
        let driver =
            MockDriver::new().with_response("DROP TABLE t", MockResponse::error("Table not found t"));
        let service = service(&driver).await;

        let outcome = service.start("DROP TABLE t").unwrap().wait().await.unwrap();
        assert_eq!(outcome.result().unwrap().error_message(), Some("Table not found t"));
        assert_eq!(driver.executed_count("DROP TABLE t"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_start_is_rejected_while_running() {
        let driver = MockDriver::new();
        let service = service(&driver).await;
        let gate = driver.gate("SELECT slow");

        let first = service.start("SELECT slow").unwrap();
        gate.entered().await;

        let err = service.start("SELECT 2").unwrap_err();
        assert!(matches!(err, ApiaryError::ExecutionBusy { query_id: Some(id) } if id == first.id()));

        gate.release();
        assert!(!first.wait().await.unwrap().is_cancelled());
        assert!(service.start("SELECT 2").is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_before_send_skips_statement() {
        let driver = MockDriver::new();
        let service = service(&driver).await;
        let probe = driver.gate("SELECT 1");

        let task = service.start("SELECT * FROM big").unwrap();
        probe.entered().await;
        task.cancel();
        probe.release();

        let outcome = task.wait().await.unwrap();
        assert!(matches!(outcome, QueryOutcome::Cancelled { reconnect_advised: false, .. }));
        assert_eq!(driver.executed_count("SELECT * FROM big"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_in_flight_advises_reconnect() {
        let driver = MockDriver::new();
        let service = service(&driver).await;
        let gate = driver.gate("SELECT * FROM big");

        let task = service.start("SELECT * FROM big").unwrap();
        let query_id = task.id();
        gate.entered().await;
        task.cancel();
        gate.release();

        let outcome = task.wait().await.unwrap();
        assert_eq!(outcome, QueryOutcome::Cancelled { query_id, reconnect_advised: true });
        assert_eq!(service.connection().running_query(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_try_outcome_delivers_once() {
        let driver = MockDriver::new();
        let service = service(&driver).await;
        driver.set_latency(Duration::from_millis(10));

        let mut task = service.start("SHOW DATABASES").unwrap();
        let outcome = loop {
            if let Some(outcome) = task.try_outcome() {
                break outcome;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(outcome.unwrap().result().unwrap().is_success());
        assert!(task.try_outcome().is_none());
    }
}
