//! Application state management.
//!
//! `ApiaryState` is what the control thread talks to. It owns the worker
//! runtime, local storage, the active session and the registry of running
//! queries. Every method returns immediately; network work is spawned on the
//! runtime and reported through a join handle or outcome channel.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::driver::SessionDriver;
use crate::error::ApiaryError;
use crate::models::{CatalogRequest, CatalogResponse, ConnectionConfig, QueryHandle};
use crate::services::{
    ConnectionManager, LocalStorage, MetadataService, QueryService, QueryTask, DEFAULT_MAX_HISTORY,
};
use crate::sql::{prepare_for_execution, select_statement};

/// The connection the editor currently talks to, with its services.
pub struct ActiveSession {
    name: String,
    connection: Arc<ConnectionManager>,
    queries: QueryService,
    metadata: MetadataService,
}

impl ActiveSession {
    /// Saved name of the connection.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn queries(&self) -> &QueryService {
        &self.queries
    }

    pub fn metadata(&self) -> &MetadataService {
        &self.metadata
    }
}

/// Central application state.
///
/// Thread-safe via `parking_lot::RwLock`.
pub struct ApiaryState {
    driver: Arc<dyn SessionDriver>,
    /// Session used by the editor and the database browser
    session: RwLock<Option<Arc<ActiveSession>>>,
    /// Running queries, cancellable by id
    active_queries: RwLock<HashMap<Uuid, Arc<QueryHandle>>>,
    storage: Arc<LocalStorage>,
    data_dir: PathBuf,
    max_history: usize,
    /// Worker pool for all network operations
    tokio_runtime: tokio::runtime::Runtime,
}

impl ApiaryState {
    /// Create state in the default data directory.
    pub fn new(driver: Arc<dyn SessionDriver>) -> Result<Self, ApiaryError> {
        Self::with_data_dir(crate::services::storage::default_data_dir(), driver)
    }

    /// Create state with a custom data directory.
    pub fn with_data_dir(
        data_dir: PathBuf,
        driver: Arc<dyn SessionDriver>,
    ) -> Result<Self, ApiaryError> {
        crate::services::storage::init_data_dir(&data_dir)?;

        let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("apiary-worker")
            .enable_all()
            .build()
            .map_err(|e| ApiaryError::internal(format!("Failed to create tokio runtime: {e}")))?;

        let storage = Arc::new(LocalStorage::open(data_dir.clone())?);

        tracing::info!(data_dir = %data_dir.display(), "ApiaryState initialized");

        Ok(Self {
            driver,
            session: RwLock::new(None),
            active_queries: RwLock::new(HashMap::new()),
            storage,
            data_dir,
            max_history: DEFAULT_MAX_HISTORY,
            tokio_runtime,
        })
    }

    /// Bound the number of history entries kept.
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    // ========== Connection Management ==========

    /// Connect to `config`, replacing the active session.
    ///
    /// The new session becomes active immediately and reports
    /// `Disconnected` until the worker finishes connecting. On success the
    /// connection is remembered as the last one used.
    pub fn connect(&self, config: ConnectionConfig) -> JoinHandle<Result<(), ApiaryError>> {
        let connection = Arc::new(ConnectionManager::new(Arc::clone(&self.driver)));
        let session = Arc::new(ActiveSession {
            name: config.name.clone(),
            connection: Arc::clone(&connection),
            queries: QueryService::new(Arc::clone(&connection), self.runtime_handle()),
            metadata: MetadataService::new(Arc::clone(&connection), self.runtime_handle()),
        });

        let previous = self.session.write().replace(session);
        if let Some(previous) = previous {
            tracing::debug!(name = %previous.name, "Replacing active session");
            self.close_session(previous);
        }

        let storage = Arc::clone(&self.storage);
        self.spawn(async move {
            let name = config.name.clone();
            connection.connect(config).await?;
            if let Err(e) = storage.set_last_connection(&name) {
                tracing::warn!(error = %e, "Failed to remember last connection");
            }
            Ok(())
        })
    }

    /// Connect using a saved connection.
    pub fn connect_saved(
        &self,
        name: &str,
    ) -> Result<JoinHandle<Result<(), ApiaryError>>, ApiaryError> {
        let config = self.storage.load_connection(name)?.ok_or_else(|| {
            ApiaryError::config(format!("No saved connection named '{name}'"))
        })?;
        Ok(self.connect(config))
    }

    /// Close the active session, if any.
    pub fn disconnect(&self) -> Option<JoinHandle<()>> {
        let session = self.session.write().take()?;
        tracing::debug!(name = %session.name, "Disconnecting active session");
        Some(self.close_session(session))
    }

    /// Tear the session down and connect again with its stored config.
    pub fn force_reconnect(&self) -> Result<JoinHandle<Result<(), ApiaryError>>, ApiaryError> {
        let session = self.require_session()?;
        Ok(self.spawn(async move { session.connection.force_reconnect().await }))
    }

    /// The active session.
    pub fn active_session(&self) -> Option<Arc<ActiveSession>> {
        self.session.read().clone()
    }

    fn require_session(&self) -> Result<Arc<ActiveSession>, ApiaryError> {
        self.active_session().ok_or(ApiaryError::NotConnected)
    }

    fn close_session(&self, session: Arc<ActiveSession>) -> JoinHandle<()> {
        self.spawn(async move { session.connection.disconnect().await })
    }

    // ========== Query Execution ==========

    /// Run the statement under the cursor, or the selection when there is one.
    ///
    /// Returns `None` when there is nothing to execute.
    pub fn execute_at_cursor(
        &self,
        buffer: &str,
        cursor: usize,
        selection: Option<Range<usize>>,
    ) -> Result<Option<QueryTask>, ApiaryError> {
        let session = self.require_session()?;

        let Some(sql) = prepare_for_execution(&select_statement(buffer, cursor, selection)) else {
            tracing::debug!(cursor, "No statement to execute");
            return Ok(None);
        };

        if let Err(e) = self.storage.add_to_history(&sql, self.max_history) {
            tracing::warn!(error = %e, "Failed to record query history");
        }

        let task = session.queries.start(sql)?;
        self.register_query(Arc::clone(task.handle()));
        Ok(Some(task))
    }

    fn register_query(&self, handle: Arc<QueryHandle>) {
        let running = self.active_session().and_then(|s| s.connection.running_query());
        let mut queries = self.active_queries.write();
        // Anything no longer holding the connection has finished.
        queries.retain(|id, _| Some(*id) == running);
        tracing::trace!(query_id = %handle.id(), "Query registered");
        queries.insert(handle.id(), handle);
    }

    /// Get a query handle by ID.
    pub fn get_query(&self, id: &Uuid) -> Option<Arc<QueryHandle>> {
        self.active_queries.read().get(id).cloned()
    }

    /// Unregister a completed or cancelled query.
    pub fn unregister_query(&self, id: &Uuid) -> Option<Arc<QueryHandle>> {
        let handle = self.active_queries.write().remove(id);
        if handle.is_some() {
            tracing::trace!(query_id = %id, "Query unregistered");
        }
        handle
    }

    /// Cancel a running query.
    ///
    /// Returns true if the query was found and cancellation was requested.
    pub fn cancel_query(&self, id: &Uuid) -> bool {
        match self.active_queries.read().get(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Get all active query IDs.
    pub fn active_query_ids(&self) -> Vec<Uuid> {
        self.active_queries.read().keys().copied().collect()
    }

    // ========== Catalog ==========

    /// Issue the fetch behind a catalog node expansion.
    pub fn fetch_catalog(
        &self,
        request: CatalogRequest,
    ) -> Result<oneshot::Receiver<CatalogResponse>, ApiaryError> {
        Ok(self.require_session()?.metadata.fetch(request))
    }

    // ========== Service Accessors ==========

    /// Get the local storage service.
    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get a handle to the worker runtime.
    pub fn runtime_handle(&self) -> tokio::runtime::Handle {
        self.tokio_runtime.handle().clone()
    }

    /// Spawn a future on the worker runtime.
    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.tokio_runtime.spawn(future)
    }

    /// Block on a future using the worker runtime.
    ///
    /// Must not be called from inside the runtime.
    pub fn block_on<F, T>(&self, future: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        self.tokio_runtime.block_on(future)
    }

    // ========== Convenience Methods ==========

    /// Load all saved connections from storage.
    pub fn load_saved_connections(&self) -> Result<Vec<ConnectionConfig>, ApiaryError> {
        self.storage.load_all_connections()
    }

    /// Save a connection configuration to storage.
    pub fn save_connection(&self, config: &ConnectionConfig) -> Result<(), ApiaryError> {
        config.validate().map_err(ApiaryError::config)?;
        self.storage.save_connection(config)
    }
}
