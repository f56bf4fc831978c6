//! Catalog browsing service.
//!
//! Each fetch runs as its own task on the worker runtime and reports through
//! its own oneshot channel. Submissions never block each other, but all of
//! them share the connection's session lock, so a fetch issued while a query
//! runs waits for it instead of interleaving on the session.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::ApiaryError;
use crate::models::{CatalogPayload, CatalogQuery, CatalogRequest, CatalogResponse, TableColumn};
use crate::services::connection::ConnectionManager;

/// Asynchronous catalog fetches against a shared connection.
pub struct MetadataService {
    connection: Arc<ConnectionManager>,
    runtime: Handle,
}

impl MetadataService {
    /// Create a service that runs fetches on `runtime`.
    pub fn new(connection: Arc<ConnectionManager>, runtime: Handle) -> Self {
        Self { connection, runtime }
    }

    /// List databases.
    pub fn list_databases(&self) -> oneshot::Receiver<Result<Vec<String>, ApiaryError>> {
        let connection = Arc::clone(&self.connection);
        self.spawn(async move { connection.get_databases().await })
    }

    /// List the tables of a database.
    pub fn list_tables(
        &self,
        database: impl Into<String>,
    ) -> oneshot::Receiver<Result<Vec<String>, ApiaryError>> {
        let connection = Arc::clone(&self.connection);
        let database = database.into();
        self.spawn(async move { connection.get_tables(Some(database.as_str())).await })
    }

    /// Describe a table.
    pub fn describe_table(
        &self,
        database: impl Into<String>,
        table: impl Into<String>,
    ) -> oneshot::Receiver<Result<Vec<TableColumn>, ApiaryError>> {
        let connection = Arc::clone(&self.connection);
        let (database, table) = (database.into(), table.into());
        self.spawn(async move { connection.get_table_schema(&table, Some(database.as_str())).await })
    }

    /// Run the fetch behind a catalog node expansion.
    pub fn fetch(&self, request: CatalogRequest) -> oneshot::Receiver<CatalogResponse> {
        let connection = Arc::clone(&self.connection);
        self.spawn(async move {
            tracing::debug!(node = %request.node, query = ?request.query, "Fetching catalog");
            let result = match &request.query {
                CatalogQuery::Databases => {
                    connection.get_databases().await.map(CatalogPayload::Databases)
                }
                CatalogQuery::Tables { database } => {
                    connection.get_tables(Some(database.as_str())).await.map(CatalogPayload::Tables)
                }
                CatalogQuery::Columns { database, table } => connection
                    .get_table_schema(table, Some(database.as_str()))
                    .await
                    .map(CatalogPayload::Columns),
            };
            if let Err(e) = &result {
                tracing::warn!(node = %request.node, error = %e, "Catalog fetch failed");
            }
            CatalogResponse { request, result }
        })
    }

    fn spawn<T, F>(&self, fetch: F) -> oneshot::Receiver<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn(async move {
            if tx.send(fetch.await).is_err() {
                tracing::debug!("Catalog reply dropped, receiver went away");
            }
        });
        rx
    }
}
