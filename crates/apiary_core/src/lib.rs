//! Core of the Apiary SQL client for HiveServer2-compatible engines.
//!
//! - **sql**: Statement scanning and cursor-based statement selection
//! - **driver**: The remote session seam and a scripted mock driver
//! - **error**: Error handling with verbatim driver messages
//! - **models**: Connections, query results, history and the catalog tree
//! - **services**: Connection management, query execution, catalog fetches, storage
//! - **state**: Application state for the control thread
//! - **logging**: Structured logging setup

pub mod driver;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod sql;
pub mod state;


pub use driver::{DriverError, MockDriver, RemoteSession, SessionDriver, SessionParams};
pub use error::{ApiaryError, ErrorInfo};
pub use models::{
    AuthMechanism, CatalogNode, CatalogNodeId, CatalogNodeKind, CatalogRequest, CatalogResponse,
    CatalogTree, ColumnInfo, ConnectionConfig, ConnectionStatus, LoadState, QueryHandle,
    QueryHistoryEntry, QueryOutcome, QueryResult, Row, TableColumn, Value,
};
pub use services::{ConnectionManager, LocalStorage, MetadataService, QueryService, QueryTask};
pub use sql::{prepare_for_execution, scan, select_statement, StatementSpan};
pub use state::ApiaryState;
