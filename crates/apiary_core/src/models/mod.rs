//! Data models for the Apiary client core.
//!
//! This module contains all core data structures:
//! - `connection` - ConnectionConfig, AuthMechanism, ConnectionStatus
//! - `query` - QueryHandle, QueryResult, QueryOutcome, ColumnInfo, Value
//! - `history` - QueryHistoryEntry
//! - `schema` - Catalog tree and its fetch requests

pub mod connection;
pub mod history;
pub mod query;
pub mod schema;

pub use connection::{
    AuthMechanism, ConnectionConfig, ConnectionConfigBuilder, ConnectionStatus, DEFAULT_DATABASE,
    DEFAULT_PORT,
};
pub use history::QueryHistoryEntry;
pub use query::{ColumnInfo, QueryHandle, QueryOutcome, QueryResult, Row, Value};
pub use schema::{
    ApplyOutcome, CatalogNode, CatalogNodeId, CatalogNodeKind, CatalogPayload, CatalogQuery,
    CatalogRequest, CatalogResponse, CatalogTree, LoadState, TableColumn,
};
