//! Backend services for the Apiary SQL client.
//!
//! - `connection` - Remote session ownership, reconnect-on-demand and catalog queries
//! - `query` - Statement execution off the control thread with cancellation
//! - `metadata` - Asynchronous catalog fetches for the database browser
//! - `storage` - Local SQLite storage for connections, history and UI state

pub mod connection;
pub mod metadata;
pub mod query;
pub mod storage;

pub use connection::{quote_identifier, ConnectionManager};
pub use metadata::MetadataService;
pub use query::{QueryService, QueryTask};
pub use storage::{default_data_dir, init_data_dir, LocalStorage, DEFAULT_MAX_HISTORY};
