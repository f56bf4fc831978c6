//! Error types for the Apiary client core.
//!
//! Every fault raised by the remote-session driver is converted into an
//! [`ApiaryError`] (or into an error-carrying `QueryResult`) at the
//! `ConnectionManager` boundary. The driver's own message text is kept
//! verbatim so it can be shown to the operator unmodified.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the Apiary client core.
#[derive(Debug, Error)]
pub enum ApiaryError {
    /// Opening or re-opening a remote session failed.
    #[error("Connection error: {message}")]
    Connection {
        /// Message produced by the driver.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A statement failed on a live session.
    #[error("{message}")]
    Query {
        /// Message produced by the driver.
        message: String,
    },

    /// An operation needing a session was issued before a successful connect.
    #[error("Not connected to a database")]
    NotConnected,

    /// A second execution was started while one is still in flight.
    #[error("Another query is already running on this connection")]
    ExecutionBusy {
        /// ID of the query currently holding the connection.
        query_id: Option<Uuid>,
    },

    /// Query was cancelled before its result could be delivered.
    #[error("Query cancelled")]
    QueryCancelled {
        /// ID of the cancelled query.
        query_id: Uuid,
    },

    /// Local SQLite storage error.
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid connection configuration.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ApiaryError {
    // ========== Constructors ==========

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query { message: message.into() }
    }

    /// Create a busy error for a connection already running a query.
    pub fn execution_busy(query_id: Option<Uuid>) -> Self {
        Self::ExecutionBusy { query_id }
    }

    /// Create a query cancelled error.
    pub fn query_cancelled(query_id: Uuid) -> Self {
        Self::QueryCancelled { query_id }
    }

    /// Create a new storage error.
    pub fn storage(message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::Storage { message: message.into(), hint: hint.map(String::from), source: None }
    }

    /// Create a new storage error with source.
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage { message: message.into(), hint: None, source: Some(Box::new(source)) }
    }

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    // ========== Methods ==========

    /// Check if this error represents a cancelled query.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::QueryCancelled { .. })
    }

    /// Check if this error means the session is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::NotConnected)
    }

    /// The bare message, without the category prefix added by `Display`.
    ///
    /// For driver-originated errors this is the driver text, unmodified.
    pub fn message(&self) -> String {
        match self {
            Self::Connection { message, .. }
            | Self::Query { message }
            | Self::Storage { message, .. }
            | Self::Config { message }
            | Self::Internal { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } | Self::NotConnected => "Connection",
            Self::Query { .. } | Self::ExecutionBusy { .. } | Self::QueryCancelled { .. } => {
                "Query"
            }
            Self::Storage { .. } => "Storage",
            Self::Config { .. } => "Config",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Connection { .. } => Some("Check that the server is running and reachable"),
            Self::NotConnected => Some("Connect to a server first"),
            Self::Query { .. } => None,
            Self::ExecutionBusy { .. } => Some("Wait for the running query or cancel it"),
            Self::QueryCancelled { .. } => {
                Some("The session may need to be reconnected after a cancelled query")
            }
            Self::Storage { hint, .. } => hint.as_deref(),
            Self::Config { .. } => None,
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Convert to user-displayable error info.
    pub fn to_error_info(&self) -> ErrorInfo {
        let error_type = format!("{} Error", self.category());
        let message = self.message();
        let hint = self.hint().map(String::from);

        let technical_detail = match self {
            Self::ExecutionBusy { query_id: Some(id) } => Some(format!("Running query: {id}")),
            Self::QueryCancelled { query_id } => Some(format!("Query: {query_id}")),
            Self::Connection { source: Some(source), .. }
            | Self::Storage { source: Some(source), .. }
            | Self::Internal { source: Some(source), .. } => Some(source.to_string()),
            _ => None,
        };

        ErrorInfo { error_type, message, hint, technical_detail }
    }
}

/// User-displayable error information.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Category name (e.g., "Connection Error").
    pub error_type: String,
    /// Message shown verbatim to the operator.
    pub message: String,
    /// Actionable suggestion.
    pub hint: Option<String>,
    /// Technical detail for "Show Details" expansion.
    pub technical_detail: Option<String>,
}

// ========== Error Conversions ==========

/// Convert from rusqlite::Error to ApiaryError.
impl From<rusqlite::Error> for ApiaryError {
    fn from(err: rusqlite::Error) -> Self {
        ApiaryError::Storage {
            message: err.to_string(),
            hint: Some("The local database may be corrupted".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from std::io::Error to ApiaryError.
impl From<std::io::Error> for ApiaryError {
    fn from(err: std::io::Error) -> Self {
        ApiaryError::Storage {
            message: err.to_string(),
            hint: Some("Check file permissions and disk space".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from serde_json::Error to ApiaryError.
impl From<serde_json::Error> for ApiaryError {
    fn from(err: serde_json::Error) -> Self {
        ApiaryError::Storage {
            message: format!("JSON error: {err}"),
            hint: Some("Data may be corrupted".to_string()),
            source: Some(Box::new(err)),
        }
    }
}
