//! Remote-session driver seam.
//!
//! The core never speaks the wire protocol itself. A [`SessionDriver`] opens
//! sessions, and each [`RemoteSession`] runs one statement at a time through
//! its cursor. Drivers report failures as [`DriverError`], whose text is shown
//! to the operator unmodified.

pub mod mock;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AuthMechanism, ColumnInfo, ConnectionConfig, Row};

pub use mock::{MockDriver, MockResponse, StatementGate};

/// A failure reported by the driver, carrying its message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    /// Create a driver error from its message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// The driver's message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Parameters for opening a session, mapped 1:1 from a [`ConnectionConfig`].
#[derive(Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Server hostname or IP
    pub host: String,
    /// Server port
    pub port: u16,
    /// Initial database
    pub database: String,
    /// Authentication mechanism
    pub auth_mechanism: AuthMechanism,
    /// Username; `None` for `NoAuth`
    pub username: Option<String>,
    /// Password; `None` for `NoAuth`
    pub password: Option<String>,
}

impl SessionParams {
    /// Build session parameters from a saved connection.
    ///
    /// `NoAuth` sends no credentials; the other mechanisms send both
    /// username and password, even when the password is empty.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        let (username, password) = if config.auth_mechanism.uses_credentials() {
            (Some(config.username.clone()), Some(config.password.clone()))
        } else {
            (None, None)
        };

        Self {
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            auth_mechanism: config.auth_mechanism,
            username,
            password,
        }
    }
}

impl fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("auth_mechanism", &self.auth_mechanism)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Opens remote sessions.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Open a new session with its cursor.
    async fn open_session(
        &self,
        params: &SessionParams,
    ) -> Result<Box<dyn RemoteSession>, DriverError>;
}

/// One open session and its cursor.
///
/// Callers must not issue a second call before the previous one returns;
/// the `&mut self` receivers make that a compile-time rule.
#[async_trait]
pub trait RemoteSession: Send {
    /// Send a statement.
    ///
    /// Returns the result descriptor, or `None` when the statement produces
    /// no result set.
    async fn execute(&mut self, sql: &str) -> Result<Option<Vec<ColumnInfo>>, DriverError>;

    /// Fetch every remaining row of the current result set.
    async fn fetch_all(&mut self) -> Result<Vec<Row>, DriverError>;

    /// Close the cursor.
    async fn close_cursor(&mut self) -> Result<(), DriverError>;

    /// Close the session.
    async fn close(&mut self) -> Result<(), DriverError>;
}
