//! Connection configuration and status models.

use serde::{Deserialize, Serialize};

/// Default server port for the remote session protocol.
pub const DEFAULT_PORT: u16 = 10000;

/// Database selected when a connection does not name one.
pub const DEFAULT_DATABASE: &str = "default";

/// Lifecycle state of the session owned by a `ConnectionManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No open session
    #[default]
    Disconnected,
    /// A session was opened and has not been closed or lost
    Connected,
}

impl ConnectionStatus {
    /// Check if the connection is active.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the connection is disconnected.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// How the session authenticates against the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthMechanism {
    /// No authentication, no credentials sent
    #[serde(rename = "NOSASL")]
    NoAuth,
    /// Username and password
    #[default]
    #[serde(rename = "PLAIN")]
    PlainCredentials,
    /// Username and password checked against a directory server
    #[serde(rename = "LDAP")]
    LdapCredentials,
}

impl AuthMechanism {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAuth => "NOSASL",
            Self::PlainCredentials => "PLAIN",
            Self::LdapCredentials => "LDAP",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "NOSASL" | "NONE" => Self::NoAuth,
            "LDAP" => Self::LdapCredentials,
            _ => Self::PlainCredentials,
        }
    }

    /// Whether this mechanism sends a username and password.
    pub fn uses_credentials(&self) -> bool {
        !matches!(self, Self::NoAuth)
    }
}

/// Configuration for one saved connection.
///
/// Values are replaced wholesale on edit; nothing mutates a config that a
/// manager already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Display name, unique among saved connections
    pub name: String,
    /// Server hostname or IP
    pub host: String,
    /// Server port (default 10000)
    pub port: u16,
    /// Initial database (default "default")
    pub database: String,
    /// Login username, empty for `NoAuth`
    pub username: String,
    /// Login password, may be empty
    pub password: String,
    /// Authentication mechanism
    pub auth_mechanism: AuthMechanism,
}

impl ConnectionConfig {
    /// Create a configuration with default port, database and mechanism.
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            username: String::new(),
            password: String::new(),
            auth_mechanism: AuthMechanism::default(),
        }
    }

    /// Create a builder for complex configurations.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Name is required".to_string());
        }
        if self.host.trim().is_empty() {
            return Err("Host is required".to_string());
        }
        if self.port == 0 {
            return Err("Port must be between 1 and 65535".to_string());
        }
        if self.database.trim().is_empty() {
            return Err("Database is required".to_string());
        }
        match self.auth_mechanism {
            AuthMechanism::NoAuth => {
                if !self.username.is_empty() || !self.password.is_empty() {
                    return Err("NOSASL connections must not carry credentials".to_string());
                }
            }
            AuthMechanism::PlainCredentials | AuthMechanism::LdapCredentials => {
                if self.username.trim().is_empty() {
                    return Err(format!(
                        "Username is required for {} authentication",
                        self.auth_mechanism.as_str()
                    ));
                }
            }
        }
        Ok(())
    }

    /// Get the display connection string (without password).
    pub fn display_url(&self) -> String {
        if self.auth_mechanism.uses_credentials() {
            format!("{}@{}:{}/{}", self.username, self.host, self.port, self.database)
        } else {
            format!("{}:{}/{}", self.host, self.port, self.database)
        }
    }
}

/// Builder for ConnectionConfig.
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    name: Option<String>,
    host: Option<String>,
    port: u16,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    auth_mechanism: AuthMechanism,
}

impl ConnectionConfigBuilder {
    /// Set the connection name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the authentication mechanism.
    pub fn auth_mechanism(mut self, auth_mechanism: AuthMechanism) -> Self {
        self.auth_mechanism = auth_mechanism;
        self
    }

    /// Build the configuration.
    ///
    /// Credentials given together with `NoAuth` are dropped.
    pub fn build(self) -> Result<ConnectionConfig, String> {
        let (username, password) = if self.auth_mechanism.uses_credentials() {
            (self.username.unwrap_or_default(), self.password.unwrap_or_default())
        } else {
            (String::new(), String::new())
        };

        let config = ConnectionConfig {
            name: self.name.ok_or("Name is required")?,
            host: self.host.ok_or("Host is required")?,
            port: if self.port == 0 { DEFAULT_PORT } else { self.port },
            database: self.database.unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            username,
            password,
            auth_mechanism: self.auth_mechanism,
        };
        config.validate()?;
        Ok(config)
    }
}
