//! Local SQLite storage for application metadata.
//!
//! Stores saved connections, the last-used connection, query history, open
//! editor buffers and UI state. Passwords are kept in the connection row.
//!
//! # Data Directory Locations
//!
//! - **macOS**: `~/Library/Application Support/dev.apiary.Apiary`
//! - **Windows**: `%APPDATA%\apiary\Apiary`
//! - **Linux**: `~/.local/share/apiary`
//! - **Debug builds**: `./apiary_data` in current directory

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ApiaryError;
use crate::models::{AuthMechanism, ConnectionConfig, QueryHistoryEntry};

/// Default bound on stored history entries.
pub const DEFAULT_MAX_HISTORY: usize = 50;

const LAST_CONNECTION_KEY: &str = "last_connection";
const OPEN_BUFFERS_KEY: &str = "open_buffers";

/// Get the default data directory for the application.
///
/// Debug builds use `./apiary_data` in the current directory.
pub fn default_data_dir() -> PathBuf {
    #[cfg(debug_assertions)]
    {
        PathBuf::from("./apiary_data")
    }

    #[cfg(not(debug_assertions))]
    {
        dirs::data_dir()
            .map(|d| {
                #[cfg(target_os = "macos")]
                {
                    d.join("dev.apiary.Apiary")
                }
                #[cfg(target_os = "windows")]
                {
                    d.join("apiary").join("Apiary")
                }
                #[cfg(not(any(target_os = "macos", target_os = "windows")))]
                {
                    d.join("apiary")
                }
            })
            .unwrap_or_else(|| PathBuf::from("./apiary_data"))
    }
}

/// Initialize the data directory, creating it if needed.
pub fn init_data_dir(path: &Path) -> Result<(), ApiaryError> {
    if path.exists() {
        if !path.is_dir() {
            return Err(ApiaryError::storage(
                format!("Data path exists but is not a directory: {}", path.display()),
                Some("Select a different location or remove the existing file"),
            ));
        }
        return Ok(());
    }

    std::fs::create_dir_all(path).map_err(|e| {
        ApiaryError::storage(
            format!("Failed to create data directory '{}': {}", path.display(), e),
            Some("Check permissions or select a different location"),
        )
    })?;

    tracing::info!(path = %path.display(), "Created data directory");
    Ok(())
}

/// SQLite-based local storage for application data.
///
/// Thread-safe via internal Mutex. Uses WAL mode for concurrent reads.
pub struct LocalStorage {
    connection: Mutex<Connection>,
    data_dir: PathBuf,
}

impl LocalStorage {
    /// Open or create local storage in the given data directory.
    pub fn open(data_dir: PathBuf) -> Result<Self, ApiaryError> {
        init_data_dir(&data_dir)?;
        let db_path = data_dir.join("apiary.db");
        Self::open_with_path(db_path, data_dir)
    }

    /// Open storage with a specific database path.
    pub fn open_with_path(db_path: PathBuf, data_dir: PathBuf) -> Result<Self, ApiaryError> {
        let connection = Connection::open(&db_path).map_err(|e| {
            ApiaryError::storage(
                format!("Failed to open database '{}': {}", db_path.display(), e),
                Some("The database file may be corrupted. Try deleting it to start fresh."),
            )
        })?;

        Self::configure_connection(&connection)?;

        let storage = Self { connection: Mutex::new(connection), data_dir };
        storage.run_migrations()?;

        tracing::info!(path = %db_path.display(), "Local storage opened");
        Ok(storage)
    }

    fn configure_connection(conn: &Connection) -> Result<(), ApiaryError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
            ",
        )
        .map_err(|e| ApiaryError::storage(format!("Failed to configure database: {e}"), None))
    }

    fn run_migrations(&self) -> Result<(), ApiaryError> {
        let conn = self.connection.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS migrations (
                domain TEXT NOT NULL,
                step INTEGER NOT NULL,
                migration TEXT NOT NULL,
                PRIMARY KEY(domain, step)
            ) STRICT",
            [],
        )
        .map_err(|e| {
            ApiaryError::storage(format!("Failed to create migrations table: {e}"), None)
        })?;

        Self::migrate_schema(&conn)
    }

    fn migrate_schema(conn: &Connection) -> Result<(), ApiaryError> {
        const DOMAIN: &str = "core";

        let current_step: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(step), 0) FROM migrations WHERE domain = ?",
                [DOMAIN],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_step < 1 {
            conn.execute_batch(
                "
                -- Saved connections, keyed by display name
                CREATE TABLE connections (
                    name TEXT PRIMARY KEY,
                    host TEXT NOT NULL,
                    port INTEGER NOT NULL DEFAULT 10000,
                    database_name TEXT NOT NULL DEFAULT 'default',
                    username TEXT NOT NULL DEFAULT '',
                    password TEXT NOT NULL DEFAULT '',
                    auth_mechanism TEXT NOT NULL DEFAULT 'PLAIN',
                    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                ) STRICT;

                -- Query history, most recent has the highest id
                CREATE TABLE query_history (
                    history_id INTEGER PRIMARY KEY,
                    sql_text TEXT NOT NULL UNIQUE,
                    executed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                ) STRICT;

                -- UI state persistence
                CREATE TABLE ui_state (
                    key TEXT PRIMARY KEY,
                    value_json TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                ) STRICT;
                ",
            )
            .map_err(|e| ApiaryError::storage(format!("Migration 1 failed: {e}"), None))?;

            conn.execute(
                "INSERT INTO migrations (domain, step, migration) VALUES (?, 1, 'initial_schema')",
                [DOMAIN],
            )
            .map_err(|e| ApiaryError::storage(format!("Failed to record migration: {e}"), None))?;

            tracing::info!("Applied migration 1: initial_schema");
        }

        Ok(())
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // ========== Connection Operations ==========

    /// Save a connection, replacing any saved connection with the same name.
    pub fn save_connection(&self, config: &ConnectionConfig) -> Result<(), ApiaryError> {
        let conn = self.connection.lock();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO connections (
                name, host, port, database_name, username, password, auth_mechanism, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(name) DO UPDATE SET
                host = excluded.host,
                port = excluded.port,
                database_name = excluded.database_name,
                username = excluded.username,
                password = excluded.password,
                auth_mechanism = excluded.auth_mechanism,
                updated_at = excluded.updated_at",
            params![
                config.name,
                config.host,
                config.port,
                config.database,
                config.username,
                config.password,
                config.auth_mechanism.as_str(),
                now,
            ],
        )
        .map_err(|e| ApiaryError::storage(format!("Failed to save connection: {e}"), None))?;

        tracing::debug!(name = %config.name, host = %config.host, "Connection saved");
        Ok(())
    }

    /// Load a saved connection by name.
    pub fn load_connection(&self, name: &str) -> Result<Option<ConnectionConfig>, ApiaryError> {
        let conn = self.connection.lock();

        conn.query_row(
            "SELECT name, host, port, database_name, username, password, auth_mechanism
             FROM connections WHERE name = ?",
            [name],
            row_to_connection_config,
        )
        .optional()
        .map_err(|e| ApiaryError::storage(format!("Failed to load connection: {e}"), None))
    }

    /// Load all saved connections, ordered by name.
    pub fn load_all_connections(&self) -> Result<Vec<ConnectionConfig>, ApiaryError> {
        let conn = self.connection.lock();

        let mut stmt = conn
            .prepare(
                "SELECT name, host, port, database_name, username, password, auth_mechanism
                 FROM connections ORDER BY name",
            )
            .map_err(|e| ApiaryError::storage(format!("Failed to prepare query: {e}"), None))?;

        let rows = stmt.query_map([], row_to_connection_config).map_err(|e| {
            ApiaryError::storage(format!("Failed to query connections: {e}"), None)
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ApiaryError::storage(format!("Failed to read connection: {e}"), None))
    }

    /// Delete a saved connection.
    pub fn delete_connection(&self, name: &str) -> Result<(), ApiaryError> {
        let conn = self.connection.lock();

        conn.execute("DELETE FROM connections WHERE name = ?", [name])
            .map_err(|e| ApiaryError::storage(format!("Failed to delete connection: {e}"), None))?;

        tracing::debug!(name, "Connection deleted");
        Ok(())
    }

    /// Remember the last connection used.
    pub fn set_last_connection(&self, name: &str) -> Result<(), ApiaryError> {
        self.save_ui_state(LAST_CONNECTION_KEY, &serde_json::Value::from(name))
    }

    /// Name of the last connection used, if any.
    pub fn last_connection(&self) -> Result<Option<String>, ApiaryError> {
        Ok(self
            .load_ui_state(LAST_CONNECTION_KEY)?
            .and_then(|value| value.as_str().map(String::from)))
    }

    // ========== Query History Operations ==========

    /// Record a statement in history.
    ///
    /// The text is trimmed and empty text is ignored. Re-running a statement
    /// moves it to the front. At most `max_entries` entries are kept.
    pub fn add_to_history(&self, sql: &str, max_entries: usize) -> Result<(), ApiaryError> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection.lock();
        let tx = conn
            .transaction()
            .map_err(|e| ApiaryError::storage(format!("Failed to begin transaction: {e}"), None))?;

        tx.execute("DELETE FROM query_history WHERE sql_text = ?", [sql])
            .map_err(|e| ApiaryError::storage(format!("Failed to add to history: {e}"), None))?;
        tx.execute(
            "INSERT INTO query_history (sql_text, executed_at) VALUES (?1, ?2)",
            params![sql, Utc::now().to_rfc3339()],
        )
        .map_err(|e| ApiaryError::storage(format!("Failed to add to history: {e}"), None))?;
        tx.execute(
            "DELETE FROM query_history WHERE history_id NOT IN (
                SELECT history_id FROM query_history ORDER BY history_id DESC LIMIT ?
            )",
            [max_entries as i64],
        )
        .map_err(|e| ApiaryError::storage(format!("Failed to trim history: {e}"), None))?;

        tx.commit()
            .map_err(|e| ApiaryError::storage(format!("Failed to commit history: {e}"), None))?;

        tracing::trace!(sql_len = sql.len(), "Query added to history");
        Ok(())
    }

    /// Load history, most recent first.
    pub fn load_history(&self, limit: usize) -> Result<Vec<QueryHistoryEntry>, ApiaryError> {
        let conn = self.connection.lock();

        let mut stmt = conn
            .prepare(
                "SELECT history_id, sql_text, executed_at
                 FROM query_history
                 ORDER BY history_id DESC
                 LIMIT ?",
            )
            .map_err(|e| ApiaryError::storage(format!("Failed to prepare query: {e}"), None))?;

        let rows = stmt
            .query_map([limit as i64], |row| {
                let executed_at: String = row.get(2)?;
                Ok(QueryHistoryEntry {
                    id: row.get(0)?,
                    sql: row.get(1)?,
                    executed_at: DateTime::parse_from_rfc3339(&executed_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(|e| ApiaryError::storage(format!("Failed to query history: {e}"), None))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ApiaryError::storage(format!("Failed to read history: {e}"), None))
    }

    /// Clear all history.
    pub fn clear_history(&self) -> Result<(), ApiaryError> {
        let conn = self.connection.lock();

        conn.execute("DELETE FROM query_history", [])
            .map_err(|e| ApiaryError::storage(format!("Failed to clear history: {e}"), None))?;

        tracing::debug!("Query history cleared");
        Ok(())
    }

    // ========== Editor Buffers ==========

    /// Save the text of every open editor buffer.
    pub fn save_open_buffers(&self, buffers: &[String]) -> Result<(), ApiaryError> {
        self.save_ui_state(OPEN_BUFFERS_KEY, &serde_json::to_value(buffers)?)
    }

    /// Load the open editor buffers; a single empty buffer when none are saved.
    pub fn load_open_buffers(&self) -> Result<Vec<String>, ApiaryError> {
        let buffers: Vec<String> = match self.load_ui_state(OPEN_BUFFERS_KEY)? {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };
        if buffers.is_empty() {
            Ok(vec![String::new()])
        } else {
            Ok(buffers)
        }
    }

    // ========== UI State Operations ==========

    /// Save UI state.
    pub fn save_ui_state(&self, key: &str, value: &serde_json::Value) -> Result<(), ApiaryError> {
        let conn = self.connection.lock();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO ui_state (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at",
            params![key, serde_json::to_string(value)?, now],
        )
        .map_err(|e| ApiaryError::storage(format!("Failed to save UI state: {e}"), None))?;

        Ok(())
    }

    /// Load UI state.
    pub fn load_ui_state(&self, key: &str) -> Result<Option<serde_json::Value>, ApiaryError> {
        let conn = self.connection.lock();

        let result: Option<String> = conn
            .query_row("SELECT value_json FROM ui_state WHERE key = ?", [key], |row| row.get(0))
            .optional()
            .map_err(|e| ApiaryError::storage(format!("Failed to load UI state: {e}"), None))?;

        match result {
            Some(json_str) => {
                let value = serde_json::from_str(&json_str).map_err(|e| {
                    ApiaryError::storage(format!("Invalid UI state JSON: {e}"), None)
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Delete UI state.
    pub fn delete_ui_state(&self, key: &str) -> Result<(), ApiaryError> {
        let conn = self.connection.lock();

        conn.execute("DELETE FROM ui_state WHERE key = ?", [key])
            .map_err(|e| ApiaryError::storage(format!("Failed to delete UI state: {e}"), None))?;

        Ok(())
    }
}

fn row_to_connection_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionConfig> {
    let auth: String = row.get(6)?;
    Ok(ConnectionConfig {
        name: row.get(0)?,
        host: row.get(1)?,
        port: row.get(2)?,
        database: row.get(3)?,
        username: row.get(4)?,
        password: row.get(5)?,
        auth_mechanism: AuthMechanism::parse(&auth),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(dir.path().to_path_buf()).unwrap();
        (dir, storage)
    }

    fn config(name: &str) -> ConnectionConfig {
        ConnectionConfig::builder()
            .name(name)
            .host("hs2.internal")
            .username("analyst")
            .password("pw")
            .auth_mechanism(AuthMechanism::LdapCredentials)
            .build()
            .unwrap()
    }

    #[test]
    fn test_connection_roundtrip_and_replace() {
        let (_dir, storage) = storage();
        storage.save_connection(&config("prod")).unwrap();
        assert_eq!(storage.load_connection("prod").unwrap(), Some(config("prod")));

        let mut edited = config("prod");
        edited.port = 10001;
        edited.database = "sales".to_string();
        storage.save_connection(&edited).unwrap();

        let all = storage.load_all_connections().unwrap();
        assert_eq!(all, vec![edited]);
        assert!(storage.load_connection("missing").unwrap().is_none());
    }

    #[test]
    fn test_connections_ordered_by_name_and_deleted() {
        let (_dir, storage) = storage();
        storage.save_connection(&config("zeta")).unwrap();
        storage.save_connection(&config("alpha")).unwrap();

        let names: Vec<String> =
            storage.load_all_connections().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        storage.delete_connection("alpha").unwrap();
        assert_eq!(storage.load_all_connections().unwrap().len(), 1);
    }

    #[test]
    fn test_last_connection() {
        let (_dir, storage) = storage();
        assert_eq!(storage.last_connection().unwrap(), None);
        storage.set_last_connection("prod").unwrap();
        storage.set_last_connection("dev").unwrap();
        assert_eq!(storage.last_connection().unwrap().as_deref(), Some("dev"));
    }

    #[test]
    fn test_history_is_deduplicated_most_recent_first() {
        let (_dir, storage) = storage();
        storage.add_to_history("SELECT 1", DEFAULT_MAX_HISTORY).unwrap();
        storage.add_to_history("SELECT 2", DEFAULT_MAX_HISTORY).unwrap();
        storage.add_to_history("  SELECT 1\n", DEFAULT_MAX_HISTORY).unwrap();
        storage.add_to_history("   ", DEFAULT_MAX_HISTORY).unwrap();

        let sql: Vec<String> =
            storage.load_history(10).unwrap().into_iter().map(|e| e.sql).collect();
        assert_eq!(sql, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_history_is_bounded() {
        let (_dir, storage) = storage();
        for i in 0..8 {
            storage.add_to_history(&format!("SELECT {i}"), 5).unwrap();
        }
        let history = storage.load_history(100).unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].sql, "SELECT 7");
        assert_eq!(history[4].sql, "SELECT 3");

        storage.clear_history().unwrap();
        assert!(storage.load_history(100).unwrap().is_empty());
    }

    #[test]
    fn test_open_buffers_default_to_one_empty_buffer() {
        let (_dir, storage) = storage();
        assert_eq!(storage.load_open_buffers().unwrap(), vec![String::new()]);

        let buffers = vec!["SELECT 1;".to_string(), "SHOW TABLES".to_string()];
        storage.save_open_buffers(&buffers).unwrap();
        assert_eq!(storage.load_open_buffers().unwrap(), buffers);
    }

    #[test]
    fn test_reopen_keeps_data_and_skips_migrations() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = LocalStorage::open(dir.path().to_path_buf()).unwrap();
            storage.save_connection(&config("prod")).unwrap();
        }
        let storage = LocalStorage::open(dir.path().to_path_buf()).unwrap();
        assert!(storage.load_connection("prod").unwrap().is_some());
    }

    #[test]
    fn test_init_data_dir_rejects_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, b"x").unwrap();
        let err = init_data_dir(&file).unwrap_err();
        assert_eq!(err.category(), "Storage");
        assert!(err.hint().is_some());
    }
}
