//! Shared SQLite plumbing for the stores.
//!
//! Every store owns one [`StoreHandle`]. An operation takes the handle's lock
//! for its whole duration, which is its session; there is no cache in front of
//! the database. A handle whose connection failed to open, or that has been
//! closed, reports [`CronosError::NotConnected`].

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::IN_MEMORY;
use crate::error::{CronosError, Result};

/// Open options shared by every store.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenOptions {
    /// Bounded wait on a locked database.
    pub busy_timeout_ms: u64,
    /// Enable WAL journaling (ignored for in-memory databases).
    pub wal_mode: bool,
}

/// Open (or create) an SQLite database at `path`, or in memory for `:memory:`.
pub(crate) fn open_connection(path: &str, options: OpenOptions) -> Result<Connection> {
    let conn = if path == IN_MEMORY {
        Connection::open_in_memory()?
    } else {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(Path::new(path), flags)?;
        if options.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn
    };

    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;
    Ok(conn)
}

/// A store's connection slot.
pub(crate) struct StoreHandle {
    name: &'static str,
    conn: Mutex<Option<Connection>>,
}

impl StoreHandle {
    /// Wrap an open connection.
    pub fn connected(name: &'static str, conn: Connection) -> Self {
        Self {
            name,
            conn: Mutex::new(Some(conn)),
        }
    }

    /// A handle with no connection behind it.
    pub fn disconnected(name: &'static str) -> Self {
        Self {
            name,
            conn: Mutex::new(None),
        }
    }

    /// Whether a connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Run `f` against the connection for the duration of one operation.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(CronosError::NotConnected(self.name))?;
        f(conn)
    }

    /// Release the connection. Later operations report `NotConnected`.
    pub fn close(&self) {
        if let Some(conn) = self.conn.lock().take() {
            if let Err((_, err)) = conn.close() {
                warn!(store = self.name, error = %err, "Error while closing store connection");
            } else {
                info!(store = self.name, "Store connection closed");
            }
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Map a failure from the storage engine into the unavailable class when it
/// is one, leaving everything else untouched.
pub(crate) fn classify(err: CronosError) -> CronosError {
    if err.is_unavailable() {
        match err {
            CronosError::NotConnected(_) | CronosError::StoreUnavailable(_) => err,
            other => CronosError::StoreUnavailable(other.to_string()),
        }
    } else {
        err
    }
}

/// Bind a JSON scalar as an SQLite value. Arrays and objects bind as JSON text.
pub(crate) fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Read an SQLite value back as JSON.
pub(crate) fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|&byte| Value::from(byte)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> OpenOptions {
        OpenOptions {
            busy_timeout_ms: 100,
            wal_mode: true,
        }
    }

    #[test]
    fn closed_handle_reports_not_connected() {
        let conn = open_connection(IN_MEMORY, options()).expect("open");
        let handle = StoreHandle::connected("test", conn);
        assert!(handle.is_connected());

        handle.close();
        assert!(!handle.is_connected());
        let err = handle.with_conn(|_| Ok(())).expect_err("closed");
        assert!(matches!(err, CronosError::NotConnected("test")));
    }

    #[test]
    fn file_backed_connection_opens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("handle.db");
        let conn = open_connection(path.to_str().expect("utf8 path"), options()).expect("open");
        let handle = StoreHandle::connected("test", conn);
        let one: i64 = handle
            .with_conn(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?))
            .expect("query");
        assert_eq!(one, 1);
    }

    #[test]
    fn busy_errors_are_reclassified() {
        let err = CronosError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        ));
        assert!(matches!(classify(err), CronosError::StoreUnavailable(_)));
        assert!(matches!(
            classify(CronosError::Validation("x".into())),
            CronosError::Validation(_)
        ));
    }
}
