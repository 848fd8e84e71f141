//! World state store: scalar player state and per-turn logs.
//!
//! A small relational side store next to the hybrid memory. Generic updates
//! only ever touch the `(table, column)` pairs in [`ALLOWED_COLUMNS`]; table
//! and column names are never taken from the caller's strings.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::StateConfig;
use crate::error::{CronosError, Result};
use crate::sqlite::{OpenOptions, StoreHandle, json_to_sql, open_connection, sql_to_json};
use crate::types::Properties;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS player (
    id        TEXT PRIMARY KEY,
    name      TEXT,
    status    TEXT,
    location  TEXT,
    inventory TEXT
);

CREATE TABLE IF NOT EXISTS turn_log (
    user_id     TEXT NOT NULL,
    universe_id TEXT NOT NULL,
    turn_id     INTEGER NOT NULL,
    payload     TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (user_id, universe_id, turn_id)
);
";

/// Tables accepted by [`WorldStateStore::update`] and their writable columns.
pub const ALLOWED_COLUMNS: &[(&str, &[&str])] = &[("player", &["name", "status", "location", "inventory"])];

/// One logged turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Turn number within the adventure's universe.
    pub turn_id: i64,
    /// Whatever the caller logged for the turn.
    pub payload: Value,
    /// When the turn was first logged or last replaced (RFC 3339).
    pub created_at: String,
}

/// Handle to the world state database.
#[derive(Debug)]
pub struct WorldStateStore {
    handle: StoreHandle,
}

impl WorldStateStore {
    /// Open (or create) the world state database.
    ///
    /// # Errors
    ///
    /// Returns a database error if the file cannot be opened.
    pub fn open(config: &StateConfig) -> Result<Self> {
        let conn = open_connection(
            &config.path,
            OpenOptions {
                busy_timeout_ms: 5_000,
                wal_mode: true,
            },
        )?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %config.path, "World state store opened");
        Ok(Self {
            handle: StoreHandle::connected("state", conn),
        })
    }

    /// Player row by id, as a column → value map.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn get_player(&self, id: &str) -> Result<Option<Properties>> {
        self.handle.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT * FROM player WHERE id = ?1")?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
            Ok(stmt
                .query_row(params![id], |row| {
                    let mut record = Properties::new();
                    for (idx, column) in columns.iter().enumerate() {
                        record.insert(column.clone(), sql_to_json(row.get_ref(idx)?));
                    }
                    Ok(record)
                })
                .optional()?)
        })
    }

    /// Upsert `data` into the row of `table` keyed by `condition_id`.
    ///
    /// Every key of `data` must be an allowed column of `table`.
    ///
    /// # Errors
    ///
    /// [`CronosError::Validation`] for an unknown table or column, or empty
    /// `data`, before the database is touched; database errors otherwise.
    pub fn update(&self, table: &str, data: &Properties, condition_id: &str) -> Result<()> {
        let (table, columns) = resolve(table, data)?;
        if condition_id.trim().is_empty() {
            return Err(CronosError::Validation("update requires a condition id".into()));
        }

        let placeholders: Vec<String> = (2..=columns.len() + 1).map(|i| format!("?{i}")).collect();
        let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = excluded.{c}")).collect();
        let sql = format!(
            "INSERT INTO {table} (id, {}) VALUES (?1, {})
             ON CONFLICT(id) DO UPDATE SET {}",
            columns.join(", "),
            placeholders.join(", "),
            assignments.join(", "),
        );

        let mut values = vec![rusqlite::types::Value::Text(condition_id.to_string())];
        values.extend(columns.iter().map(|column| {
            data.get(*column).map_or(rusqlite::types::Value::Null, json_to_sql)
        }));

        self.handle.with_conn(|conn| {
            conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
            Ok(())
        })?;
        info!(table, id = %condition_id, columns = columns.len(), "World state updated");
        Ok(())
    }

    /// Log a turn. Logging the same turn again replaces its payload.
    ///
    /// # Errors
    ///
    /// [`CronosError::Validation`] for a blank scope; database errors otherwise.
    pub fn append_turn(&self, user_id: &str, universe_id: &str, turn_id: i64, payload: &Value) -> Result<()> {
        if user_id.trim().is_empty() || universe_id.trim().is_empty() {
            return Err(CronosError::Validation("turn log requires userId and universeId".into()));
        }
        let payload = serde_json::to_string(payload)?;
        self.handle.with_conn(|conn| {
            conn.execute(
                "INSERT INTO turn_log (user_id, universe_id, turn_id, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, universe_id, turn_id) DO UPDATE SET
                    payload = excluded.payload,
                    created_at = excluded.created_at",
                params![user_id, universe_id, turn_id, payload, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        debug!(user = %user_id, universe = %universe_id, turn_id, "Turn logged");
        Ok(())
    }

    /// Every logged turn of one tenant scope, by turn id.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn turns(&self, user_id: &str, universe_id: &str) -> Result<Vec<TurnRecord>> {
        self.handle.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT turn_id, payload, created_at FROM turn_log
                 WHERE user_id = ?1 AND universe_id = ?2 ORDER BY turn_id",
            )?;
            let rows = stmt.query_map(params![user_id, universe_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?;
            let mut turns = Vec::new();
            for row in rows {
                let (turn_id, payload, created_at) = row?;
                turns.push(TurnRecord {
                    turn_id,
                    payload: serde_json::from_str(&payload)?,
                    created_at,
                });
            }
            Ok(turns)
        })
    }

    /// Whether the database connection is held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Release the database connection.
    pub fn close(&self) {
        self.handle.close();
    }
}

/// Map caller-supplied names onto the allowlist. The returned names are the
/// allowlist's own static strings.
fn resolve(table: &str, data: &Properties) -> Result<(&'static str, Vec<&'static str>)> {
    let Some(&(table, allowed)) = ALLOWED_COLUMNS.iter().find(|(name, _)| *name == table) else {
        return Err(CronosError::Validation(format!("unknown table `{table}`")));
    };
    if data.is_empty() {
        return Err(CronosError::Validation("update has no columns".into()));
    }
    let mut columns = Vec::with_capacity(data.len());
    for key in data.keys() {
        match allowed.iter().find(|column| **column == key.as_str()) {
            Some(column) => columns.push(*column),
            None => {
                return Err(CronosError::Validation(format!(
                    "column `{key}` is not writable on `{table}`"
                )));
            }
        }
    }
    Ok((table, columns))
}
