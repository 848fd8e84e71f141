//! Knowledge Graph Store: tenant-scoped entities, relationships and
//! aggregate nodes.
//!
//! The graph lives in an embedded SQLite database laid out as a small
//! property graph:
//!
//! ```sql
//! nodes(label, id, user_id, universe_id, props)          -- User, Universe, Character, Adventure
//! entities(id, name, universe_id, user_id)               -- unique on (name, universe_id, user_id)
//! relationships(id, subject_id, relation, object_id, properties)
//!                                                        -- unique on (subject_id, relation, object_id)
//! links(src_label, src_id, relation, dst_label, dst_id)  -- CREATED, PLAYS, HAPPENS_IN, USES_TEMPLATE, CONTAINS
//! ```
//!
//! Batch edge ingestion is one transaction: it either lands completely or is
//! reported as a [`CronosError::BatchFailure`]. Neighbor queries never fail;
//! they return an empty list and log the cause.

pub mod session;

use std::collections::HashSet;
use std::time::Instant;

use rusqlite::types::Value as SqlValue;
use tracing::{debug, error, info, warn};

use crate::config::GraphConfig;
use crate::error::{CronosError, ReadOutcome, Result};
use crate::sqlite::{OpenOptions, StoreHandle, json_to_sql, open_connection, sql_to_json};
use crate::types::{Edge, EdgeInput, Properties};

pub use session::{Endpoint, GraphSession, LinkKind, NodeLabel, StoredNode};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    label       TEXT NOT NULL,
    id          TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    universe_id TEXT,
    props       TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (label, id)
);
CREATE INDEX IF NOT EXISTS nodes_owner ON nodes (label, user_id);
CREATE INDEX IF NOT EXISTS nodes_universe ON nodes (label, universe_id, user_id);

CREATE TABLE IF NOT EXISTS entities (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    universe_id TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    UNIQUE (name, universe_id, user_id)
);

CREATE TABLE IF NOT EXISTS relationships (
    id          INTEGER PRIMARY KEY,
    subject_id  INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    relation    TEXT NOT NULL,
    object_id   INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    properties  TEXT NOT NULL,
    UNIQUE (subject_id, relation, object_id)
);
CREATE INDEX IF NOT EXISTS relationships_object ON relationships (object_id);

CREATE TABLE IF NOT EXISTS links (
    src_label   TEXT NOT NULL,
    src_id      TEXT NOT NULL,
    relation    TEXT NOT NULL,
    dst_label   TEXT NOT NULL,
    dst_id      TEXT NOT NULL,
    PRIMARY KEY (src_label, src_id, relation, dst_label, dst_id)
);
CREATE INDEX IF NOT EXISTS links_dst ON links (dst_label, dst_id);
";

/// Handle to the knowledge graph.
#[derive(Debug)]
pub struct GraphStore {
    handle: StoreHandle,
    neighbor_limit: usize,
    max_depth: u32,
}

impl GraphStore {
    /// Open (or create) the graph database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::Database`] if the database cannot be opened or
    /// the schema cannot be created.
    pub fn open(config: &GraphConfig) -> Result<Self> {
        let conn = open_connection(
            &config.path,
            OpenOptions {
                busy_timeout_ms: config.busy_timeout_ms,
                wal_mode: config.wal_mode,
            },
        )?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %config.path, wal = config.wal_mode, "Knowledge graph store opened");
        Ok(Self {
            handle: StoreHandle::connected("graph", conn),
            neighbor_limit: config.neighbor_limit,
            max_depth: config.max_depth,
        })
    }

    /// Open the graph, or fall back to a not-connected store if that fails.
    ///
    /// A not-connected store answers reads with empty results and rejects
    /// writes with [`CronosError::NotConnected`].
    #[must_use]
    pub fn connect(config: &GraphConfig) -> Self {
        match Self::open(config) {
            Ok(store) => store,
            Err(err) => {
                warn!(path = %config.path, error = %err, "Could not connect to knowledge graph");
                Self::disconnected(config)
            }
        }
    }

    /// A store with no database behind it.
    #[must_use]
    pub fn disconnected(config: &GraphConfig) -> Self {
        Self {
            handle: StoreHandle::disconnected("graph"),
            neighbor_limit: config.neighbor_limit,
            max_depth: config.max_depth,
        }
    }

    /// Run `f` inside one transaction, committing if it returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::NotConnected`], a database error, or whatever
    /// `f` returns.
    pub fn session<T>(&self, f: impl FnOnce(&GraphSession<'_>) -> Result<T>) -> Result<T> {
        self.handle.with_conn(|conn| {
            let session = GraphSession::new(conn.transaction()?);
            let value = f(&session)?;
            session.commit()?;
            Ok(value)
        })
    }

    // ------------------------------------------------------------------
    // Edge ingestion
    // ------------------------------------------------------------------

    /// Merge a batch of relationship edges into one universe of one user.
    ///
    /// For every edge both entities are merged under the tenant scope, linked
    /// to the universe with `CONTAINS`, and the relationship is merged with
    /// its properties (empty when absent). Returns the number of edges
    /// processed.
    ///
    /// # Errors
    ///
    /// - [`CronosError::Validation`] if any edge or the scope is blank (nothing is written).
    /// - [`CronosError::ReferenceNotFound`] if the universe does not exist for this user.
    /// - [`CronosError::NotConnected`] if the store is not connected.
    /// - [`CronosError::BatchFailure`] if execution fails; nothing from the batch is kept.
    pub fn merge_edges(&self, batch: &[EdgeInput], universe_id: &str, user_id: &str) -> Result<usize> {
        let start = Instant::now();
        validate_batch(batch, universe_id, user_id)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let result = self.session(|session| {
            match session.node(NodeLabel::Universe, universe_id)? {
                Some(universe) if universe.user_id == user_id => {}
                _ => {
                    return Err(CronosError::ReferenceNotFound {
                        kind: "Universe",
                        id: universe_id.to_string(),
                    });
                }
            }

            let universe = Endpoint::new(NodeLabel::Universe, universe_id);
            for edge in batch {
                let subject = session.merge_entity(&edge.subject, universe_id, user_id)?;
                let object = session.merge_entity(&edge.object, universe_id, user_id)?;
                session.merge_link(universe, LinkKind::Contains, Endpoint::new(NodeLabel::Entity, &subject.to_string()))?;
                session.merge_link(universe, LinkKind::Contains, Endpoint::new(NodeLabel::Entity, &object.to_string()))?;

                let properties = match &edge.properties {
                    Some(props) => serde_json::to_string(props)?,
                    None => "{}".to_string(),
                };
                session.merge_relationship(subject, &edge.relation, object, &properties)?;
            }
            Ok(batch.len())
        });

        match result {
            Ok(count) => {
                info!(
                    universe = %universe_id,
                    user = %user_id,
                    count,
                    elapsed_us = start.elapsed().as_micros(),
                    "Merged edge batch"
                );
                Ok(count)
            }
            Err(err @ (CronosError::ReferenceNotFound { .. } | CronosError::NotConnected(_))) => Err(err),
            Err(err) => {
                error!(universe = %universe_id, user = %user_id, attempted = batch.len(), error = %err, "Edge batch failed");
                Err(CronosError::BatchFailure {
                    attempted: batch.len(),
                    reason: err.to_string(),
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Relationship edges around `entity` in one tenant scope.
    ///
    /// `depth` below 1 is treated as 1 and above the configured maximum is
    /// clamped; `limit` defaults to, and may not exceed, the configured
    /// neighbor limit. Never fails: problems yield an empty list.
    #[must_use]
    pub fn query_neighbors(
        &self,
        entity: &str,
        universe_id: &str,
        user_id: &str,
        depth: u32,
        limit: Option<usize>,
    ) -> Vec<Edge> {
        match self.try_query_neighbors(entity, universe_id, user_id, depth, limit) {
            ReadOutcome::Ok(edges) => edges,
            ReadOutcome::NotConnected => {
                debug!(entity = %entity, "Neighbor query skipped: graph not connected");
                Vec::new()
            }
            ReadOutcome::Failed(err) => {
                warn!(entity = %entity, error = %err, "Neighbor query failed, returning no edges");
                Vec::new()
            }
        }
    }

    /// Neighbor query that reports failures instead of hiding them.
    #[must_use]
    pub fn try_query_neighbors(
        &self,
        entity: &str,
        universe_id: &str,
        user_id: &str,
        depth: u32,
        limit: Option<usize>,
    ) -> ReadOutcome<Vec<Edge>> {
        let limit = limit.unwrap_or(self.neighbor_limit).min(self.neighbor_limit);
        let depth = depth.clamp(1, self.max_depth.max(1));
        self.traverse(entity, universe_id, user_id, depth, limit).into()
    }

    fn traverse(
        &self,
        entity: &str,
        universe_id: &str,
        user_id: &str,
        depth: u32,
        limit: usize,
    ) -> Result<Vec<Edge>> {
        if limit == 0 || entity.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();

        let edges = self.session(|session| {
            let Some(root) = session.entity_id(entity, universe_id, user_id)? else {
                return Ok(Vec::new());
            };

            let mut seen_edges = HashSet::new();
            let mut visited = HashSet::from([root]);
            let mut frontier = vec![root];
            let mut edges = Vec::new();

            'levels: for _ in 0..depth {
                let mut next = Vec::new();
                for &node in &frontier {
                    for stored in session.edges_touching(node, limit)? {
                        if !seen_edges.insert(stored.rowid) {
                            continue;
                        }
                        for neighbor in [stored.subject_id, stored.object_id] {
                            if visited.insert(neighbor) {
                                next.push(neighbor);
                            }
                        }
                        edges.push(stored.edge);
                        if edges.len() >= limit {
                            break 'levels;
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                frontier = next;
            }
            Ok(edges)
        })?;

        debug!(
            entity = %entity,
            universe = %universe_id,
            depth,
            edges = edges.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Neighbor query"
        );
        Ok(edges)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Run a read-only statement with named parameters (`:name` in the SQL,
    /// `name` in `params`) and return rows as JSON objects.
    ///
    /// Administrative escape hatch; not part of the hardened contract.
    ///
    /// # Errors
    ///
    /// [`CronosError::Validation`] for anything but a `SELECT`, a `WITH`
    /// query or an introspection pragma, and for statements that would
    /// write. Otherwise database errors.
    pub fn raw_query(&self, statement: &str, params: &Properties) -> Result<Vec<Properties>> {
        check_query_form(statement)?;
        self.handle.with_conn(|conn| {
            let mut stmt = conn.prepare(statement)?;
            if !stmt.readonly() {
                return Err(CronosError::Validation(
                    "raw queries must be read-only".into(),
                ));
            }

            let names: Vec<String> = params.keys().map(|key| format!(":{key}")).collect();
            let values: Vec<SqlValue> = params.values().map(json_to_sql).collect();
            let bound: Vec<(&str, &dyn rusqlite::ToSql)> = names
                .iter()
                .zip(values.iter())
                .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
                .collect();

            let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
            let mut rows = stmt.query(bound.as_slice())?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Properties::new();
                for (idx, column) in columns.iter().enumerate() {
                    record.insert(column.clone(), sql_to_json(row.get_ref(idx)?));
                }
                out.push(record);
            }
            Ok(out)
        })
    }

    /// Delete every node, entity, relationship and link.
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::NotConnected`] or a database error.
    pub fn reset(&self) -> Result<()> {
        self.session(|session| {
            session.raw().execute_batch(
                "DELETE FROM relationships;
                 DELETE FROM links;
                 DELETE FROM entities;
                 DELETE FROM nodes;",
            )?;
            Ok(())
        })?;
        warn!("Knowledge graph reset: all nodes and relationships deleted");
        Ok(())
    }

    /// Run SQLite's integrity check.
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::NotConnected`] or a database error.
    pub fn integrity_check(&self) -> Result<bool> {
        self.handle.with_conn(|conn| {
            let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            Ok(result == "ok")
        })
    }

    /// Whether the database connection is held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Configured cap on edges per neighbor query.
    #[must_use]
    pub fn neighbor_limit(&self) -> usize {
        self.neighbor_limit
    }

    /// Release the database connection.
    pub fn close(&self) {
        self.handle.close();
    }
}

fn validate_batch(batch: &[EdgeInput], universe_id: &str, user_id: &str) -> Result<()> {
    if universe_id.trim().is_empty() || user_id.trim().is_empty() {
        return Err(CronosError::Validation(
            "edge batch requires universeId and userId".into(),
        ));
    }
    for (idx, edge) in batch.iter().enumerate() {
        if edge.subject.trim().is_empty() || edge.relation.trim().is_empty() || edge.object.trim().is_empty() {
            return Err(CronosError::Validation(format!(
                "edge {idx} has an empty subject, relation or object"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


/// Pragmas that only report on the schema or the file.
const INTROSPECTION_PRAGMAS: &[&str] = &[
    "table_info",
    "table_xinfo",
    "table_list",
    "index_list",
    "index_info",
    "foreign_key_list",
    "foreign_key_check",
    "integrity_check",
    "quick_check",
];

/// Reject statements SQLite would still call read-only but that change the
/// connection: transaction control, `ATTACH`, setting pragmas.
fn check_query_form(statement: &str) -> Result<()> {
    let trimmed = statement.trim_start();
    let keyword: String = trimmed
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_uppercase();
    match keyword.as_str() {
        "SELECT" | "WITH" => Ok(()),
        "PRAGMA" => {
            let body = trimmed["PRAGMA".len()..].trim();
            let name: String = body
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect::<String>()
                .to_ascii_lowercase();
            let rest = body[name.len()..].trim_start();
            let query_form = rest.is_empty() || rest == ";" || rest.starts_with('(');
            if query_form && !rest.contains('=') && INTROSPECTION_PRAGMAS.contains(&name.as_str()) {
                Ok(())
            } else {
                Err(CronosError::Validation(format!(
                    "pragma `{name}` is not allowed in raw queries"
                )))
            }
        }
        _ => Err(CronosError::Validation(
            "raw queries must be SELECT, WITH or an introspection PRAGMA".into(),
        )),
    }
}
