//! Transactional graph primitives.
//!
//! A [`GraphSession`] is one SQLite transaction over the graph schema. The
//! edge-ingestion path and the catalog compose these primitives; every
//! `merge_*` method is an idempotent upsert keyed on the natural identity.

use chrono::Utc;
use rusqlite::{OptionalExtension, Transaction, params};

use crate::error::Result;
use crate::types::Edge;

/// Node and link-endpoint labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLabel {
    /// A user owning aggregates.
    User,
    /// Universe aggregate root.
    Universe,
    /// Character template aggregate root.
    Character,
    /// Adventure aggregate root.
    Adventure,
    /// Lightweight story entity (link endpoint only).
    Entity,
}

impl NodeLabel {
    /// Label as stored.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Universe => "Universe",
            Self::Character => "Character",
            Self::Adventure => "Adventure",
            Self::Entity => "Entity",
        }
    }
}

/// Structural relationship types between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// `User -[CREATED]-> Universe|Character`.
    Created,
    /// `User -[PLAYS]-> Adventure`.
    Plays,
    /// `Adventure -[HAPPENS_IN]-> Universe`.
    HappensIn,
    /// `Adventure -[USES_TEMPLATE]-> Character`.
    UsesTemplate,
    /// `Universe -[CONTAINS]-> Entity`.
    Contains,
}

impl LinkKind {
    /// Relationship type as stored.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Plays => "PLAYS",
            Self::HappensIn => "HAPPENS_IN",
            Self::UsesTemplate => "USES_TEMPLATE",
            Self::Contains => "CONTAINS",
        }
    }
}

/// A node row as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNode {
    /// Node identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Universe scope, if any.
    pub universe_id: Option<String>,
    /// JSON-encoded properties.
    pub props: String,
}

/// One endpoint of a structural link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint<'a> {
    /// Endpoint label.
    pub label: NodeLabel,
    /// Endpoint identifier.
    pub id: &'a str,
}

impl<'a> Endpoint<'a> {
    /// Shorthand constructor.
    #[must_use]
    pub fn new(label: NodeLabel, id: &'a str) -> Self {
        Self { label, id }
    }
}

/// A relationship edge with its storage id, used for de-duplication.
#[derive(Debug, Clone)]
pub(crate) struct StoredEdge {
    pub rowid: i64,
    pub subject_id: i64,
    pub object_id: i64,
    pub edge: Edge,
}

/// One transaction over the graph.
pub struct GraphSession<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> GraphSession<'conn> {
    pub(crate) fn new(tx: Transaction<'conn>) -> Self {
        Self { tx }
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Aggregate / user nodes
    // ------------------------------------------------------------------

    /// Look up a node by label and id.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn node(&self, label: NodeLabel, id: &str) -> Result<Option<StoredNode>> {
        Ok(self
            .tx
            .query_row(
                "SELECT id, user_id, universe_id, props FROM nodes WHERE label = ?1 AND id = ?2",
                params![label.as_str(), id],
                row_to_node,
            )
            .optional()?)
    }

    /// Every node of `label` scoped to one universe of one user.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn nodes_in_universe(
        &self,
        label: NodeLabel,
        universe_id: &str,
        user_id: &str,
    ) -> Result<Vec<StoredNode>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT id, user_id, universe_id, props FROM nodes
             WHERE label = ?1 AND universe_id = ?2 AND user_id = ?3 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![label.as_str(), universe_id, user_id], row_to_node)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Create or update a node keyed by `(label, id)`. Scalar fields are
    /// last-write-wins.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn merge_node(
        &self,
        label: NodeLabel,
        id: &str,
        user_id: &str,
        universe_id: Option<&str>,
        props: &str,
    ) -> Result<()> {
        self.tx.execute(
            "INSERT INTO nodes (label, id, user_id, universe_id, props, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(label, id) DO UPDATE SET
                user_id = excluded.user_id,
                universe_id = excluded.universe_id,
                props = excluded.props,
                updated_at = excluded.updated_at",
            params![label.as_str(), id, user_id, universe_id, props, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Ensure the `User` node for `user_id` exists.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn merge_user(&self, user_id: &str) -> Result<()> {
        self.tx.execute(
            "INSERT INTO nodes (label, id, user_id, universe_id, props, updated_at)
             VALUES ('User', ?1, ?1, NULL, '{}', ?2)
             ON CONFLICT(label, id) DO NOTHING",
            params![user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove a node and every structural link touching it.
    ///
    /// Returns `true` if the node existed.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn detach_delete(&self, label: NodeLabel, id: &str) -> Result<bool> {
        self.delete_links_touching(Endpoint::new(label, id))?;
        let removed = self.tx.execute(
            "DELETE FROM nodes WHERE label = ?1 AND id = ?2",
            params![label.as_str(), id],
        )?;
        Ok(removed > 0)
    }

    // ------------------------------------------------------------------
    // Structural links
    // ------------------------------------------------------------------

    /// Create a structural link if it does not already exist.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn merge_link(&self, src: Endpoint<'_>, kind: LinkKind, dst: Endpoint<'_>) -> Result<()> {
        self.tx.execute(
            "INSERT INTO links (src_label, src_id, relation, dst_label, dst_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT DO NOTHING",
            params![src.label.as_str(), src.id, kind.as_str(), dst.label.as_str(), dst.id],
        )?;
        Ok(())
    }

    /// Remove one structural link. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn delete_link(&self, src: Endpoint<'_>, kind: LinkKind, dst: Endpoint<'_>) -> Result<bool> {
        let removed = self.tx.execute(
            "DELETE FROM links
             WHERE src_label = ?1 AND src_id = ?2 AND relation = ?3 AND dst_label = ?4 AND dst_id = ?5",
            params![src.label.as_str(), src.id, kind.as_str(), dst.label.as_str(), dst.id],
        )?;
        Ok(removed > 0)
    }

    /// Ids of every `dst_label` node that `src` links to by `kind`.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn targets_of(&self, src: Endpoint<'_>, kind: LinkKind, dst_label: NodeLabel) -> Result<Vec<String>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT dst_id FROM links
             WHERE src_label = ?1 AND src_id = ?2 AND relation = ?3 AND dst_label = ?4
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(
            params![src.label.as_str(), src.id, kind.as_str(), dst_label.as_str()],
            |row| row.get(0),
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Remove every `kind` link leaving `src`.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn delete_links_from(&self, src: Endpoint<'_>, kind: LinkKind) -> Result<usize> {
        Ok(self.tx.execute(
            "DELETE FROM links WHERE src_label = ?1 AND src_id = ?2 AND relation = ?3",
            params![src.label.as_str(), src.id, kind.as_str()],
        )?)
    }

    /// Nodes of `label` that `user_id` is linked to by `kind`, in creation order.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn linked_from_user(&self, user_id: &str, kind: LinkKind, label: NodeLabel) -> Result<Vec<StoredNode>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT n.id, n.user_id, n.universe_id, n.props
             FROM nodes n
             JOIN links l
               ON l.src_label = 'User' AND l.src_id = ?1 AND l.relation = ?2
              AND l.dst_label = n.label AND l.dst_id = n.id
             WHERE n.label = ?3 AND n.user_id = ?1
             ORDER BY n.rowid",
        )?;
        let rows = stmt.query_map(params![user_id, kind.as_str(), label.as_str()], row_to_node)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Remove every structural link with `endpoint` at either end.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn delete_links_touching(&self, endpoint: Endpoint<'_>) -> Result<usize> {
        let label = endpoint.label.as_str();
        let outgoing = self.tx.execute(
            "DELETE FROM links WHERE src_label = ?1 AND src_id = ?2",
            params![label, endpoint.id],
        )?;
        let incoming = self.tx.execute(
            "DELETE FROM links WHERE dst_label = ?1 AND dst_id = ?2",
            params![label, endpoint.id],
        )?;
        Ok(outgoing + incoming)
    }

    // ------------------------------------------------------------------
    // Entities and relationships
    // ------------------------------------------------------------------

    /// Create or find the entity keyed by `(name, universe_id, user_id)`.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn merge_entity(&self, name: &str, universe_id: &str, user_id: &str) -> Result<i64> {
        Ok(self.tx.query_row(
            "INSERT INTO entities (name, universe_id, user_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(name, universe_id, user_id) DO UPDATE SET name = excluded.name
             RETURNING id",
            params![name, universe_id, user_id],
            |row| row.get(0),
        )?)
    }

    /// Find an entity's storage id.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn entity_id(&self, name: &str, universe_id: &str, user_id: &str) -> Result<Option<i64>> {
        Ok(self
            .tx
            .query_row(
                "SELECT id FROM entities WHERE name = ?1 AND universe_id = ?2 AND user_id = ?3",
                params![name, universe_id, user_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Create or update the relationship `(subject, relation, object)`.
    /// Properties are replaced on re-merge.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn merge_relationship(
        &self,
        subject_id: i64,
        relation: &str,
        object_id: i64,
        properties: &str,
    ) -> Result<()> {
        self.tx.execute(
            "INSERT INTO relationships (subject_id, relation, object_id, properties)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(subject_id, relation, object_id) DO UPDATE SET
                properties = excluded.properties",
            params![subject_id, relation, object_id, properties],
        )?;
        Ok(())
    }

    /// Relationship edges with `entity_id` at either end, oldest first.
    pub(crate) fn edges_touching(&self, entity_id: i64, limit: usize) -> Result<Vec<StoredEdge>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT r.id, r.subject_id, r.object_id, s.name, r.relation, o.name, r.properties
             FROM relationships r
             JOIN entities s ON s.id = r.subject_id
             JOIN entities o ON o.id = r.object_id
             WHERE r.subject_id = ?1 OR r.object_id = ?1
             ORDER BY r.id
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![entity_id, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in rows {
            let (rowid, subject_id, object_id, subject, relation, object, properties) = row?;
            edges.push(StoredEdge {
                rowid,
                subject_id,
                object_id,
                edge: Edge {
                    subject,
                    relation,
                    object,
                    properties: serde_json::from_str(&properties)?,
                },
            });
        }
        Ok(edges)
    }

    /// Remove every entity of one universe (relationships cascade) and the
    /// universe's `CONTAINS` links. Returns the number of entities removed.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn delete_universe_entities(&self, universe_id: &str, user_id: &str) -> Result<usize> {
        self.tx.execute(
            "DELETE FROM links WHERE src_label = 'Universe' AND src_id = ?1 AND relation = 'CONTAINS'",
            params![universe_id],
        )?;
        Ok(self.tx.execute(
            "DELETE FROM entities WHERE universe_id = ?1 AND user_id = ?2",
            params![universe_id, user_id],
        )?)
    }

    pub(crate) fn raw(&self) -> &Transaction<'conn> {
        &self.tx
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredNode> {
    Ok(StoredNode {
        id: row.get(0)?,
        user_id: row.get(1)?,
        universe_id: row.get(2)?,
        props: row.get(3)?,
    })
}
