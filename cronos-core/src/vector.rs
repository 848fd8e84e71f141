//! Vector Memory Store: episodic narration recalled by meaning.
//!
//! Records are `(id, vector, text, metadata)` rows in a single SQLite table
//! named after the configured collection:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS <collection> (
//!     seq         INTEGER PRIMARY KEY,   -- insertion order, used for tie-breaks
//!     id          TEXT NOT NULL UNIQUE,
//!     user_id     TEXT NOT NULL,
//!     universe_id TEXT,
//!     text        TEXT NOT NULL,
//!     embedding   BLOB NOT NULL,         -- bincode Vec<f32>
//!     metadata    TEXT NOT NULL,         -- JSON object, verbatim
//!     created_at  TEXT NOT NULL
//! );
//! ```
//!
//! Records are immutable once written. Ingestion fails loudly; search never
//! does, it returns an empty list and logs why.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{VectorConfig, is_identifier};
use crate::embedding::{EmbeddingProvider, EmbeddingRole, RolePrefixes, cosine_similarity, embed_with_role};
use crate::error::{CronosError, ReadOutcome, Result};
use crate::sqlite::{OpenOptions, StoreHandle, classify, open_connection};
use crate::types::{Embedding, MemoryId, Properties};

/// Metadata key carrying the owning user.
pub const USER_ID_KEY: &str = "userId";
/// Metadata key carrying the universe.
pub const UNIVERSE_ID_KEY: &str = "universeId";

/// A stored memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    /// Record identifier.
    pub id: MemoryId,
    /// Document embedding (framed as a document).
    pub vector: Embedding,
    /// Original, unframed text.
    pub text: String,
    /// Tenant tags plus any caller tags, as ingested.
    pub metadata: Properties,
}

/// A search hit with its score.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    /// The matching record.
    pub record: MemoryRecord,
    /// Cosine similarity against the framed query.
    pub similarity: f32,
}

/// Conjunctive tenant filter for [`VectorMemoryStore::search`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    /// Required owning user.
    pub user_id: String,
    /// Universe restriction, when given.
    pub universe_id: Option<String>,
    /// Extra metadata equality constraints, all of which must hold.
    pub tags: Properties,
}

impl SearchFilter {
    /// Filter on a user and universe.
    #[must_use]
    pub fn tenant(user_id: impl Into<String>, universe_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            universe_id: Some(universe_id.into()),
            tags: Properties::new(),
        }
    }

    /// Filter on a user across all universes.
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Add a metadata equality constraint.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: Value) -> Self {
        self.tags.insert(key.into(), value);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(CronosError::Validation("filter requires a userId".into()));
        }
        if self.universe_id.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(CronosError::Validation("filter universeId is empty".into()));
        }
        Ok(())
    }

    fn matches_tags(&self, metadata: &Properties) -> bool {
        self.tags.iter().all(|(key, value)| metadata.get(key) == Some(value))
    }
}

/// Persistent, tenant-filtered similarity store.
pub struct VectorMemoryStore {
    handle: StoreHandle,
    provider: Arc<dyn EmbeddingProvider>,
    prefixes: RolePrefixes,
    collection: String,
    max_results: usize,
}

impl std::fmt::Debug for VectorMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorMemoryStore")
            .field("collection", &self.collection)
            .field("model", &self.provider.model_name())
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl VectorMemoryStore {
    /// Open the collection described by `config`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::Config`] for an invalid collection name, or
    /// [`CronosError::Database`] if the database cannot be opened.
    pub fn open(
        config: &VectorConfig,
        provider: Arc<dyn EmbeddingProvider>,
        prefixes: RolePrefixes,
    ) -> Result<Self> {
        if !is_identifier(&config.collection) {
            return Err(CronosError::Config(format!(
                "invalid collection name `{}`",
                config.collection
            )));
        }
        let conn = open_connection(
            &config.path,
            OpenOptions {
                busy_timeout_ms: config.busy_timeout_ms,
                wal_mode: true,
            },
        )?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                seq         INTEGER PRIMARY KEY,
                id          TEXT NOT NULL UNIQUE,
                user_id     TEXT NOT NULL,
                universe_id TEXT,
                text        TEXT NOT NULL,
                embedding   BLOB NOT NULL,
                metadata    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {table}_tenant ON {table} (user_id, universe_id);",
            table = config.collection
        ))?;

        info!(
            path = %config.path,
            collection = %config.collection,
            model = provider.model_name(),
            "Vector memory store opened"
        );

        Ok(Self {
            handle: StoreHandle::connected("vector", conn),
            provider,
            prefixes,
            collection: config.collection.clone(),
            max_results: config.max_results,
        })
    }

    /// Open the collection, or fall back to a not-connected store.
    ///
    /// A not-connected store answers searches with empty results and rejects
    /// ingestion with [`CronosError::NotConnected`].
    #[must_use]
    pub fn connect(config: &VectorConfig, provider: Arc<dyn EmbeddingProvider>, prefixes: RolePrefixes) -> Self {
        match Self::open(config, Arc::clone(&provider), prefixes.clone()) {
            Ok(store) => store,
            Err(err) => {
                warn!(path = %config.path, error = %err, "Could not open vector memory store");
                Self {
                    handle: StoreHandle::disconnected("vector"),
                    provider,
                    prefixes,
                    collection: config.collection.clone(),
                    max_results: config.max_results,
                }
            }
        }
    }

    /// Persist `text` as a new memory and return its id.
    ///
    /// `metadata` must carry a non-empty string `userId`; `universeId`, when
    /// present, must be a string. All other tags are stored verbatim.
    ///
    /// # Errors
    ///
    /// [`CronosError::Validation`] for empty text or missing tenant tags,
    /// [`CronosError::StoreUnavailable`] / [`CronosError::NotConnected`] when
    /// the embedding provider or the index cannot serve the write.
    pub fn ingest(&self, text: &str, metadata: Properties) -> Result<MemoryId> {
        let start = Instant::now();
        if text.trim().is_empty() {
            return Err(CronosError::Validation("memory text is empty".into()));
        }
        let (user_id, universe_id) = tenant_tags(&metadata)?;

        let embedding = embed_with_role(
            self.provider.as_ref(),
            &self.prefixes,
            text,
            EmbeddingRole::Document,
        )?;
        let id = MemoryId::new();
        let blob = bincode::serialize(&embedding.0)?;
        let metadata_json = serde_json::to_string(&metadata)?;

        self.handle
            .with_conn(|conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO {} (id, user_id, universe_id, text, embedding, metadata, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        self.collection
                    ),
                    params![
                        id.to_string(),
                        user_id,
                        universe_id,
                        text,
                        blob,
                        metadata_json,
                        Utc::now().to_rfc3339()
                    ],
                )?;
                Ok(())
            })
            .map_err(classify)?;

        let preview: String = text.chars().take(30).collect();
        info!(
            memory = %id,
            user = %user_id,
            universe = universe_id.as_deref().unwrap_or("-"),
            elapsed_us = start.elapsed().as_micros(),
            "Ingested memory: {preview}..."
        );
        Ok(id)
    }

    /// Up to `k` stored texts most similar to `query`, within `filter`.
    ///
    /// Never fails: any internal error yields an empty list.
    #[must_use]
    pub fn search(&self, query: &str, filter: &SearchFilter, k: usize) -> Vec<String> {
        match self.try_search(query, filter, k) {
            ReadOutcome::Ok(hits) => hits.into_iter().map(|hit| hit.record.text).collect(),
            ReadOutcome::NotConnected => {
                warn!("Vector search skipped: store not connected");
                Vec::new()
            }
            ReadOutcome::Failed(err) => {
                warn!(error = %err, "Vector search failed, returning no memories");
                Vec::new()
            }
        }
    }

    /// Scored search that reports failures instead of hiding them.
    ///
    /// Ranking is descending cosine similarity; equal scores keep insertion
    /// order. `k` is clamped to the configured maximum.
    pub fn try_search(&self, query: &str, filter: &SearchFilter, k: usize) -> ReadOutcome<Vec<ScoredMemory>> {
        self.search_inner(query, filter, k).into()
    }

    fn search_inner(&self, query: &str, filter: &SearchFilter, k: usize) -> Result<Vec<ScoredMemory>> {
        let start = Instant::now();
        filter.validate()?;
        let k = k.min(self.max_results);
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding =
            embed_with_role(self.provider.as_ref(), &self.prefixes, query, EmbeddingRole::Query)?;
        let candidates = self.handle.with_conn(|conn| self.load_tenant(conn, filter))?;

        let mut scored: Vec<ScoredMemory> = candidates
            .into_iter()
            .filter(|record| filter.matches_tags(&record.metadata))
            .map(|record| ScoredMemory {
                similarity: cosine_similarity(&query_embedding, &record.vector),
                record,
            })
            .collect();

        // `sort_by` is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        debug!(
            user = %filter.user_id,
            universe = filter.universe_id.as_deref().unwrap_or("-"),
            results = scored.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Vector search for '{query}'"
        );
        Ok(scored)
    }

    fn load_tenant(&self, conn: &rusqlite::Connection, filter: &SearchFilter) -> Result<Vec<MemoryRecord>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT id, text, embedding, metadata FROM {}
             WHERE user_id = ?1 AND (?2 IS NULL OR universe_id = ?2)
             ORDER BY seq",
            self.collection
        ))?;
        let rows = stmt.query_map(params![filter.user_id, filter.universe_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, text, blob, metadata) = row?;
            records.push(decode_record(&id, text, &blob, &metadata)?);
        }
        Ok(records)
    }

    /// Fetch one record by id.
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::NotConnected`] or a database error.
    pub fn get(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        self.handle.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT id, text, embedding, metadata FROM {} WHERE id = ?1",
                        self.collection
                    ),
                    params![id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;
            row.map(|(id, text, blob, metadata)| decode_record(&id, text, &blob, &metadata))
                .transpose()
        })
    }

    /// Number of records visible through `filter` (tags ignored).
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::NotConnected`] or a database error.
    pub fn count(&self, filter: &SearchFilter) -> Result<usize> {
        filter.validate()?;
        self.handle.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE user_id = ?1 AND (?2 IS NULL OR universe_id = ?2)",
                    self.collection
                ),
                params![filter.user_id, filter.universe_id],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
    }

    /// Remove every memory of one universe. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::NotConnected`] or a database error.
    pub fn delete_universe(&self, user_id: &str, universe_id: &str) -> Result<usize> {
        let removed = self.handle.with_conn(|conn| {
            Ok(conn.execute(
                &format!(
                    "DELETE FROM {} WHERE user_id = ?1 AND universe_id = ?2",
                    self.collection
                ),
                params![user_id, universe_id],
            )?)
        })?;
        info!(user = %user_id, universe = %universe_id, removed, "Deleted universe memories");
        Ok(removed)
    }

    /// Whether the index connection is held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Release the index connection.
    pub fn close(&self) {
        self.handle.close();
    }
}

fn tenant_tags(metadata: &Properties) -> Result<(String, Option<String>)> {
    let user_id = match metadata.get(USER_ID_KEY) {
        Some(Value::String(user)) if !user.trim().is_empty() => user.clone(),
        _ => {
            return Err(CronosError::Validation(
                "metadata requires a non-empty string `userId`".into(),
            ));
        }
    };
    let universe_id = match metadata.get(UNIVERSE_ID_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::String(universe)) if !universe.trim().is_empty() => Some(universe.clone()),
        Some(_) => {
            return Err(CronosError::Validation(
                "metadata `universeId` must be a non-empty string".into(),
            ));
        }
    };
    Ok((user_id, universe_id))
}

fn decode_record(id: &str, text: String, blob: &[u8], metadata: &str) -> Result<MemoryRecord> {
    let uuid = uuid::Uuid::parse_str(id).map_err(|e| CronosError::Serialization(e.to_string()))?;
    let vector: Vec<f32> = bincode::deserialize(blob)?;
    let metadata: Properties = serde_json::from_str(metadata)?;
    Ok(MemoryRecord {
        id: MemoryId(uuid),
        vector: Embedding(vector),
        text,
        metadata,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IN_MEMORY;
    use crate::embedding::{HashingEmbeddingProvider, StubEmbeddingProvider, UnavailableEmbeddingProvider};
    use serde_json::json;

    fn store_with(provider: Arc<dyn EmbeddingProvider>) -> VectorMemoryStore {
        let config = VectorConfig {
            path: IN_MEMORY.to_string(),
            ..VectorConfig::default()
        };
        VectorMemoryStore::open(&config, provider, RolePrefixes::default()).expect("open")
    }

    fn store() -> VectorMemoryStore {
        store_with(Arc::new(HashingEmbeddingProvider::default()))
    }

    fn tags(user: &str, universe: &str) -> Properties {
        let Value::Object(map) = json!({ "userId": user, "universeId": universe }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn round_trip_recall() {
        let store = store();
        store.ingest("The dragon guards the castle", tags("u1", "w1")).expect("ingest");
        store.ingest("A merchant sells apples at dawn", tags("u1", "w1")).expect("ingest");

        let hits = store.search("who guards the castle", &SearchFilter::tenant("u1", "w1"), 3);
        assert_eq!(hits.first().map(String::as_str), Some("The dragon guards the castle"));
    }

    #[test]
    fn empty_text_is_rejected() {
        let store = store();
        let err = store.ingest("   ", tags("u1", "w1")).expect_err("reject");
        assert!(matches!(err, CronosError::Validation(_)));
        assert_eq!(store.count(&SearchFilter::user("u1")).expect("count"), 0);
    }

    #[test]
    fn missing_user_tag_is_rejected() {
        let store = store();
        let err = store.ingest("hello", Properties::new()).expect_err("reject");
        assert!(matches!(err, CronosError::Validation(_)));
    }

    #[test]
    fn unavailable_provider_fails_ingest_but_not_search() {
        let store = store_with(Arc::new(UnavailableEmbeddingProvider));
        let err = store.ingest("hello", tags("u1", "w1")).expect_err("fail");
        assert!(err.is_unavailable());
        assert!(store.search("hello", &SearchFilter::tenant("u1", "w1"), 3).is_empty());
    }

    #[test]
    fn tenants_are_isolated() {
        let store = store();
        store.ingest("The dragon guards the castle", tags("u2", "w1")).expect("ingest");
        store.ingest("Rain falls over the harbor", tags("u1", "w1")).expect("ingest");

        let hits = store.search("The dragon guards the castle", &SearchFilter::tenant("u1", "w1"), 5);
        assert_eq!(hits, vec!["Rain falls over the harbor".to_string()]);
    }

    #[test]
    fn universe_filter_is_conjunctive() {
        let store = store();
        store.ingest("castle in the north", tags("u1", "w1")).expect("ingest");
        store.ingest("castle in the south", tags("u1", "w2")).expect("ingest");

        let w2 = store.search("castle", &SearchFilter::tenant("u1", "w2"), 5);
        assert_eq!(w2, vec!["castle in the south".to_string()]);
        let all = store.search("castle", &SearchFilter::user("u1"), 5);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let store = store_with(Arc::new(StubEmbeddingProvider::new(8)));
        for text in ["first", "second", "third", "fourth"] {
            store.ingest(text, tags("u1", "w1")).expect("ingest");
        }
        let hits = store.search("anything", &SearchFilter::tenant("u1", "w1"), 3);
        assert_eq!(hits, vec!["first", "second", "third"]);
    }

    #[test]
    fn malformed_filter_returns_empty() {
        let store = store();
        store.ingest("hello there", tags("u1", "w1")).expect("ingest");
        assert!(store.search("hello", &SearchFilter::user(""), 3).is_empty());
        assert!(matches!(
            store.try_search("hello", &SearchFilter::user(""), 3),
            ReadOutcome::Failed(CronosError::Validation(_))
        ));
    }

    #[test]
    fn zero_k_returns_empty() {
        let store = store();
        store.ingest("hello there", tags("u1", "w1")).expect("ingest");
        assert!(store.search("hello", &SearchFilter::tenant("u1", "w1"), 0).is_empty());
    }

    #[test]
    fn extra_tags_filter_results() {
        let store = store();
        let mut scene = tags("u1", "w1");
        scene.insert("scene".into(), json!("tavern"));
        store.ingest("The bard sings in the tavern", scene).expect("ingest");
        store.ingest("The bard sleeps by the road", tags("u1", "w1")).expect("ingest");

        let filter = SearchFilter::tenant("u1", "w1").with_tag("scene", json!("tavern"));
        assert_eq!(
            store.search("bard", &filter, 5),
            vec!["The bard sings in the tavern".to_string()]
        );
    }

    #[test]
    fn record_is_retrievable_with_metadata() {
        let store = store();
        let id = store.ingest("The dragon sleeps", tags("u1", "w1")).expect("ingest");
        let record = store.get(id).expect("get").expect("present");
        assert_eq!(record.text, "The dragon sleeps");
        assert_eq!(record.metadata.get(USER_ID_KEY), Some(&json!("u1")));
        assert_eq!(record.vector.len(), 384);
    }

    #[test]
    fn closed_store_degrades_reads_and_fails_writes() {
        let store = store();
        store.ingest("hello there", tags("u1", "w1")).expect("ingest");
        store.close();
        assert!(store.search("hello", &SearchFilter::tenant("u1", "w1"), 3).is_empty());
        let err = store.ingest("again", tags("u1", "w1")).expect_err("closed");
        assert!(matches!(err, CronosError::NotConnected("vector")));
    }

    #[test]
    fn delete_universe_only_touches_that_universe() {
        let store = store();
        store.ingest("one", tags("u1", "w1")).expect("ingest");
        store.ingest("two", tags("u1", "w2")).expect("ingest");
        assert_eq!(store.delete_universe("u1", "w1").expect("delete"), 1);
        assert_eq!(store.count(&SearchFilter::user("u1")).expect("count"), 1);
    }
}
