//! Core type definitions shared by the vector and graph stores.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Unique identifier for a stored memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new random memory ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dense embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Number of dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector has no dimensions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Graph edges
// ---------------------------------------------------------------------------

/// Freeform property map attached to relationship edges.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// One edge submitted to [`GraphStore::merge_edges`](crate::graph::GraphStore::merge_edges).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeInput {
    /// Source entity name.
    pub subject: String,
    /// Dynamic relationship type.
    pub relation: String,
    /// Target entity name.
    pub object: String,
    /// Optional properties; absent means empty.
    #[serde(default)]
    pub properties: Option<Properties>,
}

impl EdgeInput {
    /// An edge without properties.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
            properties: None,
        }
    }

    /// Attach properties.
    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// A stored relationship edge as returned by neighbor queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source entity name.
    pub subject: String,
    /// Relationship type.
    pub relation: String,
    /// Target entity name.
    pub object: String,
    /// Edge properties (never absent).
    pub properties: Properties,
}

impl Edge {
    /// Whether the edge has `entity` at either end.
    #[must_use]
    pub fn touches(&self, entity: &str) -> bool {
        self.subject == entity || self.object == entity
    }
}

/// A relation triple produced by narrative extraction, in source/target vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTriple {
    /// Entity the relation starts from.
    pub source: String,
    /// Relationship type.
    pub relation: String,
    /// Entity the relation points to.
    pub target: String,
}

impl ContextTriple {
    /// Construct a triple.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            relation: relation.into(),
            target: target.into(),
        }
    }
}
