//! Context Ingestion Pipeline.
//!
//! Narrative extraction produces `{source, relation, target}` triples. This
//! module maps them into the graph's `{subject, relation, object}` vocabulary
//! and hands the whole set to [`GraphStore::merge_edges`] as one batch.

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::Result;
use crate::graph::GraphStore;
use crate::types::{ContextTriple, EdgeInput, Properties};

/// Routes extracted relation triples into the knowledge graph.
#[derive(Debug, Clone)]
pub struct ContextIngestor {
    graph: Arc<GraphStore>,
}

impl ContextIngestor {
    /// Create an ingestor writing to `graph`.
    #[must_use]
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph }
    }

    /// Translate triples into edge inputs with empty properties.
    #[must_use]
    pub fn to_edges(triples: &[ContextTriple]) -> Vec<EdgeInput> {
        triples
            .iter()
            .map(|triple| {
                EdgeInput::new(triple.source.as_str(), triple.relation.as_str(), triple.target.as_str())
                    .with_properties(Properties::new())
            })
            .collect()
    }

    /// Ingest `triples` into one universe of one user as a single batch.
    ///
    /// Returns the number of edges merged. There is no retry: a failure is
    /// logged and handed back unchanged.
    ///
    /// # Errors
    ///
    /// Whatever [`GraphStore::merge_edges`] returns.
    pub fn ingest_context(&self, triples: &[ContextTriple], universe_id: &str, user_id: &str) -> Result<usize> {
        if triples.is_empty() {
            debug!(universe = %universe_id, "No context triples to ingest");
            return Ok(0);
        }

        let edges = Self::to_edges(triples);
        self.graph
            .merge_edges(&edges, universe_id, user_id)
            .inspect_err(|err| {
                error!(
                    universe = %universe_id,
                    user = %user_id,
                    triples = triples.len(),
                    error = %err,
                    "Context ingestion failed"
                );
            })
    }
}
