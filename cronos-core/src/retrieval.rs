//! Retrieval Façade: one grounding answer from both stores.
//!
//! Vector recall and graph traversal are queried independently and their
//! results returned side by side. Neither store calls the other, and a
//! failure or timeout in one only empties that half of the answer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::graph::GraphStore;
use crate::types::Edge;
use crate::vector::{SearchFilter, VectorMemoryStore};

/// What a caller wants grounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingRequest {
    /// Free-text query for vector recall.
    pub query: String,
    /// Tenant user.
    pub user_id: String,
    /// Tenant universe. Without one, no graph edges are fetched.
    #[serde(default)]
    pub universe_id: Option<String>,
    /// Entities whose neighborhoods should be included.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Documents wanted; the configured default when absent.
    #[serde(default, rename = "n_results")]
    pub n_results: Option<usize>,
    /// Traversal depth for each entity.
    #[serde(default = "default_depth")]
    pub depth: u32,
}

fn default_depth() -> u32 {
    1
}

impl GroundingRequest {
    /// A request for `query` in one tenant scope.
    #[must_use]
    pub fn new(query: impl Into<String>, user_id: impl Into<String>, universe_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
            universe_id: Some(universe_id.into()),
            entities: Vec::new(),
            n_results: None,
            depth: default_depth(),
        }
    }

    /// Also fetch the neighborhood of `entity`.
    #[must_use]
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entities.push(entity.into());
        self
    }

    /// Ask for `n` documents.
    #[must_use]
    pub fn with_results(mut self, n: usize) -> Self {
        self.n_results = Some(n);
        self
    }
}

/// The union of vector recall and graph edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingContext {
    /// Recalled memory texts, most similar first.
    pub documents: Vec<String>,
    /// Relationship edges around the requested entities, de-duplicated.
    pub edges: Vec<Edge>,
}

impl GroundingContext {
    /// Whether neither store contributed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.edges.is_empty()
    }
}

/// Composes vector recall and graph traversal.
#[derive(Debug, Clone)]
pub struct RetrievalFacade {
    vector: Arc<VectorMemoryStore>,
    graph: Arc<GraphStore>,
    timeout: Duration,
    default_results: usize,
}

impl RetrievalFacade {
    /// Create a façade over both stores.
    #[must_use]
    pub fn new(vector: Arc<VectorMemoryStore>, graph: Arc<GraphStore>, config: &RetrievalConfig) -> Self {
        Self {
            vector,
            graph,
            timeout: Duration::from_millis(config.timeout_ms),
            default_results: config.default_results,
        }
    }

    /// Ground `request`, querying both stores concurrently on the blocking
    /// pool. Each store call is bounded by the configured timeout; a timeout
    /// counts as that store being unavailable.
    pub async fn ground(&self, request: GroundingRequest) -> GroundingContext {
        let start = Instant::now();
        let request = Arc::new(request);

        let documents = {
            let vector = Arc::clone(&self.vector);
            let request = Arc::clone(&request);
            let k = request.n_results.unwrap_or(self.default_results);
            bounded(self.timeout, "vector", move || recall(&vector, &request, k))
        };
        let edges = {
            let graph = Arc::clone(&self.graph);
            let request = Arc::clone(&request);
            bounded(self.timeout, "graph", move || neighborhoods(&graph, &request))
        };
        let (documents, edges) = tokio::join!(documents, edges);

        debug!(
            user = %request.user_id,
            documents = documents.len(),
            edges = edges.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Grounding context assembled"
        );
        GroundingContext { documents, edges }
    }

    /// Blocking twin of [`ground`](Self::ground) for synchronous callers.
    /// Store calls run one after the other without a timeout beyond the
    /// stores' own busy limits.
    #[must_use]
    pub fn ground_blocking(&self, request: &GroundingRequest) -> GroundingContext {
        let k = request.n_results.unwrap_or(self.default_results);
        GroundingContext {
            documents: recall(&self.vector, request, k),
            edges: neighborhoods(&self.graph, request),
        }
    }
}

async fn bounded<T, F>(timeout: Duration, store: &'static str, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: FnOnce() -> Vec<T> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(items)) => items,
        Ok(Err(err)) => {
            warn!(store, error = %err, "Store read task failed");
            Vec::new()
        }
        Err(_) => {
            warn!(store, timeout_ms = timeout.as_millis(), "Store read timed out");
            Vec::new()
        }
    }
}

fn recall(vector: &VectorMemoryStore, request: &GroundingRequest, k: usize) -> Vec<String> {
    let filter = match &request.universe_id {
        Some(universe) => SearchFilter::tenant(request.user_id.as_str(), universe.as_str()),
        None => SearchFilter::user(request.user_id.as_str()),
    };
    vector.search(&request.query, &filter, k)
}

fn neighborhoods(graph: &GraphStore, request: &GroundingRequest) -> Vec<Edge> {
    let Some(universe) = request.universe_id.as_deref() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    for entity in &request.entities {
        for edge in graph.query_neighbors(entity, universe, &request.user_id, request.depth, None) {
            let key = (edge.subject.clone(), edge.relation.clone(), edge.object.clone());
            if seen.insert(key) {
                edges.push(edge);
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphConfig, IN_MEMORY, VectorConfig};
    use crate::embedding::{EmbeddingProvider, HashingEmbeddingProvider, RolePrefixes};
    use crate::error::Result;
    use crate::graph::NodeLabel;
    use crate::types::{EdgeInput, Embedding, Properties};
    use serde_json::{Value, json};

    /// Hashing embeddings, but queries take `delay` to embed.
    struct SlowQueries {
        inner: HashingEmbeddingProvider,
        delay: Duration,
    }

    impl EmbeddingProvider for SlowQueries {
        fn embed(&self, text: &str) -> Result<Embedding> {
            if text.starts_with("query: ") {
                std::thread::sleep(self.delay);
            }
            self.inner.embed(text)
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn model_name(&self) -> &str {
            "slow-queries"
        }
    }

    fn stores() -> (Arc<VectorMemoryStore>, Arc<GraphStore>) {
        stores_with(Arc::new(HashingEmbeddingProvider::default()))
    }

    fn stores_with(provider: Arc<dyn EmbeddingProvider>) -> (Arc<VectorMemoryStore>, Arc<GraphStore>) {
        let vector = VectorMemoryStore::open(
            &VectorConfig {
                path: IN_MEMORY.to_string(),
                ..VectorConfig::default()
            },
            provider,
            RolePrefixes::default(),
        )
        .expect("vector");
        let graph = GraphStore::open(&GraphConfig {
            path: IN_MEMORY.to_string(),
            ..GraphConfig::default()
        })
        .expect("graph");
        graph
            .session(|s| s.merge_node(NodeLabel::Universe, "w1", "u1", None, "{}"))
            .expect("universe");
        (Arc::new(vector), Arc::new(graph))
    }

    fn metadata(user: &str, universe: &str) -> Properties {
        let Value::Object(map) = json!({"userId": user, "universeId": universe}) else {
            unreachable!()
        };
        map
    }

    fn seeded() -> RetrievalFacade {
        seeded_with(stores(), &RetrievalConfig::default())
    }

    fn seeded_with(
        (vector, graph): (Arc<VectorMemoryStore>, Arc<GraphStore>),
        config: &RetrievalConfig,
    ) -> RetrievalFacade {
        vector
            .ingest("The dragon guards the castle", metadata("u1", "w1"))
            .expect("ingest");
        graph
            .merge_edges(
                &[
                    EdgeInput::new("Dragon", "GUARDS", "Castle"),
                    EdgeInput::new("Knight", "FEARS", "Dragon"),
                ],
                "w1",
                "u1",
            )
            .expect("edges");
        RetrievalFacade::new(vector, graph, config)
    }

    #[tokio::test]
    async fn grounding_combines_both_stores() {
        let facade = seeded();
        let context = facade
            .ground(
                GroundingRequest::new("who guards the castle", "u1", "w1")
                    .with_entity("Dragon")
                    .with_entity("Castle"),
            )
            .await;
        assert_eq!(context.documents, vec!["The dragon guards the castle".to_string()]);
        // GUARDS touches both entities but is reported once.
        assert_eq!(context.edges.len(), 2);
    }

    #[tokio::test]
    async fn other_tenant_gets_nothing() {
        let facade = seeded();
        let context = facade
            .ground(GroundingRequest::new("who guards the castle", "u2", "w1").with_entity("Dragon"))
            .await;
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn disconnected_graph_only_empties_edges() {
        let facade = seeded();
        facade.graph.close();
        let context = facade
            .ground(GroundingRequest::new("dragon castle", "u1", "w1").with_entity("Dragon"))
            .await;
        assert_eq!(context.documents.len(), 1);
        assert!(context.edges.is_empty());
    }

    #[tokio::test]
    async fn slow_store_times_out_as_unavailable() {
        let provider = Arc::new(SlowQueries {
            inner: HashingEmbeddingProvider::default(),
            delay: Duration::from_millis(400),
        });
        let config = RetrievalConfig {
            timeout_ms: 50,
            ..RetrievalConfig::default()
        };
        let facade = seeded_with(stores_with(provider), &config);

        let started = Instant::now();
        let context = facade
            .ground(GroundingRequest::new("who guards the castle", "u1", "w1").with_entity("Dragon"))
            .await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(context.documents.is_empty());
        assert_eq!(context.edges.len(), 2);
    }

    #[test]
    fn request_uses_camel_case_fields() {
        let request: GroundingRequest = serde_json::from_value(json!({
            "query": "dragon",
            "userId": "u1",
            "universeId": "w1",
            "entities": ["Dragon"],
            "n_results": 2
        }))
        .expect("parse");
        assert_eq!(request.universe_id.as_deref(), Some("w1"));
        assert_eq!(request.n_results, Some(2));
        assert_eq!(request.depth, 1);

        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["userId"], json!("u1"));
        assert!(value.get("user_id").is_none());
    }

    #[test]
    fn blocking_variant_matches() {
        let facade = seeded();
        let request = GroundingRequest::new("dragon castle", "u1", "w1")
            .with_entity("Knight")
            .with_results(1);
        let context = facade.ground_blocking(&request);
        assert_eq!(context.documents.len(), 1);
        assert_eq!(context.edges.len(), 1);
        assert_eq!(context.edges[0].relation, "FEARS");
    }

    #[test]
    fn no_universe_means_no_edges() {
        let facade = seeded();
        let mut request = GroundingRequest::new("dragon", "u1", "w1").with_entity("Dragon");
        request.universe_id = None;
        let context = facade.ground_blocking(&request);
        assert!(context.edges.is_empty());
        assert_eq!(context.documents.len(), 1);
    }
}
