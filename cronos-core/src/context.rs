//! The memory context: every store handle and component, built once.
//!
//! A process calls [`MemoryContext::init`] (or
//! [`MemoryContext::with_provider`]) during startup, passes the context or
//! its parts to whoever needs them, and calls [`MemoryContext::shutdown`]
//! on the way out.

use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::CatalogManager;
use crate::config::{CronosConfig, EmbeddingBackend};
use crate::embedding::{EmbeddingProvider, HashingEmbeddingProvider, RolePrefixes, StubEmbeddingProvider};
use crate::error::{CronosError, Result};
use crate::graph::GraphStore;
use crate::ingestion::ContextIngestor;
use crate::retrieval::RetrievalFacade;
use crate::state::WorldStateStore;
use crate::vector::VectorMemoryStore;

/// All store handles and the components built on them.
#[derive(Debug)]
pub struct MemoryContext {
    vector: Arc<VectorMemoryStore>,
    graph: Arc<GraphStore>,
    state: WorldStateStore,
    catalog: CatalogManager,
    ingestor: ContextIngestor,
    retrieval: RetrievalFacade,
}

impl MemoryContext {
    /// Build the context with the in-process embedding provider named by
    /// `config.embedding.provider`.
    ///
    /// # Errors
    ///
    /// [`CronosError::Config`] for a network provider (inject those with
    /// [`with_provider`](Self::with_provider)) or an invalid config; a
    /// database error if the world state store cannot be opened.
    pub fn init(config: &CronosConfig) -> Result<Self> {
        let dims = config.embedding.dimensions();
        let provider: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
            EmbeddingBackend::Hashing => Arc::new(HashingEmbeddingProvider::new(dims)),
            EmbeddingBackend::Stub => Arc::new(StubEmbeddingProvider::new(dims)),
            EmbeddingBackend::Ollama | EmbeddingBackend::OpenAi => {
                return Err(CronosError::Config(format!(
                    "embedding provider {:?} must be supplied by the caller",
                    config.embedding.provider
                )));
            }
        };
        Self::with_provider(config, provider)
    }

    /// Build the context around an already constructed embedding provider.
    ///
    /// The vector and graph stores start not-connected if their databases
    /// cannot be opened; reads then come back empty and writes fail with
    /// [`CronosError::NotConnected`].
    ///
    /// # Errors
    ///
    /// [`CronosError::Config`] for an invalid config; a database error if
    /// the world state store cannot be opened.
    pub fn with_provider(config: &CronosConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        let model = provider.model_name().to_string();

        let vector = Arc::new(VectorMemoryStore::connect(
            &config.vector,
            provider,
            RolePrefixes::from(&config.embedding),
        ));
        let graph = Arc::new(GraphStore::connect(&config.graph));
        let state = WorldStateStore::open(&config.state)?;

        let catalog = CatalogManager::new(Arc::clone(&graph)).with_vector_store(Arc::clone(&vector));
        let ingestor = ContextIngestor::new(Arc::clone(&graph));
        let retrieval = RetrievalFacade::new(Arc::clone(&vector), Arc::clone(&graph), &config.retrieval);

        if !graph.is_connected() || !vector.is_connected() {
            warn!(
                graph = graph.is_connected(),
                vector = vector.is_connected(),
                "Memory context started with stores offline"
            );
        }
        info!(model = %model, "Memory context initialised");

        Ok(Self {
            vector,
            graph,
            state,
            catalog,
            ingestor,
            retrieval,
        })
    }

    /// Vector memory store.
    #[must_use]
    pub fn vector(&self) -> &Arc<VectorMemoryStore> {
        &self.vector
    }

    /// Knowledge graph store.
    #[must_use]
    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    /// World state store.
    #[must_use]
    pub fn state(&self) -> &WorldStateStore {
        &self.state
    }

    /// Catalog manager.
    #[must_use]
    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    /// Context ingestion pipeline.
    #[must_use]
    pub fn ingestor(&self) -> &ContextIngestor {
        &self.ingestor
    }

    /// Retrieval façade.
    #[must_use]
    pub fn retrieval(&self) -> &RetrievalFacade {
        &self.retrieval
    }

    /// Close every store handle. Components still holding the stores see
    /// them as not connected afterwards.
    pub fn shutdown(&self) {
        self.vector.close();
        self.graph.close();
        self.state.close();
        info!("Memory context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Universe;
    use crate::embedding::UnavailableEmbeddingProvider;

    #[test]
    fn in_memory_context_is_fully_connected() {
        let context = MemoryContext::init(&CronosConfig::in_memory()).expect("init");
        assert!(context.graph().is_connected());
        assert!(context.vector().is_connected());
        assert!(context.state().is_connected());
    }

    #[test]
    fn default_hashing_provider_is_384_wide() {
        let mut config = CronosConfig::default();
        config.vector.path = crate::config::IN_MEMORY.into();
        config.graph.path = crate::config::IN_MEMORY.into();
        config.state.path = crate::config::IN_MEMORY.into();
        let context = MemoryContext::init(&config).expect("init");

        let mut tags = crate::types::Properties::new();
        tags.insert("userId".into(), serde_json::json!("u1"));
        let id = context.vector().ingest("a lantern in the fog", tags).expect("ingest");
        let record = context.vector().get(id).expect("get").expect("stored");
        assert_eq!(record.vector.len(), 384);
    }

    #[test]
    fn network_provider_must_be_injected() {
        let mut config = CronosConfig::in_memory();
        config.embedding.provider = EmbeddingBackend::Ollama;
        assert!(matches!(MemoryContext::init(&config), Err(CronosError::Config(_))));

        let context = MemoryContext::with_provider(&config, Arc::new(UnavailableEmbeddingProvider))
            .expect("injected");
        assert!(context.graph().is_connected());
    }

    #[test]
    fn unreachable_graph_starts_not_connected() {
        let mut config = CronosConfig::in_memory();
        config.graph.path = "/nonexistent/cronos/graph.db".into();
        let context = MemoryContext::init(&config).expect("init");
        assert!(!context.graph().is_connected());
        assert!(matches!(
            context.catalog().upsert_universe(&Universe::new("w1", "u1", "Eldoria")),
            Err(CronosError::NotConnected("graph"))
        ));
    }

    #[test]
    fn shutdown_closes_everything() {
        let context = MemoryContext::init(&CronosConfig::in_memory()).expect("init");
        context.shutdown();
        assert!(!context.graph().is_connected());
        assert!(!context.vector().is_connected());
        assert!(!context.state().is_connected());
    }
}
