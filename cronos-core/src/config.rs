//! Configuration for the Cronos memory core.
//!
//! Maps directly to `cronos.toml`. Every section is optional; missing keys
//! fall back to the defaults below. A handful of deployment-specific values
//! can be overridden from the environment (see [`CronosConfig::apply_env_overrides`]).

use serde::{Deserialize, Serialize};

use crate::error::{CronosError, Result};

/// Top-level Cronos configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronosConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Vector memory store settings.
    #[serde(default)]
    pub vector: VectorConfig,
    /// Knowledge graph store settings.
    #[serde(default)]
    pub graph: GraphConfig,
    /// Auxiliary world-state store settings.
    #[serde(default)]
    pub state: StateConfig,
    /// Retrieval façade settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl CronosConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `CronosError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| CronosError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Configuration with every store in memory. Used by tests and benches.
    #[must_use]
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.vector.path = IN_MEMORY.to_string();
        config.graph.path = IN_MEMORY.to_string();
        config.state.path = IN_MEMORY.to_string();
        config.embedding.provider = EmbeddingBackend::Hashing;
        config
    }

    /// Override deployment-specific values from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("CRONOS_GRAPH_PATH") {
            self.graph.path = path;
        }
        if let Some(path) = lookup("CRONOS_VECTOR_PATH") {
            self.vector.path = path;
        }
        if let Some(path) = lookup("CRONOS_STATE_PATH") {
            self.state.path = path;
        }
        if let Some(url) = lookup("CRONOS_EMBEDDING_URL") {
            self.embedding.base_url = url;
        }
        if let Some(key) = lookup("CRONOS_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Some(level) = lookup("CRONOS_LOG_LEVEL") {
            self.general.log_level = level;
        }
    }

    /// Reject settings that would make the stores misbehave.
    ///
    /// # Errors
    /// Returns `CronosError::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let checks: [(bool, &str); 9] = [
            (self.embedding.dimensions() > 0, "embedding.dimensions"),
            (self.embedding.timeout_ms > 0, "embedding.timeout_ms"),
            (!self.embedding.document_prefix.is_empty(), "embedding.document_prefix"),
            (!self.embedding.query_prefix.is_empty(), "embedding.query_prefix"),
            (self.vector.max_results > 0, "vector.max_results"),
            (self.graph.neighbor_limit > 0, "graph.neighbor_limit"),
            (self.graph.max_depth > 0, "graph.max_depth"),
            (self.retrieval.timeout_ms > 0, "retrieval.timeout_ms"),
            (is_identifier(&self.vector.collection), "vector.collection"),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, key)) => Err(CronosError::Config(format!("invalid value for `{key}`"))),
            None => Ok(()),
        }
    }
}

/// Path value that selects an in-memory SQLite database.
pub const IN_MEMORY: &str = ":memory:";

/// Whether `name` is safe to use as an SQL identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Deterministic feature-hashing provider (no model required).
    Hashing,
    /// Zero vectors. Development only.
    Stub,
    /// Ollama `/api/embeddings`.
    Ollama,
    /// OpenAI-compatible `/v1/embeddings`.
    OpenAi,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend to use.
    #[serde(default = "default_backend")]
    pub provider: EmbeddingBackend,
    /// Base URL for network backends.
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    /// API key for OpenAI-compatible backends.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model name passed to the backend.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Embedding vector dimensions; see [`EmbeddingConfig::dimensions`].
    #[serde(default)]
    pub dimensions: Option<usize>,
    /// Prefix prepended to stored documents.
    #[serde(default = "default_document_prefix")]
    pub document_prefix: String,
    /// Prefix prepended to search queries.
    #[serde(default = "default_query_prefix")]
    pub query_prefix: String,
    /// Per-request timeout for network backends.
    #[serde(default = "default_10000")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_backend(),
            base_url: default_embedding_url(),
            api_key: None,
            model: default_embedding_model(),
            dimensions: None,
            document_prefix: default_document_prefix(),
            query_prefix: default_query_prefix(),
            timeout_ms: 10_000,
        }
    }
}

impl EmbeddingConfig {
    /// Vector width: the configured value, else 384 for the in-process
    /// backends and 1024 for network models.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions.unwrap_or(match self.provider {
            EmbeddingBackend::Hashing | EmbeddingBackend::Stub => 384,
            EmbeddingBackend::Ollama | EmbeddingBackend::OpenAi => 1024,
        })
    }
}

/// Vector memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// SQLite database path, or `:memory:`.
    #[serde(default = "default_vector_path")]
    pub path: String,
    /// Collection (table) name.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Upper bound on `k` for a single search.
    #[serde(default = "default_50")]
    pub max_results: usize,
    /// How long a store call may wait on a locked database.
    #[serde(default = "default_5000")]
    pub busy_timeout_ms: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            path: default_vector_path(),
            collection: default_collection(),
            max_results: 50,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Knowledge graph store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// SQLite database path, or `:memory:`.
    #[serde(default = "default_graph_path")]
    pub path: String,
    /// Hard cap on edges returned by one neighbor query.
    #[serde(default = "default_50")]
    pub neighbor_limit: usize,
    /// Deepest traversal a neighbor query may request.
    #[serde(default = "default_1")]
    pub max_depth: u32,
    /// How long a store call may wait on a locked database.
    #[serde(default = "default_5000")]
    pub busy_timeout_ms: u64,
    /// Enable WAL journaling for file-backed databases.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            path: default_graph_path(),
            neighbor_limit: 50,
            max_depth: 1,
            busy_timeout_ms: 5_000,
            wal_mode: true,
        }
    }
}

/// Auxiliary world-state store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// SQLite database path, or `:memory:`.
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// Retrieval façade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Timeout applied to each store call made by the façade.
    #[serde(default = "default_5000")]
    pub timeout_ms: u64,
    /// Documents returned when a request does not specify `n_results`.
    #[serde(default = "default_3")]
    pub default_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            default_results: 3,
        }
    }
}

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_backend() -> EmbeddingBackend { EmbeddingBackend::Hashing }
fn default_embedding_url() -> String { "http://localhost:11434".to_string() }
fn default_embedding_model() -> String { "intfloat/multilingual-e5-large".to_string() }
fn default_document_prefix() -> String { "passage: ".to_string() }
fn default_query_prefix() -> String { "query: ".to_string() }
fn default_vector_path() -> String { "./cronos_memory.db".to_string() }
fn default_collection() -> String { "cronos_memory".to_string() }
fn default_graph_path() -> String { "./cronos_graph.db".to_string() }
fn default_state_path() -> String { "./world_state.db".to_string() }
fn default_1() -> u32 { 1 }
fn default_3() -> usize { 3 }
fn default_50() -> usize { 50 }
fn default_5000() -> u64 { 5_000 }
fn default_10000() -> u64 { 10_000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = CronosConfig::from_toml("").expect("parse");
        assert_eq!(config.graph.neighbor_limit, 50);
        assert_eq!(config.embedding.document_prefix, "passage: ");
        assert_eq!(config.embedding.query_prefix, "query: ");
        assert_eq!(config.vector.collection, "cronos_memory");
    }

    #[test]
    fn partial_toml_overrides_only_given_keys() {
        let config = CronosConfig::from_toml(
            r#"
            [graph]
            neighbor_limit = 10

            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            "#,
        )
        .expect("parse");
        assert_eq!(config.graph.neighbor_limit, 10);
        assert_eq!(config.graph.max_depth, 1);
        assert_eq!(config.embedding.provider, EmbeddingBackend::Ollama);
        assert_eq!(config.embedding.model, "nomic-embed-text");
    }

    #[test]
    fn invalid_collection_name_rejected() {
        let err = CronosConfig::from_toml(
            r#"
            [vector]
            collection = "memories; DROP TABLE x"
            "#,
        )
        .expect_err("should reject");
        assert!(matches!(err, CronosError::Config(_)));
    }

    #[test]
    fn dimensions_follow_backend_unless_set() {
        let config = CronosConfig::from_toml("").expect("parse");
        assert_eq!(config.embedding.provider, EmbeddingBackend::Hashing);
        assert_eq!(config.embedding.dimensions(), 384);

        let config = CronosConfig::from_toml("[embedding]\nprovider = \"ollama\"").expect("parse");
        assert_eq!(config.embedding.dimensions(), 1024);

        let config = CronosConfig::from_toml("[embedding]\ndimensions = 768").expect("parse");
        assert_eq!(config.embedding.dimensions(), 768);
    }

    #[test]
    fn zero_limit_rejected() {
        let mut config = CronosConfig::default();
        config.graph.neighbor_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_apply_from_lookup() {
        let mut config = CronosConfig::default();
        config.apply_overrides(|key| match key {
            "CRONOS_GRAPH_PATH" => Some("/tmp/graph.db".to_string()),
            "CRONOS_EMBEDDING_API_KEY" => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.graph.path, "/tmp/graph.db");
        assert_eq!(config.embedding.api_key.as_deref(), Some("secret"));
        assert_eq!(config.vector.path, "./cronos_memory.db");
    }

    #[test]
    fn in_memory_config_is_valid() {
        let config = CronosConfig::in_memory();
        assert!(config.validate().is_ok());
        assert_eq!(config.graph.path, IN_MEMORY);
    }
}
