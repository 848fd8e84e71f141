//! Vector embedding abstraction layer.
//!
//! The embedding model is an external collaborator consumed as a black-box
//! `text -> vector` function. What *is* owned here is the framing contract:
//! stored documents and incoming queries are embedded asymmetrically, with a
//! role-specific prefix (`"passage: "` / `"query: "` for the e5 family)
//! prepended before the provider ever sees the text. Providers must not add
//! prefixes of their own.
//!
//! The network-backed provider lives in the `cronos-embed` crate. This module
//! carries deterministic providers for tests and offline use.

use crate::config::EmbeddingConfig;
use crate::error::{CronosError, Result};
use crate::types::Embedding;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings from text.
///
/// Implementations must be `Send + Sync`; the stores share one provider.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single, already-framed text string.
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::StoreUnavailable`] if the model is not ready
    /// or the backend cannot be reached.
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A human-readable name for the model.
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Asymmetric framing
// ---------------------------------------------------------------------------

/// Whether text is being stored or used to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingRole {
    /// A memory being persisted.
    Document,
    /// A search query.
    Query,
}

/// Role prefixes applied before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePrefixes {
    /// Prepended to documents.
    pub document: String,
    /// Prepended to queries.
    pub query: String,
}

impl RolePrefixes {
    /// Frame `text` for the given role.
    #[must_use]
    pub fn frame(&self, text: &str, role: EmbeddingRole) -> String {
        let prefix = match role {
            EmbeddingRole::Document => &self.document,
            EmbeddingRole::Query => &self.query,
        };
        format!("{prefix}{text}")
    }
}

impl Default for RolePrefixes {
    fn default() -> Self {
        Self {
            document: "passage: ".to_string(),
            query: "query: ".to_string(),
        }
    }
}

impl From<&EmbeddingConfig> for RolePrefixes {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            document: config.document_prefix.clone(),
            query: config.query_prefix.clone(),
        }
    }
}

/// Frame `text` for `role` and embed it.
///
/// # Errors
///
/// Propagates provider failures; an empty vector is reported as
/// [`CronosError::StoreUnavailable`] since it cannot be indexed.
pub fn embed_with_role(
    provider: &dyn EmbeddingProvider,
    prefixes: &RolePrefixes,
    text: &str,
    role: EmbeddingRole,
) -> Result<Embedding> {
    let embedding = provider.embed(&prefixes.frame(text, role))?;
    if embedding.is_empty() {
        return Err(CronosError::StoreUnavailable(format!(
            "embedding provider `{}` returned an empty vector",
            provider.model_name()
        )));
    }
    Ok(embedding)
}

// ---------------------------------------------------------------------------
// Cosine similarity
// ---------------------------------------------------------------------------

/// Compute the cosine similarity between two embedding vectors.
///
/// Returns a value in \[-1.0, 1.0\].  Returns `0.0` if either vector
/// has zero magnitude or the dimensions differ.
#[must_use]
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    if a.0.len() != b.0.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut mag_a = 0.0_f32;
    let mut mag_b = 0.0_f32;

    for (x, y) in a.0.iter().zip(b.0.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

// ---------------------------------------------------------------------------
// Stub provider
// ---------------------------------------------------------------------------

/// A stub embedding provider that returns zero-vectors.
///
/// Every stored record scores 0.0 against every query, so search falls back
/// to pure insertion order.
pub struct StubEmbeddingProvider {
    dims: usize,
}

impl StubEmbeddingProvider {
    /// Create a new stub provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl Default for StubEmbeddingProvider {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingProvider for StubEmbeddingProvider {
    fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(Embedding(vec![0.0; self.dims]))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "stub-zero-vector"
    }
}

// ---------------------------------------------------------------------------
// Feature-hashing provider
// ---------------------------------------------------------------------------

/// Deterministic bag-of-words embeddings via the hashing trick.
///
/// Lowercased alphanumeric tokens are hashed (FNV-1a) into `dims` buckets
/// with a hash-derived sign, then L2-normalised. Texts that share words land
/// close together, which is enough for recall tests and offline demos.
pub struct HashingEmbeddingProvider {
    dims: usize,
}

impl HashingEmbeddingProvider {
    /// Create a hashing provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dims: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(384)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut raw = vec![0.0_f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let hash = fnv1a(token.as_bytes());
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hash % self.dims as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            raw[bucket] += sign;
        }

        let mag: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag < f32::EPSILON {
            return Ok(Embedding(raw));
        }
        Ok(Embedding(raw.iter().map(|x| x / mag).collect()))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "feature-hashing-bow"
    }
}

// ---------------------------------------------------------------------------
// Unavailable provider
// ---------------------------------------------------------------------------

/// A provider whose model never finished loading.
///
/// Every call fails with [`CronosError::StoreUnavailable`].
#[derive(Debug, Default)]
pub struct UnavailableEmbeddingProvider;

impl EmbeddingProvider for UnavailableEmbeddingProvider {
    fn embed(&self, _text: &str) -> Result<Embedding> {
        Err(CronosError::StoreUnavailable(
            "embedding model is not loaded".to_string(),
        ))
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
