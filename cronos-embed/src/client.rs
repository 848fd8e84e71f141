//! HTTP embedding provider for Ollama and OpenAI-compatible endpoints.

use std::time::{Duration, Instant};

use cronos_core::config::{EmbeddingBackend, EmbeddingConfig};
use cronos_core::embedding::EmbeddingProvider;
use cronos_core::types::Embedding;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::EmbedError;

/// Where embeddings are fetched from.
#[derive(Debug, Clone)]
pub enum EmbeddingEndpoint {
    /// Ollama running locally.
    Ollama {
        /// Server root, e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// OpenAI-compatible API.
    OpenAiCompatible {
        /// Server root, e.g. `https://api.openai.com`.
        base_url: String,
        /// Bearer token, if the server wants one.
        api_key: Option<String>,
    },
}

impl EmbeddingEndpoint {
    fn url(&self) -> String {
        match self {
            Self::Ollama { base_url } => format!("{}/api/embeddings", base_url.trim_end_matches('/')),
            Self::OpenAiCompatible { base_url, .. } => {
                format!("{}/v1/embeddings", base_url.trim_end_matches('/'))
            }
        }
    }

    fn body(&self, model: &str, text: &str) -> Value {
        match self {
            Self::Ollama { .. } => json!({ "model": model, "prompt": text }),
            Self::OpenAiCompatible { .. } => json!({ "model": model, "input": text }),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn parse(&self, response: &Value) -> Result<Vec<f32>, EmbedError> {
        let values = match self {
            Self::Ollama { .. } => response.get("embedding"),
            Self::OpenAiCompatible { .. } => response
                .get("data")
                .and_then(|data| data.get(0))
                .and_then(|first| first.get("embedding")),
        }
        .and_then(Value::as_array)
        .ok_or_else(|| EmbedError::ParseError("response has no embedding array".into()))?;

        values
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| EmbedError::ParseError(format!("non-numeric component {v}")))
            })
            .collect()
    }
}

/// Blocking embedding client. One request per `embed` call, no retries.
pub struct HttpEmbeddingProvider {
    endpoint: EmbeddingEndpoint,
    http: Client,
    model: String,
    dims: usize,
    timeout_ms: u64,
}

impl std::fmt::Debug for HttpEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingProvider")
            .field("url", &self.endpoint.url())
            .field("model", &self.model)
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

impl HttpEmbeddingProvider {
    /// Create a provider for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::ConfigError`] if the HTTP client cannot be built
    /// or `dimensions` is zero.
    pub fn new(
        endpoint: EmbeddingEndpoint,
        model: impl Into<String>,
        dimensions: usize,
        timeout_ms: u64,
    ) -> Result<Self, EmbedError> {
        if dimensions == 0 {
            return Err(EmbedError::ConfigError("dimensions must be positive".into()));
        }
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| EmbedError::ConfigError(e.to_string()))?;
        Ok(Self {
            endpoint,
            http,
            model: model.into(),
            dims: dimensions,
            timeout_ms,
        })
    }

    /// Create the provider named by `config.provider`.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::ConfigError`] for a backend that is not served
    /// over the network.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let endpoint = match config.provider {
            EmbeddingBackend::Ollama => EmbeddingEndpoint::Ollama {
                base_url: config.base_url.clone(),
            },
            EmbeddingBackend::OpenAi => EmbeddingEndpoint::OpenAiCompatible {
                base_url: config.base_url.clone(),
                api_key: config.api_key.clone(),
            },
            other => {
                return Err(EmbedError::ConfigError(format!(
                    "{other:?} is not a network embedding backend"
                )));
            }
        };
        Self::new(endpoint, config.model.clone(), config.dimensions(), config.timeout_ms)
    }

    /// Fetch one embedding.
    ///
    /// # Errors
    ///
    /// Any transport, status, parse or dimension failure.
    pub fn request(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let start = Instant::now();
        let mut builder = self.http.post(self.endpoint.url()).json(&self.endpoint.body(&self.model, text));
        if let EmbeddingEndpoint::OpenAiCompatible {
            api_key: Some(key), ..
        } = &self.endpoint
        {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body: String = response.text().unwrap_or_default().chars().take(200).collect();
            warn!(status = status.as_u16(), model = %self.model, "Embedding endpoint error");
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = response
            .json()
            .map_err(|e| EmbedError::ParseError(e.to_string()))?;
        let vector = self.endpoint.parse(&json)?;
        if vector.len() != self.dims {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }

        debug!(
            model = %self.model,
            chars = text.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Fetched embedding"
        );
        Ok(vector)
    }

    fn transport_error(&self, err: reqwest::Error) -> EmbedError {
        if err.is_timeout() {
            EmbedError::Timeout(self.timeout_ms)
        } else {
            err.into()
        }
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, text: &str) -> cronos_core::Result<Embedding> {
        match self.request(text) {
            Ok(vector) => Ok(Embedding(vector)),
            Err(err) => {
                warn!(model = %self.model, error = %err, "Embedding request failed");
                Err(err.into())
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
