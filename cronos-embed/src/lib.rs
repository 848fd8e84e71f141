//! # cronos-embed: Network Embedding Providers
//!
//! Implements [`cronos_core::EmbeddingProvider`] over HTTP for:
//!   - **Ollama** (`POST {base_url}/api/embeddings`)
//!   - **OpenAI-compatible APIs** (`POST {base_url}/v1/embeddings`)
//!
//! Providers embed exactly the text they are given. Document/query framing
//! is applied by the core before the call. Every request carries the
//! configured timeout and is attempted once; a failure surfaces as
//! [`cronos_core::CronosError::StoreUnavailable`].

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;

pub use client::{EmbeddingEndpoint, HttpEmbeddingProvider};
pub use error::EmbedError;
