//! # Cronos Core Library
//!
//! Hybrid narrative memory for an interactive storytelling engine. Two
//! stores answer two kinds of question, always inside one tenant scope
//! (`userId`, optionally `universeId`):
//!
//! - **Vector memory**: "what happened that resembles this?" Episodic
//!   narration embedded with asymmetric document/query framing and recalled
//!   by cosine similarity.
//! - **Knowledge graph**: "who relates to whom?" Story entities and typed
//!   relationships merged idempotently, plus the aggregate roots
//!   (Universe, Character, Adventure) and their ownership links.
//!
//! ## Failure contract
//!
//! Writes surface every failure. Reads degrade to empty results and log the
//! cause; the `try_*` variants return a [`ReadOutcome`] for callers that
//! need to tell "nothing there" from "could not look".
//!
//! ## Entry point
//!
//! Build a [`MemoryContext`] once at startup; it owns the stores and wires
//! the [`CatalogManager`], [`ContextIngestor`] and [`RetrievalFacade`] to them.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod ingestion;
pub mod retrieval;
mod sqlite;
pub mod state;
pub mod types;
pub mod vector;

pub use catalog::{Adventure, CatalogManager, Character, Library, Universe, UniverseDeletion};
pub use config::CronosConfig;
pub use context::MemoryContext;
pub use embedding::{EmbeddingProvider, EmbeddingRole};
pub use error::{CronosError, ReadOutcome, Result};
pub use graph::GraphStore;
pub use ingestion::ContextIngestor;
pub use retrieval::{GroundingContext, GroundingRequest, RetrievalFacade};
pub use state::WorldStateStore;
pub use types::*;
pub use vector::{SearchFilter, VectorMemoryStore};
