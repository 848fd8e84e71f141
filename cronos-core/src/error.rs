//! Error types for the Cronos memory core.
//!
//! Writes surface every failure through [`CronosError`]. Reads in the
//! hybrid-memory core degrade to empty results instead; callers that need to
//! know *why* a read came back empty use the `try_*` variants, which return a
//! [`ReadOutcome`].

use thiserror::Error;

/// Top-level error type for all Cronos operations.
#[derive(Error, Debug)]
pub enum CronosError {
    /// Input was empty or malformed. Raised before any mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The embedding provider, vector index, or graph database could not
    /// serve the request (including timeouts).
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store handle was never connected or has been closed.
    #[error("Store not connected: {0}")]
    NotConnected(&'static str),

    /// A multi-edge ingestion failed as a unit.
    #[error("Batch of {attempted} edges failed: {reason}")]
    BatchFailure {
        /// Number of edges in the rejected batch.
        attempted: usize,
        /// Underlying failure.
        reason: String,
    },

    /// An aggregate write referenced a parent that does not exist.
    #[error("Referenced {kind} not found: {id}")]
    ReferenceNotFound {
        /// Aggregate kind of the missing reference.
        kind: &'static str,
        /// The unresolved identifier.
        id: String,
    },

    /// A point lookup missed.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Aggregate kind that was looked up.
        kind: &'static str,
        /// The identifier that missed.
        id: String,
    },

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CronosError {
    /// Whether this error belongs to the "store unavailable" class.
    ///
    /// SQLite busy/locked/cannot-open conditions count: they are what a
    /// bounded `busy_timeout` turns into once it expires.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) | Self::NotConnected(_) => true,
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for CronosError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for CronosError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, CronosError>;

/// Outcome of a read that the core would otherwise soft-fail.
#[derive(Debug)]
#[must_use]
pub enum ReadOutcome<T> {
    /// The read succeeded.
    Ok(T),
    /// The store handle is not connected.
    NotConnected,
    /// The read failed for another reason.
    Failed(CronosError),
}

impl<T> ReadOutcome<T> {
    /// Whether the read succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Convert into a strict [`Result`].
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::NotConnected`] or the underlying failure.
    pub fn into_result(self, store: &'static str) -> Result<T> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::NotConnected => Err(CronosError::NotConnected(store)),
            Self::Failed(err) => Err(err),
        }
    }
}

impl<T> From<Result<T>> for ReadOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(CronosError::NotConnected(_)) => Self::NotConnected,
            Err(err) => Self::Failed(err),
        }
    }
}
