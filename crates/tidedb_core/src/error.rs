//! Error types for the tidedb core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in tidedb core operations.
///
/// Every error maps to a CouchDB-style numeric status via
/// [`CoreError::status`]; the store surface is embedded, but the numerics
/// are what the replication protocol expects.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The caller supplied invalid input (empty doc ID, deletion without a
    /// parent revision, unserializable body, ...).
    #[error("bad request: {message}")]
    BadRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// The addressed document or revision does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was being looked up.
        message: String,
    },

    /// A write attempted to branch from a revision that is no longer
    /// current, or to insert a fresh document over a live one.
    #[error("conflict: document {doc_id} already has a current revision")]
    Conflict {
        /// The document the write collided on.
        doc_id: String,
    },

    /// A revision ID did not match `<generation>-<digest>`.
    #[error("malformed revision ID: {input:?}")]
    MalformedRevId {
        /// The rejected input.
        input: String,
    },

    /// The storage engine stayed busy past the configured retry window.
    #[error("storage is busy")]
    Busy,

    /// The database handle has been closed.
    #[error("database is closed")]
    Closed,

    /// Any other storage-engine failure. Rolls back the enclosing
    /// transaction.
    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    /// A document body could not be serialized or parsed as JSON.
    #[error("body codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates a `BadRequest` error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a `Conflict` error for the given document.
    pub fn conflict(doc_id: impl Into<String>) -> Self {
        Self::Conflict {
            doc_id: doc_id.into(),
        }
    }

    /// Returns the CouchDB-style numeric status for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest { .. } | Self::MalformedRevId { .. } | Self::Codec(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Busy | Self::Closed | Self::Storage(_) => 500,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                Self::Busy
            }
            _ => Self::Storage(err),
        }
    }
}
