//! Error types for the Tether engine.

use crate::remote::RemoteError;
use crate::DocumentId;
use thiserror::Error;

/// All possible errors from the Tether engine.
///
/// Only local, synchronous failures are ever returned from a CRUD call.
/// Remote rejections arrive after the call has returned and are handled by
/// compensation; [`Error::Remote`] exists so they can be reported uniformly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("malformed fields: {0}")]
    MalformedFields(String),

    #[error("document id must be a non-empty string")]
    MissingId,

    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("document already exists: {0}")]
    DuplicateId(DocumentId),

    // Adapter errors
    #[error("{0} is unavailable")]
    AdapterUnavailable(&'static str),

    // Remote errors
    #[error("remote rejected write: {0}")]
    Remote(#[from] RemoteError),
}

impl Error {
    /// Shorthand for a [`Error::MalformedFields`] with a formatted message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedFields(msg.into())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
