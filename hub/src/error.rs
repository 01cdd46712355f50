//! Error handling for the hub.

use tether_engine::{DocumentId, RemoteError, WriteKind};

/// Hub error type.
///
/// Every variant crosses the [`RemoteClient`](tether_engine::RemoteClient)
/// boundary as a [`RemoteError`], the way a real server reports failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("duplicate key: {0}")]
    DuplicateKey(DocumentId),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("invalid modifier: {0}")]
    InvalidModifier(String),

    #[error("{0} rejected")]
    Rejected(WriteKind),

    #[error("session is disconnected")]
    Disconnected,

    #[error("no async runtime available")]
    NoRuntime,
}

impl HubError {
    /// Error code reported to the client.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::DuplicateKey(_) => "409",
            HubError::InvalidDocument(_)
            | HubError::InvalidSelector(_)
            | HubError::InvalidModifier(_) => "400",
            HubError::Rejected(_) => "403",
            HubError::Disconnected => "disconnected",
            HubError::NoRuntime => "unavailable",
        }
    }
}

impl From<HubError> for RemoteError {
    fn from(err: HubError) -> Self {
        RemoteError::new(err.code(), Some(err.to_string()))
    }
}

/// Result type alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
