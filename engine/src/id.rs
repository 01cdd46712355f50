//! Primary-key generation for documents inserted without a caller-supplied id.

use crate::remote::RemoteClient;
use crate::DocumentId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where new primary keys come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Random UUID v4 generated locally (default)
    #[default]
    Uuid,
    /// Ask the remote client first, fall back to a local UUID
    Remote,
}

/// Generate a collision-resistant id (UUID v4, simple form).
pub fn generate_id() -> DocumentId {
    Uuid::new_v4().simple().to_string()
}

/// Produce an id according to `strategy`.
pub fn next_id(strategy: IdStrategy, remote: &dyn RemoteClient) -> DocumentId {
    match strategy {
        IdStrategy::Uuid => generate_id(),
        IdStrategy::Remote => remote
            .get_id()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_id),
    }
}
