//! Remote Client - the asynchronous, eventually-acknowledging side.
//!
//! A [`RemoteClient`] issues fire-and-forget writes. Each write hands back an
//! [`Ack`], a future that resolves exactly once with the remote's verdict.
//! The client also delivers [`RemoteEvent`]s for subscribed collections over
//! an unbounded channel.

use crate::document::{Fields, WIRE_ID_KEY};
use crate::DocumentId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Error object reported by the remote for a rejected call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{error}{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
pub struct RemoteError {
    /// Error code or name
    pub error: String,
    /// Human readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RemoteError {
    /// Create a remote error.
    pub fn new(error: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            error: error.into(),
            reason,
        }
    }

    /// The call's completion was dropped without a verdict.
    pub fn abandoned() -> Self {
        Self::new("abandoned", Some("call dropped before completion".into()))
    }
}

/// Outcome of a remote call.
pub type RemoteResult = std::result::Result<Value, RemoteError>;

/// Sending half of a call's completion. Consumed on use, so a call can only
/// ever be resolved once.
#[derive(Debug)]
pub struct Completer(oneshot::Sender<RemoteResult>);

impl Completer {
    /// Resolve the call.
    pub fn complete(self, result: RemoteResult) {
        // Receiver gone means nobody is waiting; nothing to do.
        let _ = self.0.send(result);
    }

    /// Resolve the call successfully.
    pub fn succeed(self, value: Value) {
        self.complete(Ok(value));
    }

    /// Resolve the call with an error.
    pub fn fail(self, error: RemoteError) {
        self.complete(Err(error));
    }
}

/// Receiving half of a call's completion.
///
/// If the [`Completer`] is dropped without resolving, the ack resolves to
/// [`RemoteError::abandoned`], so every call has exactly one terminal outcome.
#[derive(Debug)]
pub struct Ack(oneshot::Receiver<RemoteResult>);

impl Ack {
    /// An ack that is already resolved.
    pub fn ready(result: RemoteResult) -> Self {
        let (completer, ack) = completion();
        completer.complete(result);
        ack
    }
}

impl Future for Ack {
    type Output = RemoteResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(RemoteError::abandoned())))
    }
}

/// Create a linked completion pair.
pub fn completion() -> (Completer, Ack) {
    let (tx, rx) = oneshot::channel();
    (Completer(tx), Ack(rx))
}

/// Kind of remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Insert,
    Update,
    Remove,
}

impl std::fmt::Display for WriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WriteKind::Insert => "insert",
            WriteKind::Update => "update",
            WriteKind::Remove => "remove",
        })
    }
}

/// Server-originated change notification for a subscribed collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum RemoteEvent {
    /// A document entered the subscribed set.
    Added {
        collection: String,
        id: DocumentId,
        #[serde(default)]
        fields: Fields,
    },
    /// Fields of a document changed or were cleared.
    Changed {
        collection: String,
        id: DocumentId,
        #[serde(default)]
        fields: Fields,
        #[serde(default)]
        cleared: Vec<String>,
    },
    /// A document left the subscribed set.
    Removed { collection: String, id: DocumentId },
}

impl RemoteEvent {
    /// Create an `added` event.
    pub fn added(collection: impl Into<String>, id: impl Into<DocumentId>, fields: Fields) -> Self {
        RemoteEvent::Added {
            collection: collection.into(),
            id: id.into(),
            fields,
        }
    }

    /// Create a `changed` event.
    pub fn changed(
        collection: impl Into<String>,
        id: impl Into<DocumentId>,
        fields: Fields,
        cleared: Vec<String>,
    ) -> Self {
        RemoteEvent::Changed {
            collection: collection.into(),
            id: id.into(),
            fields,
            cleared,
        }
    }

    /// Create a `removed` event.
    pub fn removed(collection: impl Into<String>, id: impl Into<DocumentId>) -> Self {
        RemoteEvent::Removed {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Collection the event targets.
    pub fn collection(&self) -> &str {
        match self {
            RemoteEvent::Added { collection, .. }
            | RemoteEvent::Changed { collection, .. }
            | RemoteEvent::Removed { collection, .. } => collection,
        }
    }

    /// Document the event targets.
    pub fn id(&self) -> &str {
        match self {
            RemoteEvent::Added { id, .. }
            | RemoteEvent::Changed { id, .. }
            | RemoteEvent::Removed { id, .. } => id,
        }
    }

    /// Short event name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteEvent::Added { .. } => "added",
            RemoteEvent::Changed { .. } => "changed",
            RemoteEvent::Removed { .. } => "removed",
        }
    }
}

/// Contract over the wire-protocol client.
///
/// Implementations must resolve every returned [`Ack`] exactly once, with
/// success or failure; timeouts are the implementation's concern.
pub trait RemoteClient: Send + Sync + 'static {
    /// Insert documents into a remote collection.
    fn insert(&self, collection: &str, documents: Vec<Value>) -> Ack;

    /// Update a remote document. `modifier` is `[selector, modifier]`.
    fn update(&self, collection: &str, modifier: Vec<Value>) -> Ack;

    /// Remove documents matching `selector`.
    fn remove(&self, collection: &str, selector: Value) -> Ack;

    /// Start receiving events for `collection`.
    fn subscribe(&self, collection: &str) -> mpsc::UnboundedReceiver<RemoteEvent>;

    /// Remote-provided id for a new document, if the client offers one.
    fn get_id(&self) -> Option<DocumentId> {
        None
    }

    /// Whether calls can currently be issued.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Selector matching a single document by primary key.
pub fn id_selector(id: &str) -> Value {
    json!({ WIRE_ID_KEY: id })
}

/// Update arguments replacing a document's fields wholesale.
pub fn replace_args(id: &str, fields: Fields) -> Vec<Value> {
    vec![id_selector(id), Value::Object(fields)]
}

/// Update arguments setting only the named fields.
pub fn set_args(id: &str, fields: Fields) -> Vec<Value> {
    vec![id_selector(id), json!({ "$set": fields })]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_resolves_once_with_value() {
        let (completer, ack) = completion();
        completer.succeed(json!(1));
        assert_eq!(ack.await, Ok(json!(1)));
    }

    #[tokio::test]
    async fn dropped_completer_is_abandoned() {
        let (completer, ack) = completion();
        drop(completer);
        assert_eq!(ack.await, Err(RemoteError::abandoned()));
    }

    #[tokio::test]
    async fn ready_ack() {
        let err = RemoteError::new("500", None);
        assert_eq!(Ack::ready(Err(err.clone())).await, Err(err));
    }

    #[test]
    fn remote_error_display() {
        assert_eq!(RemoteError::new("404", None).to_string(), "404");
        assert_eq!(
            RemoteError::new("403", Some("Access denied".into())).to_string(),
            "403: Access denied"
        );
    }

    #[test]
    fn event_serialization() {
        let event = RemoteEvent::changed("cities", "1", Fields::new(), vec!["state".into()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["msg"], "changed");
        assert_eq!(json["cleared"], json!(["state"]));

        let parsed: RemoteEvent =
            serde_json::from_str(r#"{"msg":"removed","collection":"cities","id":"1"}"#).unwrap();
        assert_eq!(parsed, RemoteEvent::removed("cities", "1"));
        assert_eq!(parsed.kind(), "removed");
    }

    #[test]
    fn wire_shapes() {
        let mut fields = Fields::new();
        fields.insert("city".into(), json!("Marfa"));

        assert_eq!(id_selector("1"), json!({"_id": "1"}));
        assert_eq!(
            set_args("1", fields.clone()),
            vec![json!({"_id": "1"}), json!({"$set": {"city": "Marfa"}})]
        );
        assert_eq!(
            replace_args("1", fields),
            vec![json!({"_id": "1"}), json!({"city": "Marfa"})]
        );
    }
}
