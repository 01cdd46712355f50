//! The authoritative store shared by every session.

use crate::config::HubConfig;
use crate::db::{self, Documents};
use crate::error::Result;
use crate::session::HubSession;
use crate::subscriptions::SubscriptionManager;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tether_engine::{DocumentId, Fields, RemoteEvent, WriteKind};
use tokio::sync::mpsc;

/// A write as received from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Insert {
        collection: String,
        documents: Vec<Value>,
    },
    Update {
        collection: String,
        args: Vec<Value>,
    },
    Remove {
        collection: String,
        selector: Value,
    },
}

impl Call {
    pub fn kind(&self) -> WriteKind {
        match self {
            Call::Insert { .. } => WriteKind::Insert,
            Call::Update { .. } => WriteKind::Update,
            Call::Remove { .. } => WriteKind::Remove,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Call::Insert { collection, .. }
            | Call::Update { collection, .. }
            | Call::Remove { collection, .. } => collection,
        }
    }
}

/// In-process authoritative document store.
///
/// Clients reach it through [`HubSession`]s obtained from [`Hub::connect`].
#[derive(Debug)]
pub struct Hub {
    config: HubConfig,
    collections: DashMap<String, Documents>,
    subscriptions: SubscriptionManager,
}

impl Hub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            collections: DashMap::new(),
            subscriptions: SubscriptionManager::new(),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Open a client session. Must be called from within a tokio runtime.
    pub fn connect(self: &Arc<Self>) -> Result<Arc<HubSession>> {
        HubSession::open(Arc::clone(self))
    }

    /// Execute a write and broadcast the events it produces.
    ///
    /// `origin` is the session that issued the call; it is skipped when
    /// `echo_to_origin` is off. The collection stays locked until every
    /// event has been queued, so subscribers see writes in commit order.
    pub fn execute(&self, origin: Option<&str>, call: Call) -> Result<Value> {
        let kind = call.kind();
        let mut docs = self
            .collections
            .entry(call.collection().to_string())
            .or_default();

        let (collection, result, events) = match call {
            Call::Insert {
                collection,
                documents,
            } => {
                let (ids, events) = db::insert(docs.value_mut(), &collection, documents)?;
                (collection, ids, events)
            }
            Call::Update { collection, args } => {
                let (matched, event) = db::update(docs.value_mut(), &collection, args)?;
                (collection, json!(matched), event.into_iter().collect())
            }
            Call::Remove {
                collection,
                selector,
            } => {
                let (removed, event) = db::remove(docs.value_mut(), &collection, selector)?;
                (collection, json!(removed), event.into_iter().collect::<Vec<_>>())
            }
        };

        let except = if self.config.echo_to_origin {
            None
        } else {
            origin
        };
        for event in &events {
            self.subscriptions.broadcast(event, except);
        }
        drop(docs);

        tracing::debug!(
            collection = %collection,
            kind = %kind,
            origin = origin.unwrap_or("-"),
            events = events.len(),
            "Executed write"
        );
        Ok(result)
    }

    /// Subscribe to a collection.
    ///
    /// The stream starts with an `added` event for every existing document,
    /// then carries live changes. Returns the subscription ID and receiver.
    pub fn subscribe(
        &self,
        session_id: &str,
        collection: &str,
    ) -> (String, mpsc::UnboundedReceiver<RemoteEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Held across registration so no write slips between the snapshot
        // and the live stream
        let docs = self.collections.entry(collection.to_string()).or_default();
        for (id, fields) in docs.iter() {
            let _ = tx.send(RemoteEvent::added(collection, id.clone(), fields.clone()));
        }
        let sub_id = self.subscriptions.register(session_id, collection, tx);
        drop(docs);
        (sub_id, rx)
    }

    /// Current server copy of a document.
    pub fn get(&self, collection: &str, id: &str) -> Option<Fields> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// All documents of a collection, ordered by id.
    pub fn documents(&self, collection: &str) -> Vec<(DocumentId, Fields)> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| (id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}
