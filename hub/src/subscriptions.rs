//! Subscription registry.
//!
//! Tracks which sessions are subscribed to which collections and fans
//! change events out to them.

use dashmap::DashMap;
use tether_engine::RemoteEvent;
use tokio::sync::mpsc;

/// Sender half of a subscriber's event stream.
pub type EventSender = mpsc::UnboundedSender<RemoteEvent>;

/// A single subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Unique identifier for this subscription
    pub id: String,
    /// Session that opened it
    pub session_id: String,
    /// Collection it follows
    pub collection: String,
    /// Channel to push events to the subscriber
    pub sender: EventSender,
}

/// Manages active subscriptions.
///
/// Thread-safe and can be shared across sessions via `Arc`.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// All subscriptions, keyed by subscription ID.
    subscriptions: DashMap<String, Subscription>,
    /// Index of subscription IDs by collection.
    by_collection: DashMap<String, Vec<String>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for `collection`.
    ///
    /// Returns the subscription ID.
    pub fn register(&self, session_id: &str, collection: &str, sender: EventSender) -> String {
        let sub_id = uuid::Uuid::new_v4().to_string();

        self.subscriptions.insert(
            sub_id.clone(),
            Subscription {
                id: sub_id.clone(),
                session_id: session_id.to_string(),
                collection: collection.to_string(),
                sender,
            },
        );
        self.by_collection
            .entry(collection.to_string())
            .or_default()
            .push(sub_id.clone());

        tracing::info!(
            sub_id = %sub_id,
            session = %session_id,
            collection = %collection,
            "Subscription registered"
        );

        sub_id
    }

    /// Unregister a subscription.
    pub fn unregister(&self, sub_id: &str) {
        if let Some((_, sub)) = self.subscriptions.remove(sub_id) {
            if let Some(mut ids) = self.by_collection.get_mut(&sub.collection) {
                ids.retain(|id| id != sub_id);
                if ids.is_empty() {
                    drop(ids);
                    self.by_collection
                        .remove_if(&sub.collection, |_, ids| ids.is_empty());
                }
            }

            tracing::info!(
                sub_id = %sub_id,
                collection = %sub.collection,
                "Subscription unregistered"
            );
        }
    }

    /// Unregister every subscription opened by a session.
    ///
    /// Dropping the senders closes the subscribers' streams.
    pub fn unregister_session(&self, session_id: &str) -> usize {
        let ids: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.id.clone())
            .collect();
        for id in &ids {
            self.unregister(id);
        }
        ids.len()
    }

    /// Send an event to every subscriber of its collection, optionally
    /// skipping one session.
    ///
    /// Subscribers whose receiver is gone are pruned. Returns the number of
    /// subscribers that received the event.
    pub fn broadcast(&self, event: &RemoteEvent, except_session: Option<&str>) -> usize {
        let ids = match self.by_collection.get(event.collection()) {
            Some(ids) => ids.clone(),
            None => return 0,
        };

        let mut sent_count = 0;
        let mut dead = Vec::new();
        for id in ids {
            let Some(sub) = self.subscriptions.get(&id) else {
                continue;
            };
            if except_session == Some(sub.session_id.as_str()) {
                continue;
            }
            if sub.sender.send(event.clone()).is_ok() {
                sent_count += 1;
            } else {
                dead.push(id);
            }
        }
        for id in dead {
            self.unregister(&id);
        }

        tracing::debug!(
            collection = %event.collection(),
            id = %event.id(),
            event = event.kind(),
            recipients = sent_count,
            "Broadcast event to subscribers"
        );

        sent_count
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of collections with at least one subscriber.
    pub fn collection_count(&self) -> usize {
        self.by_collection.len()
    }
}
