//! # Tether Hub
//!
//! An in-process authoritative document store for the Tether engine.
//!
//! A [`Hub`] holds the server copy of every collection. Each client connects
//! through a [`HubSession`], which implements
//! [`RemoteClient`](tether_engine::RemoteClient): writes are executed in call
//! order after a configurable latency, and every successful write is
//! broadcast as an `added`, `changed` or `removed` event to the collection's
//! subscribers.
//!
//! Sessions support fault injection with [`HubSession::reject_next`] and can
//! be dropped with [`HubSession::disconnect`], which makes the hub useful for
//! exercising rollbacks end to end.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether_engine::{Collection, DynamicDocument, MemoryStore};
//! use tether_hub::{Hub, HubConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = Hub::new(HubConfig::default());
//! let session = hub.connect()?;
//!
//! let cities: Collection<DynamicDocument> =
//!     Collection::new("cities", MemoryStore::new(), session)?;
//! cities.listen()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod server;
pub mod session;
pub mod subscriptions;

pub use config::{ConfigError, HubConfig};
pub use error::{HubError, Result};
pub use server::{Call, Hub};
pub use session::HubSession;
pub use subscriptions::SubscriptionManager;
