//! # Tether Engine
//!
//! The reconciliation core of an offline-first document mirror.
//!
//! Applications read and write a local, queryable store synchronously. The
//! engine propagates those writes to an authoritative remote store reachable
//! only through an asynchronous, eventually-acknowledging client, rolls local
//! state back when the remote rejects a write, and applies remote-origin
//! change notifications to the local store.
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! A [`Document`] has an immutable primary key and projects itself to a
//! generic [`Fields`] map through explicit [`FieldDescriptor`]s.
//! [`DynamicDocument`] covers schemaless data.
//!
//! ### Adapters
//!
//! - [`LocalStore`] - scoped atomic writes and predicate reads
//!   ([`MemoryStore`] is the bundled implementation)
//! - [`RemoteClient`] - insert/update/remove calls resolving through an
//!   [`Ack`], plus a stream of [`RemoteEvent`]s
//!
//! ### Optimistic writes
//!
//! [`Collection::insert`], [`Collection::update`],
//! [`Collection::update_fields`] and [`Collection::remove`] commit locally and
//! return immediately. If the remote later rejects the write, the in-memory
//! [`PendingWrite`] is applied as a compensation:
//!
//! - rejected insert: the document is removed
//! - rejected update: the pre-update snapshot is written back
//! - rejected remove: the document is re-inserted
//!
//! ### Remote events
//!
//! `added`, `changed` and `removed` events are applied by
//! [`Collection::apply_event`], keyed on primary key and idempotent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_engine::{Collection, Document, DynamicDocument, MemoryStore, RemoteClient};
//! use serde_json::json;
//!
//! # async fn run(remote: Arc<dyn RemoteClient>) -> tether_engine::Result<()> {
//! let store = MemoryStore::new();
//! let cities: Collection<DynamicDocument> = Collection::new("cities", store, remote)?;
//! cities.listen()?;
//!
//! let fields = json!({"id": "1", "city": "Marfa"});
//! let doc = cities.insert(fields.as_object().cloned().unwrap_or_default())?;
//! let local = cities.find_one(doc.id())?;
//! assert_eq!(local.and_then(|d| d.get("city").cloned()), Some(json!("Marfa")));
//!
//! cities.settle().await;
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod id;
pub mod pending;
pub mod reconcile;
pub mod remote;
pub mod store;

// Re-export main types at crate root
pub use collection::{Collection, CollectionStats};
pub use config::{Config, ConfigError};
pub use document::{DynamicDocument, Document, FieldDescriptor, Fields};
pub use error::{Error, Result};
pub use id::{generate_id, IdStrategy};
pub use pending::{Compensation, PendingWrite};
pub use reconcile::Applied;
pub use remote::{
    completion, Ack, Completer, RemoteClient, RemoteError, RemoteEvent, RemoteResult, WriteKind,
};
pub use store::{LocalStore, MemoryStore, Transaction};

/// Primary key of a document.
pub type DocumentId = String;
