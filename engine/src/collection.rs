//! Collection - the reconciliation engine for one named local/remote pair.
//!
//! Writes are optimistic: they commit to the local store first, then the
//! matching remote call is issued and its [`Ack`] awaited on a spawned task.
//! A rejected ack turns the in-memory [`PendingWrite`] into a compensating
//! transaction. Remote events are applied independently via
//! [`Collection::apply_event`] or a [`Collection::listen`] task.

use crate::config::Config;
use crate::document::{take_id, wire_value, ID_KEY, WIRE_ID_KEY};
use crate::id::next_id;
use crate::pending::{InFlight, PendingWrite, RemoteMarks};
use crate::reconcile::{self, Applied};
use crate::remote::{
    id_selector, replace_args, set_args, Ack, RemoteClient, RemoteEvent, RemoteResult,
};
use crate::store::{LocalStore, MemoryStore};
use crate::{error::Result, Document, Error, Fields};
use parking_lot::Mutex;
use serde::Serialize;
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Point-in-time counters for a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    /// Optimistic inserts issued
    pub inserts: u64,
    /// Optimistic updates issued (full and partial)
    pub updates: u64,
    /// Optimistic removes issued
    pub removes: u64,
    /// Writes the remote confirmed
    pub confirmed: u64,
    /// Writes the remote rejected and that were compensated
    pub compensations: u64,
    /// Remote events that changed the local store
    pub events_applied: u64,
    /// Writes still awaiting the remote
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    inserts: AtomicU64,
    updates: AtomicU64,
    removes: AtomicU64,
    confirmed: AtomicU64,
    compensations: AtomicU64,
    events_applied: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Inner<D, S> {
    name: String,
    store: S,
    remote: Arc<dyn RemoteClient>,
    config: Config,
    runtime: Handle,
    in_flight: InFlight,
    marks: RemoteMarks,
    counters: Counters,
    last_rejection: Mutex<Option<Error>>,
    _doc: PhantomData<fn() -> D>,
}

/// One named collection mirrored between a local store and the remote.
///
/// Cloning yields another handle to the same collection.
pub struct Collection<D: Document, S: LocalStore<D> = MemoryStore<D>> {
    inner: Arc<Inner<D, S>>,
}

impl<D: Document, S: LocalStore<D>> Clone for Collection<D, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Document, S: LocalStore<D>> std::fmt::Debug for Collection<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.in_flight.get())
            .finish()
    }
}

impl<D: Document, S: LocalStore<D>> Collection<D, S> {
    /// Create a collection with the default [`Config`].
    ///
    /// Must be called from within a tokio runtime; remote acks are awaited on
    /// that runtime.
    pub fn new(name: impl Into<String>, store: S, remote: Arc<dyn RemoteClient>) -> Result<Self> {
        Self::with_config(name, store, remote, Config::default())
    }

    /// Create a collection with an explicit [`Config`].
    pub fn with_config(
        name: impl Into<String>,
        store: S,
        remote: Arc<dyn RemoteClient>,
        config: Config,
    ) -> Result<Self> {
        let runtime =
            Handle::try_current().map_err(|_| Error::AdapterUnavailable("async runtime"))?;
        Ok(Self::with_runtime(name, store, remote, config, runtime))
    }

    /// Create a collection that awaits remote acks on `runtime`.
    pub fn with_runtime(
        name: impl Into<String>,
        store: S,
        remote: Arc<dyn RemoteClient>,
        config: Config,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                store,
                remote,
                config,
                runtime,
                in_flight: InFlight::default(),
                marks: RemoteMarks::default(),
                counters: Counters::default(),
                last_rejection: Mutex::new(None),
                _doc: PhantomData,
            }),
        }
    }

    /// Remote collection name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The local store backing this collection.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Engine configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Optimistic writes
    // ------------------------------------------------------------------

    /// Insert a document built from structured fields.
    ///
    /// The primary key is taken from `id` (or `_id`) when present, otherwise
    /// generated. Returns the document as committed locally, before the
    /// remote has answered.
    pub fn insert(&self, mut fields: Fields) -> Result<D> {
        self.ensure_ready()?;
        let id = match take_id(&mut fields)? {
            Some(id) => id,
            None => next_id(self.inner.config.id_strategy, self.inner.remote.as_ref()),
        };
        let mut doc = D::materialize(id);
        doc.apply(&fields)?;
        self.insert_document(doc)
    }

    /// Insert an already materialized document.
    pub fn insert_document(&self, doc: D) -> Result<D> {
        self.ensure_ready()?;
        if doc.id().is_empty() {
            return Err(Error::MissingId);
        }

        let id = doc.id().to_string();
        let stored = doc.clone();
        let mark = self.inner.store.write(|txn| {
            txn.add(stored, false)?;
            Ok(self.inner.marks.begin(&id))
        })?;
        bump(&self.inner.counters.inserts);
        tracing::debug!(collection = %self.inner.name, id = %id, "Optimistic insert");

        let ack = self
            .inner
            .remote
            .insert(&self.inner.name, vec![wire_value(&doc)]);
        self.track(PendingWrite::insert(id), mark, ack);
        Ok(doc)
    }

    /// Replace a document's fields with `doc`'s.
    ///
    /// The prior state is kept in memory and written back if the remote
    /// rejects the update.
    pub fn update(&self, doc: &D) -> Result<()> {
        self.ensure_ready()?;
        let id = doc.id().to_string();

        let next = doc.clone();
        let (before, mark) = self.inner.store.write(|txn| {
            let before = txn
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::DocumentNotFound(id.clone()))?;
            txn.add(next, true)?;
            Ok((before, self.inner.marks.begin(&id)))
        })?;
        bump(&self.inner.counters.updates);
        tracing::debug!(collection = %self.inner.name, id = %id, "Optimistic update");

        let ack = self
            .inner
            .remote
            .update(&self.inner.name, replace_args(&id, doc.json_value()));
        self.track(PendingWrite::update(before, doc.clone()), mark, ack);
        Ok(())
    }

    /// Set only the named fields on the document with `id`.
    ///
    /// This is the untrusted path: the primary key and operator-like names
    /// are refused, and with `strict_fields` so is any name the document
    /// type does not declare. The remote receives a `$set` of exactly these
    /// fields. Returns the updated document.
    pub fn update_fields(&self, id: &str, fields: Fields) -> Result<D> {
        self.ensure_ready()?;
        self.check_partial_fields(&fields)?;

        let (before, after, mark) = self.inner.store.write(|txn| {
            let before = txn
                .get(id)
                .cloned()
                .ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;
            let mut after = before.clone();
            after.apply(&fields)?;
            txn.add(after.clone(), true)?;
            Ok((before, after, self.inner.marks.begin(id)))
        })?;
        bump(&self.inner.counters.updates);
        tracing::debug!(
            collection = %self.inner.name,
            id = %id,
            fields = fields.len(),
            "Optimistic partial update"
        );

        let ack = self
            .inner
            .remote
            .update(&self.inner.name, set_args(id, fields));
        self.track(PendingWrite::update(before, after.clone()), mark, ack);
        Ok(after)
    }

    /// Remove the document with `id`.
    ///
    /// Returns `false` without contacting the remote if no such document
    /// exists locally.
    pub fn remove(&self, id: &str) -> Result<bool> {
        self.ensure_ready()?;

        let removed = self.inner.store.write(|txn| {
            Ok(txn
                .delete(id)
                .map(|doc| (doc, self.inner.marks.begin(id))))
        })?;
        let Some((doc, mark)) = removed else {
            tracing::trace!(collection = %self.inner.name, id = %id, "Remove of absent document");
            return Ok(false);
        };
        bump(&self.inner.counters.removes);
        tracing::debug!(collection = %self.inner.name, id = %id, "Optimistic remove");

        let ack = self.inner.remote.remove(&self.inner.name, id_selector(id));
        self.track(PendingWrite::remove(doc), mark, ack);
        Ok(true)
    }

    /// Remove `doc` by its primary key.
    pub fn remove_document(&self, doc: &D) -> Result<bool> {
        self.remove(doc.id())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// All documents, ordered by primary key.
    pub fn find(&self) -> Result<Vec<D>> {
        self.inner.store.query(None)
    }

    /// Documents matching `predicate`.
    pub fn find_where<P>(&self, predicate: P) -> Result<Vec<D>>
    where
        P: Fn(&D) -> bool,
    {
        self.inner.store.query(Some(&predicate))
    }

    /// The document with `id`, if present.
    pub fn find_one(&self, id: &str) -> Result<Option<D>> {
        self.inner.store.get(id)
    }

    /// First document matching `predicate`, if any.
    pub fn find_one_where<P>(&self, predicate: P) -> Result<Option<D>>
    where
        P: Fn(&D) -> bool,
    {
        Ok(self.find_where(predicate)?.into_iter().next())
    }

    /// Number of documents held locally.
    pub fn count(&self) -> Result<usize> {
        self.inner.store.count()
    }

    /// Delete every local document. The remote is not contacted.
    pub fn flush(&self) -> Result<usize> {
        let removed = self.inner.store.write(|txn| Ok(txn.delete_all()))?;
        tracing::debug!(collection = %self.inner.name, removed, "Flushed local mirror");
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Remote events
    // ------------------------------------------------------------------

    /// Apply one remote event to the local store.
    pub fn apply_event(&self, event: &RemoteEvent) -> Result<Applied> {
        self.inner.apply_event(event)
    }

    /// Subscribe to the remote collection and apply its events until the
    /// event channel closes.
    pub fn listen(&self) -> Result<JoinHandle<()>> {
        if !self.inner.remote.is_connected() {
            return Err(Error::AdapterUnavailable("remote client"));
        }
        let mut events = self.inner.remote.subscribe(&self.inner.name);
        let inner = Arc::clone(&self.inner);
        tracing::info!(collection = %inner.name, "Listening for remote events");

        Ok(self.inner.runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = inner.apply_event(&event) {
                    tracing::warn!(
                        collection = %inner.name,
                        id = %event.id(),
                        event = event.kind(),
                        "Failed to apply remote event: {}",
                        e
                    );
                }
            }
            tracing::info!(collection = %inner.name, "Remote event stream closed");
        }))
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// Number of optimistic writes awaiting the remote.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.get()
    }

    /// Wait until every optimistic write issued so far has settled.
    pub async fn settle(&self) {
        self.inner.in_flight.wait_idle().await;
    }

    /// Current counters.
    pub fn stats(&self) -> CollectionStats {
        let c = &self.inner.counters;
        CollectionStats {
            inserts: c.inserts.load(Ordering::Relaxed),
            updates: c.updates.load(Ordering::Relaxed),
            removes: c.removes.load(Ordering::Relaxed),
            confirmed: c.confirmed.load(Ordering::Relaxed),
            compensations: c.compensations.load(Ordering::Relaxed),
            events_applied: c.events_applied.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.get(),
        }
    }

    /// The most recent remote rejection, as [`Error::Remote`].
    ///
    /// Rejections never surface from the write call that caused them; this
    /// is where a caller can observe the last one after it was compensated.
    pub fn last_rejection(&self) -> Option<Error> {
        self.inner.last_rejection.lock().clone()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_ready(&self) -> Result<()> {
        if !self.inner.store.is_available() {
            return Err(Error::AdapterUnavailable("local store"));
        }
        if !self.inner.remote.is_connected() {
            return Err(Error::AdapterUnavailable("remote client"));
        }
        Ok(())
    }

    fn check_partial_fields(&self, fields: &Fields) -> Result<()> {
        if fields.is_empty() {
            return Err(Error::malformed("partial update with no fields"));
        }
        for name in fields.keys() {
            if name == ID_KEY || name == WIRE_ID_KEY {
                return Err(Error::malformed("the primary key cannot be updated"));
            }
            if name.is_empty() || name.starts_with('$') || name.contains('.') {
                return Err(Error::malformed(format!("invalid field name '{name}'")));
            }
            if self.inner.config.strict_fields && !D::declares(name) {
                return Err(Error::malformed(format!("unknown field '{name}'")));
            }
        }
        Ok(())
    }

    /// Await `ack` off the caller's path and settle `pending` with it.
    fn track(&self, pending: PendingWrite<D>, mark: u64, ack: Ack) {
        self.inner.in_flight.begin();
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            let outcome = ack.await;
            inner.settle(pending, mark, outcome);
            inner.in_flight.end();
        });
    }
}

impl<D: Document, S: LocalStore<D>> Inner<D, S> {
    fn apply_event(&self, event: &RemoteEvent) -> Result<Applied> {
        let applied = reconcile::apply_event_with::<D, S>(&self.store, &self.name, event, &|id| {
            self.marks.touch(id)
        })?;
        if applied.is_write() {
            bump(&self.counters.events_applied);
        }
        tracing::debug!(
            collection = %self.name,
            id = %event.id(),
            event = event.kind(),
            ?applied,
            "Applied remote event"
        );
        Ok(applied)
    }

    fn settle(&self, pending: PendingWrite<D>, mark: u64, outcome: RemoteResult) {
        let error = match outcome {
            Ok(_) => {
                self.marks.finish(&pending.id, mark);
                bump(&self.counters.confirmed);
                tracing::trace!(
                    collection = %self.name,
                    id = %pending.id,
                    kind = %pending.kind,
                    "Remote confirmed write"
                );
                return;
            }
            Err(error) => Error::from(error),
        };

        bump(&self.counters.compensations);
        let id = pending.id.clone();
        let kind = pending.kind;
        tracing::warn!(
            collection = %self.name,
            id = %id,
            kind = %kind,
            error = %error,
            "Remote rejected write, compensating"
        );
        *self.last_rejection.lock() = Some(error);

        let finished = Cell::new(false);
        let result = pending.compensate_unless(&self.store, || {
            finished.set(true);
            self.marks.finish(&id, mark)
        });
        if !finished.get() {
            self.marks.finish(&id, mark);
        }

        match result {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    collection = %self.name,
                    id = %id,
                    kind = %kind,
                    "Compensation skipped, local copy already reflects the remote"
                );
            }
            Err(e) => {
                tracing::error!(
                    collection = %self.name,
                    id = %id,
                    kind = %kind,
                    "Compensation failed: {}",
                    e
                );
            }
        }
    }
}
