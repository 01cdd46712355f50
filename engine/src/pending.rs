//! Pending writes - optimistic mutations awaiting the remote's verdict.
//!
//! A [`PendingWrite`] lives only in memory, from the moment the optimistic
//! local mutation commits until its [`Ack`](crate::Ack) resolves. On failure
//! it is turned into a compensating transaction; on success it is dropped.

use crate::remote::WriteKind;
use crate::store::{LocalStore, Transaction};
use crate::{error::Result, Document, DocumentId, Fields};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// How to reverse an optimistic write.
#[derive(Debug, Clone, PartialEq)]
pub enum Compensation<D> {
    /// Remove a document that was optimistically inserted.
    Discard,
    /// Revert an update: `before` is the prior state, `after` what the
    /// optimistic write stored.
    Restore { before: D, after: D },
    /// Re-insert a document that was optimistically removed.
    Reinsert(D),
}

/// An in-flight optimistic write and its compensation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite<D> {
    /// Kind of remote call issued
    pub kind: WriteKind,
    /// Target document
    pub id: DocumentId,
    /// Reversal applied if the remote rejects the write
    pub compensation: Compensation<D>,
}

impl<D: Document> PendingWrite<D> {
    /// Pending record for an optimistic insert.
    pub fn insert(id: impl Into<DocumentId>) -> Self {
        Self {
            kind: WriteKind::Insert,
            id: id.into(),
            compensation: Compensation::Discard,
        }
    }

    /// Pending record for an optimistic update.
    pub fn update(before: D, after: D) -> Self {
        Self {
            kind: WriteKind::Update,
            id: before.id().to_string(),
            compensation: Compensation::Restore { before, after },
        }
    }

    /// Pending record for an optimistic remove, holding the removed document.
    pub fn remove(removed: D) -> Self {
        Self {
            kind: WriteKind::Remove,
            id: removed.id().to_string(),
            compensation: Compensation::Reinsert(removed),
        }
    }

    /// Apply the compensation as one scoped transaction.
    ///
    /// Returns whether anything was written.
    pub fn compensate<S: LocalStore<D>>(self, store: &S) -> Result<bool> {
        self.compensate_unless(store, || false)
    }

    /// Apply the compensation unless the remote has already spoken for this
    /// document.
    ///
    /// `superseded` runs inside the compensating transaction and reports
    /// whether a remote event addressed the document after the optimistic
    /// write. If so, a discard or re-insert is skipped: the local copy
    /// already reflects the server. Updates are always reverted at field
    /// level, see [`restore`].
    pub fn compensate_unless<S, F>(self, store: &S, superseded: F) -> Result<bool>
    where
        S: LocalStore<D>,
        F: FnOnce() -> bool,
    {
        let id = self.id;
        store.write(move |txn| {
            let superseded = superseded();
            match self.compensation {
                Compensation::Discard => {
                    if superseded {
                        return Ok(false);
                    }
                    Ok(txn.delete(&id).is_some())
                }
                Compensation::Restore { before, after } => restore(txn, &id, before, &after),
                Compensation::Reinsert(removed) => {
                    if superseded || txn.contains(&id) {
                        return Ok(false);
                    }
                    txn.add(removed, false)?;
                    Ok(true)
                }
            }
        })
    }
}

/// Revert an update by value.
///
/// Fields still holding the value the optimistic write stored go back to
/// their prior value; fields changed since by anyone else keep the newer
/// value. A document removed in the meantime stays removed.
fn restore<D: Document>(
    txn: &mut dyn Transaction<D>,
    id: &str,
    before: D,
    after: &D,
) -> Result<bool> {
    let Some(current) = txn.get(id) else {
        return Ok(false);
    };

    let current = current.json_value();
    let written = after.json_value();
    if current == written {
        txn.add(before, true)?;
        return Ok(true);
    }

    let newer: Fields = current
        .iter()
        .filter(|(name, value)| written.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let mut restored = before;
    restored.apply(&newer)?;
    for name in written.keys().filter(|name| !current.contains_key(*name)) {
        restored.clear_field(name);
    }
    txn.add(restored, true)?;
    Ok(true)
}

#[derive(Debug, Default)]
struct Mark {
    pending: usize,
    events: u64,
}

/// Per-document count of remote events received while optimistic writes on
/// that document are in flight, whether or not they changed the store.
///
/// Only ids with at least one pending write are tracked. `begin`, `touch`
/// and `finish` are called from inside store transactions, so their order
/// matches the order of the writes they describe.
#[derive(Debug, Default)]
pub(crate) struct RemoteMarks {
    marks: Mutex<HashMap<DocumentId, Mark>>,
}

impl RemoteMarks {
    /// Start tracking a write on `id`; returns the current event count.
    pub(crate) fn begin(&self, id: &str) -> u64 {
        let mut marks = self.marks.lock();
        let mark = marks.entry(id.to_string()).or_default();
        mark.pending += 1;
        mark.events
    }

    /// Record a remote event addressed to `id`.
    pub(crate) fn touch(&self, id: &str) {
        if let Some(mark) = self.marks.lock().get_mut(id) {
            mark.events += 1;
        }
    }

    /// Stop tracking one write on `id`; returns whether an event arrived
    /// since `since`.
    pub(crate) fn finish(&self, id: &str, since: u64) -> bool {
        let mut marks = self.marks.lock();
        let Some(mark) = marks.get_mut(id) else {
            return false;
        };
        let touched = mark.events != since;
        mark.pending = mark.pending.saturating_sub(1);
        if mark.pending == 0 {
            marks.remove(id);
        }
        touched
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.marks.lock().len()
    }
}

/// Counts optimistic writes whose acks have not resolved yet.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    /// Register a new in-flight write.
    pub(crate) fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark one write as settled.
    pub(crate) fn end(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until no write is in flight.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}
