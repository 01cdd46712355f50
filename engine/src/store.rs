//! Local Store - the embedded, queryable side of the mirror.
//!
//! [`LocalStore`] is the contract the engine consumes: scoped atomic writes
//! and predicate reads over documents of one type. [`MemoryStore`] is the
//! in-process implementation shipped with the crate.

use crate::{error::Result, Document, DocumentId, Error};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mutations available inside a [`LocalStore::write`] scope.
///
/// Reads through the transaction observe its own staged changes.
pub trait Transaction<D: Document> {
    /// Get a document by id.
    fn get(&self, id: &str) -> Option<&D>;

    /// Add a document. Fails with [`Error::DuplicateId`] if one with the same
    /// id exists and `update_if_exists` is false.
    fn add(&mut self, document: D, update_if_exists: bool) -> Result<()>;

    /// Delete a document by id, returning it if it was present.
    fn delete(&mut self, id: &str) -> Option<D>;

    /// Delete every document, returning how many were removed.
    fn delete_all(&mut self) -> usize;

    /// Check whether a document exists.
    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

/// Contract over the embedded storage engine.
pub trait LocalStore<D: Document>: Send + Sync + 'static {
    /// Run `scope` as one atomic transaction.
    ///
    /// Changes become visible to readers only if `scope` returns `Ok`; an
    /// error discards everything the scope staged.
    fn write<R, F>(&self, scope: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Transaction<D>) -> Result<R>;

    /// All documents matching `predicate` (all documents when `None`),
    /// ordered by primary key.
    fn query(&self, predicate: Option<&dyn Fn(&D) -> bool>) -> Result<Vec<D>>;

    /// Get a document by id.
    fn get(&self, id: &str) -> Result<Option<D>> {
        Ok(self
            .query(Some(&|d: &D| d.id() == id))?
            .into_iter()
            .next())
    }

    /// Number of documents.
    fn count(&self) -> Result<usize> {
        Ok(self.query(None)?.len())
    }

    /// Whether the store can currently serve reads and writes.
    fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct Inner<D> {
    records: BTreeMap<DocumentId, D>,
    open: bool,
}

/// In-memory [`LocalStore`].
///
/// Cloning yields another handle to the same store. Writers are serialized
/// by a lock held for the duration of the scope; readers never observe a
/// partially applied transaction.
#[derive(Debug)]
pub struct MemoryStore<D> {
    inner: Arc<RwLock<Inner<D>>>,
}

impl<D> Clone for MemoryStore<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Document> Default for MemoryStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Document> MemoryStore<D> {
    /// Create an empty, open store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                records: BTreeMap::new(),
                open: true,
            })),
        }
    }

    /// Close the store. Every later read or write fails with
    /// [`Error::AdapterUnavailable`].
    pub fn close(&self) {
        self.inner.write().open = false;
        tracing::debug!("Local store closed");
    }

    /// Count of documents (ignores the open flag).
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Check if the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Document> LocalStore<D> for MemoryStore<D> {
    fn write<R, F>(&self, scope: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Transaction<D>) -> Result<R>,
    {
        let mut guard = self.inner.write();
        if !guard.open {
            return Err(Error::AdapterUnavailable("local store"));
        }

        let (result, changes) = {
            let mut txn = StagedTxn::new(&guard.records);
            let result = scope(&mut txn);
            (result, txn.into_changes())
        };

        // Commit only on success
        let value = result?;
        changes.commit(&mut guard.records);
        Ok(value)
    }

    fn query(&self, predicate: Option<&dyn Fn(&D) -> bool>) -> Result<Vec<D>> {
        let guard = self.inner.read();
        if !guard.open {
            return Err(Error::AdapterUnavailable("local store"));
        }
        Ok(match predicate {
            Some(p) => guard.records.values().filter(|d| p(d)).cloned().collect(),
            None => guard.records.values().cloned().collect(),
        })
    }

    fn get(&self, id: &str) -> Result<Option<D>> {
        let guard = self.inner.read();
        if !guard.open {
            return Err(Error::AdapterUnavailable("local store"));
        }
        Ok(guard.records.get(id).cloned())
    }

    fn count(&self) -> Result<usize> {
        let guard = self.inner.read();
        if !guard.open {
            return Err(Error::AdapterUnavailable("local store"));
        }
        Ok(guard.records.len())
    }

    fn is_available(&self) -> bool {
        self.inner.read().open
    }
}

/// Changes staged by a transaction, applied on commit.
struct Changes<D> {
    cleared: bool,
    // None marks a deletion
    staged: BTreeMap<DocumentId, Option<D>>,
}

impl<D> Changes<D> {
    fn commit(self, records: &mut BTreeMap<DocumentId, D>) {
        if self.cleared {
            records.clear();
        }
        for (id, entry) in self.staged {
            match entry {
                Some(doc) => {
                    records.insert(id, doc);
                }
                None => {
                    records.remove(&id);
                }
            }
        }
    }
}

/// Copy-on-write view over the committed records.
struct StagedTxn<'a, D> {
    base: &'a BTreeMap<DocumentId, D>,
    changes: Changes<D>,
}

impl<'a, D: Document> StagedTxn<'a, D> {
    fn new(base: &'a BTreeMap<DocumentId, D>) -> Self {
        Self {
            base,
            changes: Changes {
                cleared: false,
                staged: BTreeMap::new(),
            },
        }
    }

    fn into_changes(self) -> Changes<D> {
        self.changes
    }

    fn visible_len(&self) -> usize {
        let base = if self.changes.cleared {
            0
        } else {
            self.base
                .keys()
                .filter(|id| !self.changes.staged.contains_key(*id))
                .count()
        };
        base + self.changes.staged.values().filter(|e| e.is_some()).count()
    }
}

impl<D: Document> Transaction<D> for StagedTxn<'_, D> {
    fn get(&self, id: &str) -> Option<&D> {
        match self.changes.staged.get(id) {
            Some(entry) => entry.as_ref(),
            None if self.changes.cleared => None,
            None => self.base.get(id),
        }
    }

    fn add(&mut self, document: D, update_if_exists: bool) -> Result<()> {
        if document.id().is_empty() {
            return Err(Error::MissingId);
        }
        if !update_if_exists && self.contains(document.id()) {
            return Err(Error::DuplicateId(document.id().to_string()));
        }
        self.changes
            .staged
            .insert(document.id().to_string(), Some(document));
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Option<D> {
        let previous = self.get(id).cloned();
        if previous.is_some() {
            self.changes.staged.insert(id.to_string(), None);
        }
        previous
    }

    fn delete_all(&mut self) -> usize {
        let removed = self.visible_len();
        self.changes.cleared = true;
        self.changes.staged.clear();
        removed
    }
}
