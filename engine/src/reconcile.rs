//! Remote-event application.
//!
//! Applies server-originated `added` / `changed` / `removed` notifications to
//! the local store. Every handler keys on the primary key and checks
//! existence inside its own scoped write, which makes them idempotent and
//! safe to interleave with optimistic writes and their compensations.
//!
//! # State machine (per document id)
//!
//! | event     | absent                | present                          |
//! |-----------|-----------------------|----------------------------------|
//! | `added`   | materialize, insert   | replace fields with the server's |
//! | `changed` | ignore                | apply fields, clear names        |
//! | `removed` | ignore                | delete                           |

use crate::remote::RemoteEvent;
use crate::store::LocalStore;
use crate::{error::Result, Document, Error, Fields};
use serde::Serialize;

/// What applying one event did to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Applied {
    /// `added` for an absent document
    Inserted,
    /// `added` for a present document (server state wins)
    Replaced,
    /// `changed` for a present document
    Updated,
    /// `removed` for a present document
    Removed,
    /// Event had no effect: absent target, or a different collection
    Ignored,
}

impl Applied {
    /// Whether the store was written.
    pub fn is_write(self) -> bool {
        !matches!(self, Applied::Ignored)
    }
}

/// Apply a single remote event for the collection named `collection`.
///
/// Events addressed to other collections are ignored. A field map the
/// document type rejects fails with [`Error::MalformedFields`] and leaves the
/// store untouched.
pub fn apply_event<D, S>(store: &S, collection: &str, event: &RemoteEvent) -> Result<Applied>
where
    D: Document,
    S: LocalStore<D>,
{
    apply_event_with::<D, S>(store, collection, event, &|_| {})
}

/// Like [`apply_event`], calling `on_event` with the document id from inside
/// the event's transaction.
///
/// The hook fires for every well-formed event addressed to `collection`,
/// including ones that find nothing to change: an ignored `removed` still
/// tells the caller the server has spoken for that id.
pub fn apply_event_with<D, S>(
    store: &S,
    collection: &str,
    event: &RemoteEvent,
    on_event: &dyn Fn(&str),
) -> Result<Applied>
where
    D: Document,
    S: LocalStore<D>,
{
    if event.collection() != collection {
        return Ok(Applied::Ignored);
    }
    if event.id().is_empty() {
        return Err(Error::MissingId);
    }

    match event {
        RemoteEvent::Added { id, fields, .. } => apply_added::<D, S>(store, id, fields, on_event),
        RemoteEvent::Changed {
            id,
            fields,
            cleared,
            ..
        } => apply_changed::<D, S>(store, id, fields, cleared, on_event),
        RemoteEvent::Removed { id, .. } => store.write(|txn| {
            on_event(id);
            Ok(match txn.delete(id) {
                Some(_) => Applied::Removed,
                None => Applied::Ignored,
            })
        }),
    }
}

fn apply_added<D, S>(
    store: &S,
    id: &str,
    fields: &Fields,
    on_event: &dyn Fn(&str),
) -> Result<Applied>
where
    D: Document,
    S: LocalStore<D>,
{
    // A fresh document, so the result carries exactly the server's fields
    // whether or not a local copy already exists.
    let mut doc = D::materialize(id.to_string());
    doc.apply(fields)?;

    store.write(|txn| {
        on_event(id);
        let existed = txn.contains(id);
        txn.add(doc, true)?;
        Ok(if existed {
            Applied::Replaced
        } else {
            Applied::Inserted
        })
    })
}

fn apply_changed<D, S>(
    store: &S,
    id: &str,
    fields: &Fields,
    cleared: &[String],
    on_event: &dyn Fn(&str),
) -> Result<Applied>
where
    D: Document,
    S: LocalStore<D>,
{
    store.write(|txn| {
        on_event(id);
        let Some(current) = txn.get(id) else {
            return Ok(Applied::Ignored);
        };
        let mut doc = current.clone();
        doc.apply(fields)?;
        for name in cleared {
            if !doc.clear_field(name) {
                tracing::trace!(id = %id, field = %name, "Cleared field not declared, skipping");
            }
        }
        txn.add(doc, true)?;
        Ok(Applied::Updated)
    })
}
