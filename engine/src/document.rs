//! Document types: the canonical unit of mirrored data.
//!
//! A document is identified by an immutable primary key and projects itself
//! into a generic structured value ([`Fields`]) through an explicit, per-type
//! list of [`FieldDescriptor`]s. No runtime reflection is involved: a concrete
//! type declares which fields it has and how to read and clear them.

use crate::{error::Result, DocumentId, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generic structured-value representation of a document's fields.
pub type Fields = serde_json::Map<String, Value>;

/// Key used for the primary key on the wire.
pub const WIRE_ID_KEY: &str = "_id";

/// Key accepted for the primary key in caller-supplied field maps.
pub const ID_KEY: &str = "id";

/// Accessor pair for one declared field of a document type.
pub struct FieldDescriptor<D> {
    /// Field name as it appears in [`Fields`]
    pub name: &'static str,
    /// Read the current value
    pub get: fn(&D) -> Value,
    /// Reset the field to its empty value
    pub clear: fn(&mut D),
}

impl<D> FieldDescriptor<D> {
    /// Create a descriptor.
    pub const fn new(name: &'static str, get: fn(&D) -> Value, clear: fn(&mut D)) -> Self {
        Self { name, get, clear }
    }
}

impl<D> std::fmt::Debug for FieldDescriptor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .finish()
    }
}

/// A document stored in a [`Collection`](crate::Collection).
///
/// Implementors supply [`Document::materialize`], [`Document::id`] and the
/// field descriptors; [`Document::apply`] is the single place to validate and
/// assign incoming fields. The engine never inspects field shapes itself.
pub trait Document: Clone + Send + Sync + 'static {
    /// Create an empty, unsaved document carrying the given primary key.
    fn materialize(id: DocumentId) -> Self;

    /// The immutable primary key.
    fn id(&self) -> &str;

    /// Declared fields of this document type.
    fn descriptors() -> &'static [FieldDescriptor<Self>];

    /// Shallow projection of every declared field to its current value.
    ///
    /// Nested documents override this to control serialization.
    fn json_value(&self) -> Fields {
        Self::descriptors()
            .iter()
            .map(|d| (d.name.to_string(), (d.get)(self)))
            .collect()
    }

    /// Validate and assign incoming fields.
    ///
    /// The default accepts and ignores everything.
    fn apply(&mut self, fields: &Fields) -> Result<()> {
        let _ = fields;
        Ok(())
    }

    /// Reset one field to its empty value. Returns `false` for unknown names.
    fn clear_field(&mut self, name: &str) -> bool {
        match Self::descriptors().iter().find(|d| d.name == name) {
            Some(d) => {
                (d.clear)(self);
                true
            }
            None => false,
        }
    }

    /// Whether `name` is a field of this document type.
    fn declares(name: &str) -> bool {
        Self::descriptors().iter().any(|d| d.name == name)
    }
}

/// Remove and return the primary key from a field map.
///
/// Both `id` and the wire key `_id` are accepted. A key that is present but
/// not a non-empty string is rejected.
pub fn take_id(fields: &mut Fields) -> Result<Option<DocumentId>> {
    let mut found = None;
    for key in [ID_KEY, WIRE_ID_KEY] {
        if let Some(value) = fields.remove(key) {
            match value {
                Value::String(s) if !s.is_empty() => {
                    if found.as_ref().is_some_and(|prev: &String| *prev != s) {
                        return Err(Error::malformed("conflicting 'id' and '_id' values"));
                    }
                    found = Some(s);
                }
                _ => return Err(Error::MissingId),
            }
        }
    }
    Ok(found)
}

/// Serialized form of a document as sent to the remote: its fields plus `_id`.
pub fn wire_value<D: Document>(doc: &D) -> Value {
    let mut fields = doc.json_value();
    fields.insert(WIRE_ID_KEY.to_string(), Value::String(doc.id().to_string()));
    Value::Object(fields)
}

/// A document with an open set of fields.
///
/// Used when no concrete schema exists. Every field name is accepted and
/// clearing a field sets it to the empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicDocument {
    id: DocumentId,
    fields: Fields,
}

impl DynamicDocument {
    /// Create a document from an id and an initial field map.
    pub fn new(id: impl Into<DocumentId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// All fields.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }
}

impl Document for DynamicDocument {
    fn materialize(id: DocumentId) -> Self {
        Self {
            id,
            fields: Fields::new(),
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn descriptors() -> &'static [FieldDescriptor<Self>] {
        &[]
    }

    fn json_value(&self) -> Fields {
        self.fields.clone()
    }

    fn apply(&mut self, fields: &Fields) -> Result<()> {
        for (name, value) in fields {
            if name == ID_KEY || name == WIRE_ID_KEY {
                continue;
            }
            self.fields.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    fn clear_field(&mut self, name: &str) -> bool {
        self.fields
            .insert(name.to_string(), Value::String(String::new()));
        true
    }

    fn declares(_name: &str) -> bool {
        true
    }
}
