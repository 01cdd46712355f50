//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_engine::{
    completion, Ack, Completer, Document, DocumentId, Error, FieldDescriptor, Fields,
    RemoteClient, RemoteError, RemoteEvent, Result, WriteKind,
};
use tokio::sync::mpsc;

/// Typed test document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct City {
    pub id: String,
    pub city: String,
    pub state: String,
    pub population: i64,
}

const CITY_FIELDS: &[FieldDescriptor<City>] = &[
    FieldDescriptor::new("city", |c| json!(c.city), |c| c.city.clear()),
    FieldDescriptor::new("state", |c| json!(c.state), |c| c.state.clear()),
    FieldDescriptor::new("population", |c| json!(c.population), |c| c.population = 0),
];

fn string_field(name: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::malformed(format!("'{name}' must be a string")))
}

impl Document for City {
    fn materialize(id: DocumentId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn descriptors() -> &'static [FieldDescriptor<Self>] {
        CITY_FIELDS
    }

    fn apply(&mut self, fields: &Fields) -> Result<()> {
        // Validate everything before assigning anything
        let mut next = self.clone();
        for (name, value) in fields {
            match name.as_str() {
                "city" => next.city = string_field(name, value)?,
                "state" => next.state = string_field(name, value)?,
                "population" => {
                    next.population = value
                        .as_i64()
                        .ok_or_else(|| Error::malformed("'population' must be an integer"))?
                }
                _ => {}
            }
        }
        *self = next;
        Ok(())
    }
}

/// Build a field map from a JSON object literal.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// One call recorded by [`ScriptedRemote`].
#[derive(Debug)]
pub struct Call {
    pub kind: WriteKind,
    pub collection: String,
    pub args: Value,
    completer: Option<Completer>,
}

/// Remote double whose calls are resolved by the test.
#[derive(Debug, Default)]
pub struct ScriptedRemote {
    calls: Mutex<Vec<Call>>,
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<RemoteEvent>)>>,
    disconnected: AtomicBool,
    remote_id: Mutex<Option<String>>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, kind: WriteKind, collection: &str, args: Value) -> Ack {
        let (completer, ack) = completion();
        self.calls.lock().push(Call {
            kind,
            collection: collection.to_string(),
            args,
            completer: Some(completer),
        });
        ack
    }

    /// `(kind, args)` for every call so far.
    pub fn calls(&self) -> Vec<(WriteKind, Value)> {
        self.calls
            .lock()
            .iter()
            .map(|c| (c.kind, c.args.clone()))
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Resolve call `index`.
    pub fn resolve(&self, index: usize, result: std::result::Result<Value, RemoteError>) {
        let completer = self.calls.lock()[index]
            .completer
            .take()
            .expect("call already resolved");
        completer.complete(result);
    }

    pub fn succeed(&self, index: usize) {
        self.resolve(index, Ok(json!(1)));
    }

    pub fn fail(&self, index: usize) {
        self.resolve(
            index,
            Err(RemoteError::new("403", Some("Access denied".into()))),
        );
    }

    /// Resolve every outstanding call successfully.
    pub fn succeed_all(&self) {
        for call in self.calls.lock().iter_mut() {
            if let Some(c) = call.completer.take() {
                c.succeed(json!(1));
            }
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    pub fn set_remote_id(&self, id: &str) {
        *self.remote_id.lock() = Some(id.to_string());
    }

    /// Deliver an event to every subscriber of its collection.
    pub fn emit(&self, event: RemoteEvent) {
        for (collection, tx) in self.subscribers.lock().iter() {
            if collection == event.collection() {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Close every event stream.
    pub fn close_streams(&self) {
        self.subscribers.lock().clear();
    }
}

impl RemoteClient for ScriptedRemote {
    fn insert(&self, collection: &str, documents: Vec<Value>) -> Ack {
        self.record(WriteKind::Insert, collection, Value::Array(documents))
    }

    fn update(&self, collection: &str, modifier: Vec<Value>) -> Ack {
        self.record(WriteKind::Update, collection, Value::Array(modifier))
    }

    fn remove(&self, collection: &str, selector: Value) -> Ack {
        self.record(WriteKind::Remove, collection, selector)
    }

    fn subscribe(&self, collection: &str) -> mpsc::UnboundedReceiver<RemoteEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push((collection.to_string(), tx));
        rx
    }

    fn get_id(&self) -> Option<DocumentId> {
        self.remote_id.lock().clone()
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}
