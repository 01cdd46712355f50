//! Client sessions.
//!
//! A [`HubSession`] is one connected client. It implements
//! [`RemoteClient`], so an engine `Collection` can use it directly as its
//! remote. Calls are queued to a per-session worker task and executed in
//! the order they were made, each after the configured latency.

use crate::error::{HubError, Result};
use crate::server::{Call, Hub};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_engine::{
    completion, generate_id, Ack, Completer, DocumentId, RemoteClient, RemoteError, RemoteEvent,
    WriteKind,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// A queued call and the completion it resolves.
struct Job {
    call: Call,
    completer: Completer,
    reject: bool,
}

/// One client connected to a [`Hub`].
pub struct HubSession {
    id: String,
    hub: Arc<Hub>,
    jobs: mpsc::UnboundedSender<Job>,
    connected: Arc<AtomicBool>,
    rejections: DashMap<WriteKind, usize>,
}

impl std::fmt::Debug for HubSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSession")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl HubSession {
    pub(crate) fn open(hub: Arc<Hub>) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|_| HubError::NoRuntime)?;
        let id = uuid::Uuid::new_v4().to_string();
        let connected = Arc::new(AtomicBool::new(true));
        let (jobs, queue) = mpsc::unbounded_channel();

        runtime.spawn(run_worker(
            Arc::clone(&hub),
            id.clone(),
            Arc::clone(&connected),
            queue,
        ));
        tracing::info!(session = %id, "Session connected");

        Ok(Arc::new(Self {
            id,
            hub,
            jobs,
            connected,
            rejections: DashMap::new(),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Make the next `kind` call issued by this session fail with a
    /// permission error instead of executing. Calls accumulate.
    pub fn reject_next(&self, kind: WriteKind) {
        *self.rejections.entry(kind).or_default() += 1;
    }

    /// Drop the connection.
    ///
    /// Queued calls fail with a disconnected error and every subscription
    /// stream of this session closes.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let closed = self.hub.subscriptions().unregister_session(&self.id);
            tracing::info!(session = %self.id, subscriptions = closed, "Session disconnected");
        }
    }

    fn take_rejection(&self, kind: WriteKind) -> bool {
        match self.rejections.get_mut(&kind) {
            Some(mut pending) if *pending > 0 => {
                *pending -= 1;
                true
            }
            _ => false,
        }
    }

    fn dispatch(&self, call: Call) -> Ack {
        if !self.is_connected() {
            return Ack::ready(Err(HubError::Disconnected.into()));
        }
        let reject = self.take_rejection(call.kind());
        let (completer, ack) = completion();
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(Job {
            call,
            completer,
            reject,
        }) {
            job.completer.fail(HubError::Disconnected.into());
        }
        ack
    }
}

impl RemoteClient for HubSession {
    fn insert(&self, collection: &str, documents: Vec<Value>) -> Ack {
        self.dispatch(Call::Insert {
            collection: collection.to_string(),
            documents,
        })
    }

    fn update(&self, collection: &str, args: Vec<Value>) -> Ack {
        self.dispatch(Call::Update {
            collection: collection.to_string(),
            args,
        })
    }

    fn remove(&self, collection: &str, selector: Value) -> Ack {
        self.dispatch(Call::Remove {
            collection: collection.to_string(),
            selector,
        })
    }

    fn subscribe(&self, collection: &str) -> mpsc::UnboundedReceiver<RemoteEvent> {
        if !self.is_connected() {
            // Sender dropped here, so the stream is already closed
            return mpsc::unbounded_channel().1;
        }
        self.hub.subscribe(&self.id, collection).1
    }

    fn get_id(&self) -> Option<DocumentId> {
        Some(generate_id())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for HubSession {
    fn drop(&mut self) {
        self.hub.subscriptions().unregister_session(&self.id);
    }
}

async fn run_worker(
    hub: Arc<Hub>,
    session_id: String,
    connected: Arc<AtomicBool>,
    mut queue: mpsc::UnboundedReceiver<Job>,
) {
    let latency = hub.config().latency;
    while let Some(job) = queue.recv().await {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let kind = job.call.kind();
        let result = if !connected.load(Ordering::SeqCst) {
            Err(HubError::Disconnected)
        } else if job.reject {
            Err(HubError::Rejected(kind))
        } else {
            hub.execute(Some(&session_id), job.call)
        };

        if let Err(e) = &result {
            tracing::debug!(session = %session_id, kind = %kind, error = %e, "Call failed");
        }
        job.completer.complete(result.map_err(RemoteError::from));
    }
    tracing::debug!(session = %session_id, "Session worker stopped");
}
