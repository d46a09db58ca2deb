//! Session-addressed publish/subscribe.
//!
//! One [`SessionEventRouter`] is created at service start and shared by
//! reference. Events are namespaced by session id and [`EventKind`]; there is
//! no replay, so a subscriber only sees what is published after it attached.
//! Producers call [`SessionEventRouter::unsubscribe_all`] right after a
//! terminal event, which ends every open [`Subscription`] for that session.
//! A dropped [`Subscription`] removes itself, so listeners that go away
//! before teardown leave nothing behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::TranscodeError;
use crate::batch::{BatchProgress, BatchResult};
use crate::progress::ProgressEvent;
use crate::task::TaskOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Complete,
    BatchProgress,
    BatchComplete,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        Self::Progress,
        Self::Complete,
        Self::BatchProgress,
        Self::BatchComplete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Complete => "complete",
            Self::BatchProgress => "batch-progress",
            Self::BatchComplete => "batch-complete",
        }
    }

    /// Wire topic, e.g. `progress:1700000000000`.
    pub fn topic(self, session_id: &str) -> String {
        format!("{}:{session_id}", self.as_str())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::BatchComplete)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal payload of a single-file session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub success: bool,
    pub output_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TaskOutcome> for CompletePayload {
    fn from(outcome: &TaskOutcome) -> Self {
        Self {
            success: outcome.is_success(),
            output_file: outcome.output_file().map(str::to_string),
            error: outcome.error(),
        }
    }
}

/// Payload published on a session topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SessionEvent {
    Progress(ProgressEvent),
    Complete(CompletePayload),
    BatchProgress(BatchProgress),
    BatchComplete(BatchResult),
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Progress(_) => EventKind::Progress,
            Self::Complete(_) => EventKind::Complete,
            Self::BatchProgress(_) => EventKind::BatchProgress,
            Self::BatchComplete(_) => EventKind::BatchComplete,
        }
    }
}

/// Receiving end of a subscription. Dropping it removes it from the router.
pub struct Subscription {
    id: u64,
    session_id: String,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next event. `None` once the session has been torn down and every
    /// event published before that has been received.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            remove_subscriber(&registry, &self.session_id, self.id);
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

/// State of a batch as seen by the archive download path.
#[derive(Debug, Clone)]
enum RetainedBatch {
    Running,
    Complete(BatchResult),
}

#[derive(Default)]
struct SessionTopics {
    /// Set while a producer is running for the session.
    open: bool,
    topics: HashMap<EventKind, Vec<Subscriber>>,
}

type Registry = Mutex<HashMap<String, SessionTopics>>;

#[derive(Default)]
pub struct SessionEventRouter {
    sessions: Arc<Registry>,
    batches: Mutex<HashMap<String, RetainedBatch>>,
    next_id: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn remove_subscriber(registry: &Registry, session_id: &str, id: u64) {
    let mut sessions = lock(registry);
    let Some(session) = sessions.get_mut(session_id) else {
        return;
    };
    for list in session.topics.values_mut() {
        list.retain(|sub| sub.id != id);
    }
    session.topics.retain(|_, list| !list.is_empty());
    if session.topics.is_empty() && !session.open {
        sessions.remove(session_id);
    }
}

impl SessionEventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a session as having a live producer. Until the producer calls
    /// [`unsubscribe_all`](Self::unsubscribe_all), [`attach`](Self::attach)
    /// accepts listeners for it.
    pub fn open_session(&self, session_id: &str) {
        lock(&self.sessions)
            .entry(session_id.to_string())
            .or_default()
            .open = true;
    }

    /// Subscribe to one kind of event for a session.
    pub fn subscribe(&self, session_id: &str, kind: EventKind) -> Subscription {
        self.subscribe_many(session_id, &[kind])
    }

    /// Subscribe to several kinds of event through one receiver.
    pub fn subscribe_many(&self, session_id: &str, kinds: &[EventKind]) -> Subscription {
        let mut sessions = lock(&self.sessions);
        let session = sessions.entry(session_id.to_string()).or_default();
        self.register(session, session_id, kinds)
    }

    /// Like [`subscribe_many`](Self::subscribe_many), but only for a session
    /// that is currently open. Unknown and finished sessions yield `None`.
    pub fn attach(&self, session_id: &str, kinds: &[EventKind]) -> Option<Subscription> {
        let mut sessions = lock(&self.sessions);
        let session = sessions.get_mut(session_id).filter(|s| s.open)?;
        Some(self.register(session, session_id, kinds))
    }

    fn register(
        &self,
        session: &mut SessionTopics,
        session_id: &str,
        kinds: &[EventKind],
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in kinds {
            session
                .topics
                .entry(*kind)
                .or_default()
                .push(Subscriber { id, tx: tx.clone() });
        }

        Subscription {
            id,
            session_id: session_id.to_string(),
            rx,
            registry: Arc::downgrade(&self.sessions),
        }
    }

    /// Deliver an event to every current subscriber of its kind. Returns the
    /// number of subscribers reached.
    pub fn publish(&self, session_id: &str, event: SessionEvent) -> usize {
        let kind = event.kind();
        let mut sessions = lock(&self.sessions);
        let Some(list) = sessions
            .get_mut(session_id)
            .and_then(|s| s.topics.get_mut(&kind))
        else {
            debug!(topic = %kind.topic(session_id), "no subscribers");
            return 0;
        };

        // Receivers that went away are pruned as we go.
        list.retain(|sub| sub.tx.send(event.clone()).is_ok());
        list.len()
    }

    /// Drop one subscription.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        remove_subscriber(&self.sessions, &subscription.session_id, subscription.id);
    }

    /// Remove every subscription of a session and close it.
    pub fn unsubscribe_all(&self, session_id: &str) {
        if lock(&self.sessions).remove(session_id).is_some() {
            debug!(session_id, "session subscriptions torn down");
        }
    }

    /// Live subscriptions for a session, counted once per subscriber.
    pub fn subscription_count(&self, session_id: &str) -> usize {
        let sessions = lock(&self.sessions);
        let Some(session) = sessions.get(session_id) else {
            return 0;
        };
        let mut ids: Vec<u64> = session.topics.values().flatten().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Sessions with a live producer or at least one subscriber.
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Record that a batch has started, so downloads can tell "running"
    /// apart from "unknown".
    pub fn mark_batch_running(&self, session_id: &str) {
        lock(&self.batches).insert(session_id.to_string(), RetainedBatch::Running);
    }

    pub fn retain_batch_result(&self, session_id: &str, result: BatchResult) {
        lock(&self.batches).insert(session_id.to_string(), RetainedBatch::Complete(result));
    }

    /// Result of a finished batch.
    pub fn batch_result(&self, session_id: &str) -> Result<BatchResult, TranscodeError> {
        match lock(&self.batches).get(session_id) {
            Some(RetainedBatch::Complete(result)) => Ok(result.clone()),
            Some(RetainedBatch::Running) => Err(TranscodeError::BatchNotReady(session_id.into())),
            None => Err(TranscodeError::SessionNotFound(session_id.into())),
        }
    }

    pub fn discard_batch_result(&self, session_id: &str) -> bool {
        lock(&self.batches).remove(session_id).is_some()
    }
}
