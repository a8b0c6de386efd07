//! Chat Dispatcher
//!
//! Single logical event loop in front of the [`ChatBroadcastService`]. It is
//! the only writer of the connection registry.
//!
//! ```text
//!   transport tasks                     ChatDispatcher (one task)
//!  ┌──────────────────┐ DispatchEvent ┌──────────────────────────────┐
//!  │ DispatcherHandle ├──────────────►│ connect / chat / relay /     │
//!  └──────────────────┘               │ disconnect, one at a time    │
//!                                     └───────┬─────────────▲────────┘
//!                                             │ spawn       │ Completion
//!                                     ┌───────▼─────────────┴────────┐
//!                                     │ store tasks (list / append)  │
//!                                     └──────────────────────────────┘
//! ```
//!
//! Store work runs in spawned tasks and re-enters the loop as completions, so
//! a slow store never stalls admission, relays or disconnects. A connection's
//! submissions are persisted strictly one after another in arrival order; at
//! most `max_pending` of them wait behind the in-flight append, the rest are
//! dropped.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::errors::{ChatResult, PersistenceError};
use super::registry::PeerSink;
use super::service::{persist_submission, ChatBroadcastService};
use super::types::{ChatSubmission, ConnectionId, HistorySnapshot};
use crate::shutdown::ShutdownSignal;

/// The dispatcher task is gone
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("chat dispatcher is not running")]
pub struct DispatcherClosed;

/// Events a transport feeds into the dispatcher
pub enum DispatchEvent {
    Connect {
        id: ConnectionId,
        sink: Box<dyn PeerSink>,
        identity: Option<String>,
    },
    Chat {
        id: ConnectionId,
        submission: ChatSubmission,
    },
    Ephemeral {
        id: ConnectionId,
        name: String,
        payload: serde_json::Value,
    },
    Disconnect {
        id: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<DispatcherStats>,
    },
}

/// Point-in-time view of the dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub admitted_peers: usize,
    pub in_flight_submissions: usize,
    pub queued_submissions: usize,
}

enum Completion {
    Replay {
        id: ConnectionId,
        result: Result<HistorySnapshot, PersistenceError>,
    },
    Persisted {
        id: ConnectionId,
        result: ChatResult<HistorySnapshot>,
    },
}

#[derive(Default)]
struct SubmissionQueue {
    in_flight: bool,
    pending: VecDeque<ChatSubmission>,
}

/// Cloneable handle for feeding events to the dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    events_tx: mpsc::Sender<DispatchEvent>,
}

impl DispatcherHandle {
    pub async fn connect(
        &self,
        id: ConnectionId,
        sink: Box<dyn PeerSink>,
        identity: Option<String>,
    ) -> Result<(), DispatcherClosed> {
        self.send(DispatchEvent::Connect { id, sink, identity }).await
    }

    pub async fn submit(&self, id: ConnectionId, submission: ChatSubmission) -> Result<(), DispatcherClosed> {
        self.send(DispatchEvent::Chat { id, submission }).await
    }

    pub async fn relay(
        &self,
        id: ConnectionId,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), DispatcherClosed> {
        self.send(DispatchEvent::Ephemeral {
            id,
            name: name.into(),
            payload,
        })
        .await
    }

    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), DispatcherClosed> {
        self.send(DispatchEvent::Disconnect { id }).await
    }

    pub async fn stats(&self) -> Result<DispatcherStats, DispatcherClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatchEvent::Stats { reply }).await?;
        rx.await.map_err(|_| DispatcherClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.events_tx.is_closed()
    }

    async fn send(&self, event: DispatchEvent) -> Result<(), DispatcherClosed> {
        self.events_tx.send(event).await.map_err(|_| DispatcherClosed)
    }
}

/// Event loop owning the broadcast service
pub struct ChatDispatcher {
    service: ChatBroadcastService,
    events_rx: mpsc::Receiver<DispatchEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    queues: HashMap<ConnectionId, SubmissionQueue>,
    max_pending: usize,
}

impl ChatDispatcher {
    /// Create a dispatcher and the handle that feeds it
    pub fn new(
        service: ChatBroadcastService,
        capacity: usize,
        max_pending: usize,
    ) -> (Self, DispatcherHandle) {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let dispatcher = Self {
            service,
            events_rx,
            completions_tx,
            completions_rx,
            queues: HashMap::new(),
            max_pending,
        };
        (dispatcher, DispatcherHandle { events_tx })
    }

    /// Spawn the event loop; it stops on `shutdown` or once every handle is dropped
    pub fn spawn(
        service: ChatBroadcastService,
        capacity: usize,
        max_pending: usize,
        shutdown: broadcast::Receiver<ShutdownSignal>,
    ) -> (DispatcherHandle, JoinHandle<()>) {
        let (dispatcher, handle) = Self::new(service, capacity, max_pending);
        let task = tokio::spawn(dispatcher.run(shutdown));
        (handle, task)
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        info!("Chat dispatcher started");

        loop {
            tokio::select! {
                biased;

                signal = shutdown.recv() => {
                    info!(?signal, "Chat dispatcher received shutdown signal");
                    break;
                }
                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion);
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!("All dispatcher handles dropped");
                        break;
                    }
                },
            }
        }

        info!(peers = self.service.registry().len(), "Chat dispatcher stopped");
    }

    fn handle_event(&mut self, event: DispatchEvent) {
        match event {
            DispatchEvent::Connect { id, sink, identity } => {
                if self.service.admit(id, sink, identity) {
                    self.spawn_replay(id);
                }
            }
            DispatchEvent::Chat { id, submission } => self.enqueue_submission(id, submission),
            DispatchEvent::Ephemeral { id, name, payload } => {
                self.service.relay(&id, &name, payload);
            }
            DispatchEvent::Disconnect { id } => {
                if let Some(queue) = self.queues.remove(&id) {
                    if !queue.pending.is_empty() {
                        debug!(connection = %id, dropped = queue.pending.len(), "Dropping queued submissions");
                    }
                }
                self.service.disconnect(&id);
            }
            DispatchEvent::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Replay { id, result } => match result {
                Ok(snapshot) => {
                    self.service.deliver_replay(&id, &snapshot);
                }
                Err(e) => warn!(connection = %id, "History replay failed: {}", e),
            },
            Completion::Persisted { id, result } => {
                match result {
                    Ok(history) => {
                        self.service.complete_submission(&id, &history);
                    }
                    Err(e) => self.service.record_failure(&id, &e),
                }
                if let Some(queue) = self.queues.get_mut(&id) {
                    queue.in_flight = false;
                }
                self.start_next(id);
            }
        }
    }

    fn enqueue_submission(&mut self, id: ConnectionId, submission: ChatSubmission) {
        if let Err(e) = self.service.authorize(&id, &submission) {
            self.service.record_failure(&id, &e.into());
            return;
        }
        let queue = self.queues.entry(id).or_default();
        if queue.pending.len() >= self.max_pending {
            self.service.metrics().submission_overflowed();
            warn!(
                connection = %id,
                queued = queue.pending.len(),
                "Submission queue full, dropping chat submission"
            );
            return;
        }
        queue.pending.push_back(submission);
        self.start_next(id);
    }

    fn start_next(&mut self, id: ConnectionId) {
        let Some(queue) = self.queues.get_mut(&id) else {
            return;
        };
        if queue.in_flight {
            return;
        }
        let Some(submission) = queue.pending.pop_front() else {
            self.queues.remove(&id);
            return;
        };
        queue.in_flight = true;

        let store = self.service.store();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = persist_submission(store.as_ref(), &submission).await;
            let _ = completions.send(Completion::Persisted { id, result });
        });
    }

    fn spawn_replay(&self, id: ConnectionId) {
        let store = self.service.store();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = store.list_all().await;
            let _ = completions.send(Completion::Replay { id, result });
        });
    }

    fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            admitted_peers: self.service.registry().len(),
            in_flight_submissions: self.queues.values().filter(|q| q.in_flight).count(),
            queued_submissions: self.queues.values().map(|q| q.pending.len()).sum(),
        }
    }
}
