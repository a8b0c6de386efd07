//! Chat Broadcast Service
//!
//! Orchestrates a peer's life in the chat stream:
//!
//! 1. **Connect**: admit the peer, tell everyone else someone joined, replay
//!    the stored history to the newcomer only.
//! 2. **Chat message**: append to the store, re-read the whole history and
//!    broadcast it to every admitted peer, sender included. Failures are
//!    logged and the submission is dropped.
//! 3. **Disconnect**: remove the peer; later events for it are ignored.
//!
//! Every history delivery carries the *full* history rather than a delta.
//! Peers converge on the latest snapshot they hold, whichever order replays and
//! live broadcasts race in. Each peer keeps a watermark (length of the
//! longest snapshot it was sent) and never gets a shorter one afterwards.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::errors::{ChatError, ChatResult, PersistenceError, ValidationError};
use super::registry::{ConnectionRegistry, Delivery, DeliveryReport, PeerSink};
use super::relay::EphemeralRelay;
use super::store::MessageStore;
use super::types::{ChatSubmission, ConnectionId, HistorySnapshot};
use super::{HISTORY_EVENT, JOIN_EVENT};
use crate::metrics::ChatMetrics;

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLifecycle {
    Connecting,
    Admitted,
    Disconnected,
}

#[derive(Debug)]
struct PeerSession {
    lifecycle: PeerLifecycle,
    /// Identity established by the session layer before the transport connected
    identity: Option<String>,
    /// Length of the longest history snapshot delivered to this peer
    watermark: usize,
}

/// Append, then re-read the full history. Each stage short-circuits on error.
pub async fn persist_submission(
    store: &dyn MessageStore,
    submission: &ChatSubmission,
) -> ChatResult<HistorySnapshot> {
    store.append(&submission.author, &submission.body).await?;
    let history = store.list_all().await?;
    Ok(history)
}

/// Owns the registry and drives the per-connection state machine
pub struct ChatBroadcastService {
    store: Arc<dyn MessageStore>,
    registry: ConnectionRegistry,
    relay: EphemeralRelay,
    sessions: HashMap<ConnectionId, PeerSession>,
    metrics: Arc<ChatMetrics>,
}

impl ChatBroadcastService {
    pub fn new(store: Arc<dyn MessageStore>, relay: EphemeralRelay) -> Self {
        Self::with_metrics(store, relay, Arc::new(ChatMetrics::new()))
    }

    pub fn with_metrics(
        store: Arc<dyn MessageStore>,
        relay: EphemeralRelay,
        metrics: Arc<ChatMetrics>,
    ) -> Self {
        Self {
            store,
            registry: ConnectionRegistry::new(),
            relay,
            sessions: HashMap::new(),
            metrics,
        }
    }

    pub fn store(&self) -> Arc<dyn MessageStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> Arc<ChatMetrics> {
        self.metrics.clone()
    }

    /// Lifecycle of a connection this service has seen. Connections that
    /// disconnected are forgotten, so they read as `Disconnected` too.
    pub fn lifecycle(&self, id: &ConnectionId) -> PeerLifecycle {
        self.sessions
            .get(id)
            .map(|s| s.lifecycle)
            .unwrap_or(PeerLifecycle::Disconnected)
    }

    pub fn is_admitted(&self, id: &ConnectionId) -> bool {
        self.lifecycle(id) == PeerLifecycle::Admitted
    }

    /// Synchronous half of connect: admit and announce the join to the
    /// other peers. Returns false if the connection was already admitted.
    pub fn admit(&mut self, id: ConnectionId, sink: Box<dyn PeerSink>, identity: Option<String>) -> bool {
        if self.sessions.contains_key(&id) {
            return false;
        }

        let mut session = PeerSession {
            lifecycle: PeerLifecycle::Connecting,
            identity,
            watermark: 0,
        };
        self.registry.admit(id, sink);
        session.lifecycle = PeerLifecycle::Admitted;
        self.sessions.insert(id, session);
        self.metrics.connection_admitted();

        let report = self.registry.broadcast_except(&id, JOIN_EVENT, json!({}));
        self.metrics.skipped(report.skipped_count() as u64);
        info!(
            connection = %id,
            notified = report.delivered_count(),
            peers = self.registry.len(),
            "Peer admitted"
        );
        true
    }

    /// Send a history snapshot to one peer, unless it already holds a newer one
    pub fn deliver_replay(&mut self, id: &ConnectionId, snapshot: &HistorySnapshot) -> Delivery {
        let Some(session) = self.sessions.get_mut(id) else {
            return Delivery::Absent;
        };
        if snapshot.len() < session.watermark {
            debug!(connection = %id, "Replay superseded by a newer broadcast");
            return Delivery::Superseded;
        }

        let delivery = self.registry.send_to(id, HISTORY_EVENT, snapshot.to_payload());
        if delivery == Delivery::Delivered {
            session.watermark = snapshot.len();
            self.metrics.history_replayed();
        }
        delivery
    }

    /// Broadcast a history snapshot to every admitted peer whose watermark it
    /// does not regress
    pub fn broadcast_history(&mut self, snapshot: &HistorySnapshot) -> DeliveryReport {
        let len = snapshot.len();
        let sessions = &self.sessions;
        let report = self.registry.broadcast_where(HISTORY_EVENT, snapshot.to_payload(), |id| {
            sessions.get(id).map_or(false, |s| s.watermark <= len)
        });

        for id in &report.delivered {
            if let Some(session) = self.sessions.get_mut(id) {
                session.watermark = len;
            }
        }
        self.metrics.history_broadcast(&report);
        debug!(
            messages = len,
            delivered = report.delivered_count(),
            skipped = report.skipped_count(),
            "Broadcast history"
        );
        report
    }

    /// Check a submission against the sender's state before it reaches the store
    pub fn authorize(&self, id: &ConnectionId, submission: &ChatSubmission) -> Result<(), ValidationError> {
        let session = self
            .sessions
            .get(id)
            .filter(|s| s.lifecycle == PeerLifecycle::Admitted)
            .ok_or_else(|| ValidationError::NotAdmitted(id.to_string()))?;

        if let Some(identity) = &session.identity {
            if identity != &submission.author {
                return Err(ValidationError::AuthorMismatch {
                    identity: identity.clone(),
                    claimed: submission.author.clone(),
                });
            }
        }
        Ok(())
    }

    /// Log and count a dropped submission
    pub fn record_failure(&self, id: &ConnectionId, error: &ChatError) {
        match error {
            ChatError::Validation(e) => {
                self.metrics.submission_rejected();
                warn!(connection = %id, "Rejected chat submission: {}", e);
            }
            ChatError::Persistence(e) => {
                self.metrics.submission_failed();
                warn!(connection = %id, "Chat submission not persisted: {}", e);
            }
        }
    }

    /// Record a persisted submission and broadcast the history it produced
    pub fn complete_submission(&mut self, id: &ConnectionId, history: &HistorySnapshot) -> DeliveryReport {
        self.metrics.message_persisted();
        debug!(connection = %id, "Chat message persisted");
        self.broadcast_history(history)
    }

    /// Full connect: admit, announce, then replay history privately
    pub async fn connect(
        &mut self,
        id: ConnectionId,
        sink: Box<dyn PeerSink>,
        identity: Option<String>,
    ) -> Result<(), PersistenceError> {
        if !self.admit(id, sink, identity) {
            return Ok(());
        }
        let snapshot = self.store.list_all().await.map_err(|e| {
            warn!(connection = %id, "History replay failed: {}", e);
            e
        })?;
        self.deliver_replay(&id, &snapshot);
        Ok(())
    }

    /// Full chat path: authorize, persist, broadcast. The error is also
    /// logged; nothing is broadcast when it is returned.
    pub async fn submit(&mut self, id: &ConnectionId, submission: ChatSubmission) -> ChatResult<DeliveryReport> {
        let result = match self.authorize(id, &submission) {
            Ok(()) => persist_submission(self.store.as_ref(), &submission).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(history) => Ok(self.complete_submission(id, &history)),
            Err(e) => {
                self.record_failure(id, &e);
                Err(e)
            }
        }
    }

    /// Remove a peer. Returns whether it was admitted.
    pub fn disconnect(&mut self, id: &ConnectionId) -> bool {
        let known = self.sessions.remove(id).is_some();
        let removed = self.registry.remove(id);
        if known {
            self.metrics.connection_removed();
            info!(connection = %id, peers = self.registry.len(), "Peer disconnected");
        }
        known || removed
    }

    /// Relay an ephemeral event from an admitted peer
    pub fn relay(&self, from: &ConnectionId, event_name: &str, payload: serde_json::Value) -> Option<DeliveryReport> {
        if !self.is_admitted(from) {
            debug!(connection = %from, event = event_name, "Ignoring relay from unknown connection");
            return None;
        }
        let report = self.relay.forward(&self.registry, event_name, payload)?;
        self.metrics.event_relayed(&report);
        Some(report)
    }
}
