//! Connection Registry
//!
//! Tracks the live peers and fans events out to them. A send to one peer that
//! fails (closed transport, full queue) is counted and skipped; it never stops
//! delivery to the remaining peers and never surfaces to the caller as an error.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::errors::TransportError;
use super::types::{ConnectionId, OutboundEvent};

/// Outbound half of a peer's transport
pub trait PeerSink: Send + Sync {
    fn deliver(&self, event: OutboundEvent) -> Result<(), TransportError>;
}

impl PeerSink for mpsc::Sender<OutboundEvent> {
    fn deliver(&self, event: OutboundEvent) -> Result<(), TransportError> {
        self.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

impl PeerSink for mpsc::UnboundedSender<OutboundEvent> {
    fn deliver(&self, event: OutboundEvent) -> Result<(), TransportError> {
        self.send(event).map_err(|_| TransportError::Closed)
    }
}

/// Outcome of a single-peer send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The peer exists but its transport refused the event
    Skipped(TransportError),
    /// No such peer; nothing was attempted
    Absent,
    /// The peer already holds a newer history; nothing was attempted
    Superseded,
}

/// Outcome of one fan-out, per peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<ConnectionId>,
    pub skipped: Vec<ConnectionId>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Live peers, keyed by connection id
#[derive(Default)]
pub struct ConnectionRegistry {
    peers: HashMap<ConnectionId, Box<dyn PeerSink>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. Re-admitting an admitted peer is a no-op and keeps
    /// the first sink. Returns whether the peer was newly admitted.
    pub fn admit(&mut self, id: ConnectionId, sink: Box<dyn PeerSink>) -> bool {
        if self.peers.contains_key(&id) {
            return false;
        }
        self.peers.insert(id, sink);
        true
    }

    /// Forget a peer. Returns whether it was admitted.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        self.peers.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.peers.keys().copied().collect()
    }

    /// Deliver to exactly one peer
    pub fn send_to(&self, id: &ConnectionId, event_name: &str, payload: serde_json::Value) -> Delivery {
        match self.peers.get(id) {
            Some(sink) => match sink.deliver(OutboundEvent::new(event_name, payload)) {
                Ok(()) => Delivery::Delivered,
                Err(e) => {
                    debug!(connection = %id, event = event_name, "Skipping peer: {}", e);
                    Delivery::Skipped(e)
                }
            },
            None => Delivery::Absent,
        }
    }

    /// Deliver to every admitted peer
    pub fn broadcast(&self, event_name: &str, payload: serde_json::Value) -> DeliveryReport {
        self.broadcast_where(event_name, payload, |_| true)
    }

    /// Deliver to every admitted peer except `except`
    pub fn broadcast_except(
        &self,
        except: &ConnectionId,
        event_name: &str,
        payload: serde_json::Value,
    ) -> DeliveryReport {
        self.broadcast_where(event_name, payload, |id| id != except)
    }

    /// Deliver to the admitted peers selected by `filter`
    pub fn broadcast_where<F>(&self, event_name: &str, payload: serde_json::Value, filter: F) -> DeliveryReport
    where
        F: Fn(&ConnectionId) -> bool,
    {
        let event = OutboundEvent::new(event_name, payload);
        let mut report = DeliveryReport::default();

        for (id, sink) in self.peers.iter().filter(|(id, _)| filter(id)) {
            match sink.deliver(event.clone()) {
                Ok(()) => report.delivered.push(*id),
                Err(e) => {
                    debug!(connection = %id, event = event_name, "Skipping peer: {}", e);
                    report.skipped.push(*id);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peer() -> (Box<dyn PeerSink>, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Box::new(tx), rx)
    }

    #[test]
    fn test_admit_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (first, mut first_rx) = peer();
        let (second, mut second_rx) = peer();

        assert!(registry.admit(id, first));
        assert!(!registry.admit(id, second));
        assert_eq!(registry.len(), 1);

        registry.send_to(&id, "ping", json!(1));
        assert!(first_rx.try_recv().is_ok());
        assert!(second_rx.try_recv().is_err());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (sink, _rx) = peer();
        registry.admit(id, sink);

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_send_to_absent_peer_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.send_to(&ConnectionId::new(), "ping", json!(null)), Delivery::Absent);
    }

    #[test]
    fn test_broadcast_skips_closed_peer() {
        let mut registry = ConnectionRegistry::new();
        let (alive, mut alive_rx) = peer();
        let (gone, gone_rx) = peer();
        let (also_alive, mut also_alive_rx) = peer();
        drop(gone_rx);

        let gone_id = ConnectionId::new();
        registry.admit(ConnectionId::new(), alive);
        registry.admit(gone_id, gone);
        registry.admit(ConnectionId::new(), also_alive);

        let report = registry.broadcast("updatedProducts", json!({"sku": 7}));
        assert_eq!(report.delivered_count(), 2);
        assert_eq!(report.skipped, vec![gone_id]);

        let event = alive_rx.try_recv().unwrap();
        assert_eq!(event.name(), "updatedProducts");
        assert_eq!(event.payload(), &json!({"sku": 7}));
        assert!(also_alive_rx.try_recv().is_ok());
    }

    #[test]
    fn test_bounded_sink_reports_backpressure() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::channel::<OutboundEvent>(1);
        registry.admit(id, Box::new(tx));

        assert_eq!(registry.send_to(&id, "a", json!(1)), Delivery::Delivered);
        assert_eq!(
            registry.send_to(&id, "b", json!(2)),
            Delivery::Skipped(TransportError::Backpressure)
        );
    }

    #[test]
    fn test_broadcast_except_sender() {
        let mut registry = ConnectionRegistry::new();
        let newcomer = ConnectionId::new();
        let (newcomer_sink, mut newcomer_rx) = peer();
        let (other_sink, mut other_rx) = peer();
        registry.admit(newcomer, newcomer_sink);
        registry.admit(ConnectionId::new(), other_sink);

        let report = registry.broadcast_except(&newcomer, "peerJoined", json!({}));
        assert_eq!(report.delivered_count(), 1);
        assert!(newcomer_rx.try_recv().is_err());
        assert_eq!(other_rx.try_recv().unwrap().name(), "peerJoined");
    }
}
