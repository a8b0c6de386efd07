//! Ephemeral Event Relay
//!
//! Forwards signals that are never persisted (inventory updates and the like)
//! straight to every admitted peer. Fire-and-forget: at most once, loss is fine.

use std::collections::HashMap;
use tracing::debug;

use super::registry::{ConnectionRegistry, DeliveryReport};
use crate::config::RelayRoute;

/// Relays ephemeral events according to a route table
#[derive(Debug, Clone, Default)]
pub struct EphemeralRelay {
    /// inbound event name -> outbound event name
    routes: HashMap<String, String>,
}

impl EphemeralRelay {
    pub fn new(routes: &[RelayRoute]) -> Self {
        Self {
            routes: routes
                .iter()
                .map(|r| (r.inbound.clone(), r.outbound.clone()))
                .collect(),
        }
    }

    /// Outbound name for an inbound event, if it is relayable at all
    pub fn route(&self, inbound: &str) -> Option<&str> {
        self.routes.get(inbound).map(String::as_str)
    }

    pub fn relay(
        &self,
        registry: &ConnectionRegistry,
        event_name: &str,
        payload: serde_json::Value,
    ) -> DeliveryReport {
        let report = registry.broadcast(event_name, payload);
        debug!(
            event = event_name,
            delivered = report.delivered_count(),
            skipped = report.skipped_count(),
            "Relayed ephemeral event"
        );
        report
    }

    /// Route an inbound event and relay it; unrouted events are dropped
    pub fn forward(
        &self,
        registry: &ConnectionRegistry,
        inbound: &str,
        payload: serde_json::Value,
    ) -> Option<DeliveryReport> {
        match self.route(inbound) {
            Some(outbound) => Some(self.relay(registry, outbound, payload)),
            None => {
                debug!(event = inbound, "Dropping unrouted ephemeral event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::{ConnectionId, OutboundEvent};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn products_relay() -> EphemeralRelay {
        EphemeralRelay::new(&[RelayRoute::new("productList", "updatedProducts")])
    }

    #[test]
    fn test_forward_renames_and_broadcasts() {
        let mut registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel::<OutboundEvent>();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel::<OutboundEvent>();
        registry.admit(ConnectionId::new(), Box::new(tx_a));
        registry.admit(ConnectionId::new(), Box::new(tx_b));

        let payload = json!([{"title": "lamp", "stock": 3}]);
        let report = products_relay().forward(&registry, "productList", payload.clone());
        assert_eq!(report.map(|r| r.delivered_count()), Some(2));

        for rx in [&mut rx_a, &mut rx_b] {
            let event = rx.try_recv().unwrap();
            assert_eq!(event.name(), "updatedProducts");
            assert_eq!(event.payload(), &payload);
        }
    }

    #[test]
    fn test_unrouted_event_dropped() {
        let mut registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();
        registry.admit(ConnectionId::new(), Box::new(tx));

        assert!(products_relay().forward(&registry, "deleteEverything", json!({})).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_relay_with_no_peers() {
        let registry = ConnectionRegistry::new();
        let report = products_relay().relay(&registry, "updatedProducts", json!(null));
        assert_eq!(report, DeliveryReport::default());
    }
}
