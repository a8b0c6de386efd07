//! Metrics for the chat broadcast subsystem
//!
//! Counters go two ways: through the `metrics` facade for whatever recorder
//! the embedding process installs, and into an in-process [`ChatMetrics`]
//! collector whose snapshot backs the health endpoint.

use metrics::{describe_counter, describe_gauge};

mod collector;

pub use collector::{ChatMetrics, MetricsSnapshot};

/// Register metric descriptions with the installed recorder
pub fn init_metrics() {
    describe_counter!("chat.connections.admitted", "Peers admitted to the chat stream");
    describe_counter!("chat.connections.removed", "Peers removed from the chat stream");
    describe_gauge!("chat.connections.active", "Currently admitted peers");

    describe_counter!("chat.messages.persisted", "Chat messages appended to the store");
    describe_counter!("chat.submissions.rejected", "Submissions failing validation");
    describe_counter!("chat.submissions.failed", "Submissions failing in the store");
    describe_counter!("chat.submissions.overflowed", "Submissions dropped on a full connection queue");

    describe_counter!("chat.history.broadcasts", "Full-history broadcasts sent");
    describe_counter!("chat.history.replays", "Private history replays sent");
    describe_counter!("chat.deliveries.skipped", "Per-peer deliveries skipped");
    describe_counter!("chat.relay.events", "Ephemeral events relayed");
}
