//! In-process chat metrics collector

use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::chat::registry::DeliveryReport;

/// Atomic counters for the chat subsystem
#[derive(Debug, Default)]
pub struct ChatMetrics {
    connections_admitted: AtomicU64,
    connections_removed: AtomicU64,
    messages_persisted: AtomicU64,
    submissions_rejected: AtomicU64,
    submissions_failed: AtomicU64,
    submissions_overflowed: AtomicU64,
    history_broadcasts: AtomicU64,
    history_replays: AtomicU64,
    deliveries_skipped: AtomicU64,
    relayed_events: AtomicU64,
}

/// Point-in-time copy of [`ChatMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_admitted: u64,
    pub connections_removed: u64,
    pub active_connections: u64,
    pub messages_persisted: u64,
    pub submissions_rejected: u64,
    pub submissions_failed: u64,
    pub submissions_overflowed: u64,
    pub history_broadcasts: u64,
    pub history_replays: u64,
    pub deliveries_skipped: u64,
    pub relayed_events: u64,
}

impl ChatMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_admitted(&self) {
        self.connections_admitted.fetch_add(1, Ordering::Relaxed);
        counter!("chat.connections.admitted").increment(1);
        self.publish_active();
    }

    pub fn connection_removed(&self) {
        self.connections_removed.fetch_add(1, Ordering::Relaxed);
        counter!("chat.connections.removed").increment(1);
        self.publish_active();
    }

    pub fn message_persisted(&self) {
        self.messages_persisted.fetch_add(1, Ordering::Relaxed);
        counter!("chat.messages.persisted").increment(1);
    }

    pub fn submission_rejected(&self) {
        self.submissions_rejected.fetch_add(1, Ordering::Relaxed);
        counter!("chat.submissions.rejected").increment(1);
    }

    pub fn submission_failed(&self) {
        self.submissions_failed.fetch_add(1, Ordering::Relaxed);
        counter!("chat.submissions.failed").increment(1);
    }

    /// A submission dropped because its connection's queue was full
    pub fn submission_overflowed(&self) {
        self.submissions_overflowed.fetch_add(1, Ordering::Relaxed);
        counter!("chat.submissions.overflowed").increment(1);
    }

    pub fn history_broadcast(&self, report: &DeliveryReport) {
        self.history_broadcasts.fetch_add(1, Ordering::Relaxed);
        counter!("chat.history.broadcasts").increment(1);
        self.skipped(report.skipped_count() as u64);
    }

    pub fn history_replayed(&self) {
        self.history_replays.fetch_add(1, Ordering::Relaxed);
        counter!("chat.history.replays").increment(1);
    }

    pub fn event_relayed(&self, report: &DeliveryReport) {
        self.relayed_events.fetch_add(1, Ordering::Relaxed);
        counter!("chat.relay.events").increment(1);
        self.skipped(report.skipped_count() as u64);
    }

    pub fn skipped(&self, count: u64) {
        if count > 0 {
            self.deliveries_skipped.fetch_add(count, Ordering::Relaxed);
            counter!("chat.deliveries.skipped").increment(count);
        }
    }

    fn active(&self) -> u64 {
        let admitted = self.connections_admitted.load(Ordering::Relaxed);
        let removed = self.connections_removed.load(Ordering::Relaxed);
        admitted.saturating_sub(removed)
    }

    fn publish_active(&self) {
        gauge!("chat.connections.active").set(self.active() as f64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_admitted: self.connections_admitted.load(Ordering::Relaxed),
            connections_removed: self.connections_removed.load(Ordering::Relaxed),
            active_connections: self.active(),
            messages_persisted: self.messages_persisted.load(Ordering::Relaxed),
            submissions_rejected: self.submissions_rejected.load(Ordering::Relaxed),
            submissions_failed: self.submissions_failed.load(Ordering::Relaxed),
            submissions_overflowed: self.submissions_overflowed.load(Ordering::Relaxed),
            history_broadcasts: self.history_broadcasts.load(Ordering::Relaxed),
            history_replays: self.history_replays.load(Ordering::Relaxed),
            deliveries_skipped: self.deliveries_skipped.load(Ordering::Relaxed),
            relayed_events: self.relayed_events.load(Ordering::Relaxed),
        }
    }
}
