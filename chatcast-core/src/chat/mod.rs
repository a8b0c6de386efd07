//! Real-time chat broadcast
//!
//! Turns transport connections into members of one shared, persisted chat
//! stream:
//!
//! - [`store`]: ordered, persistent history
//! - [`registry`]: live peers, per-peer send and fan-out
//! - [`service`]: admission, history replay, persist-then-broadcast
//! - [`relay`]: ephemeral, never-persisted events
//! - [`dispatcher`]: the single event loop that drives the service
//!
//! Three event channels share each connection: join/history
//! ([`JOIN_EVENT`], [`HISTORY_EVENT`]), chat ([`CHAT_EVENT`]) and the
//! relay routes configured in [`crate::config::ChatConfig`].

pub mod dispatcher;
pub mod errors;
pub mod registry;
pub mod relay;
pub mod service;
pub mod store;
pub mod types;

pub use dispatcher::{ChatDispatcher, DispatchEvent, DispatcherClosed, DispatcherHandle, DispatcherStats};
pub use errors::{ChatError, ChatResult, PersistenceError, TransportError, ValidationError};
pub use registry::{ConnectionRegistry, Delivery, DeliveryReport, PeerSink};
pub use relay::EphemeralRelay;
pub use service::{persist_submission, ChatBroadcastService, PeerLifecycle};
pub use store::{open_store, MemoryMessageStore, MessageStore, SqlMessageStore};
pub use types::{
    ChatSubmission, ConnectionId, HistorySnapshot, Message, MessageId, OutboundEvent, Timestamp,
};

/// Outbound: someone else joined. Payload is an empty object.
pub const JOIN_EVENT: &str = "peerJoined";

/// Outbound: the full chat history, oldest first
pub const HISTORY_EVENT: &str = "messages";

/// Inbound: a chat submission `{"user", "message"}`
pub const CHAT_EVENT: &str = "message";
