//! chatcast core
//!
//! A shared, persisted chat stream broadcast to every connected peer, plus a
//! fire-and-forget relay for ephemeral events. Transport-agnostic: a server
//! crate feeds connections in through [`chat::DispatcherHandle`].

pub mod chat;
pub mod config;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod shutdown;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use chat::{
    ChatBroadcastService, ChatDispatcher, ChatError, ChatSubmission, ConnectionId,
    DispatcherHandle, HistorySnapshot, Message, MessageStore, OutboundEvent,
};
pub use config::Config;
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
