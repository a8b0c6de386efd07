//! WebSocket transport and HTTP surface for chatcast
//!
//! - `GET /ws`: the chat socket, JSON frames `{"event", "data"}`
//! - `GET /health`: [`chatcast_core::health::HealthReport`]
//! - `GET /api/messages`: current history

pub mod api;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod socket;
pub mod state;

pub use api::build_router;
pub use error::ApiError;
pub use server::ChatServer;
pub use state::AppState;
