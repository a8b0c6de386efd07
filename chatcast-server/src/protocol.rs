//! WebSocket wire protocol
//!
//! Every text frame is one JSON envelope `{"event": <name>, "data": <payload>}`.
//! `data` may be omitted and reads as `null`.

use chatcast_core::chat::{ChatSubmission, OutboundEvent, CHAT_EVENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// An inbound frame, sorted onto its channel
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Chat(ChatSubmission),
    /// Anything else; the relay decides whether it is routable
    Ephemeral { name: String, payload: Value },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("chat payload must be {{\"user\", \"message\"}}: {0}")]
    BadChatPayload(#[source] serde_json::Error),
}

pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
    let frame: Frame = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

    if frame.event == CHAT_EVENT {
        let submission = serde_json::from_value(frame.data).map_err(ProtocolError::BadChatPayload)?;
        return Ok(Inbound::Chat(submission));
    }

    Ok(Inbound::Ephemeral {
        name: frame.event,
        payload: frame.data,
    })
}

pub fn encode(event: &OutboundEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(&FrameRef {
        event: event.name(),
        data: event.payload(),
    })
}

#[derive(Serialize)]
struct FrameRef<'a> {
    event: &'a str,
    data: &'a Value,
}
