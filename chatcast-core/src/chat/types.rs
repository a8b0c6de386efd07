//! Core types for the chat broadcast subsystem

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use super::errors::ValidationError;

/// Opaque identifier of one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generate a fresh connection id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned message identifier. Ascending ids follow insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

/// Milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

/// A persisted chat message
///
/// Field names on the wire are `user` and `message`, which is what browser
/// clients already send and render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "user")]
    pub author: String,
    #[serde(rename = "message")]
    pub body: String,
    pub created_at: Timestamp,
}

/// An inbound chat submission, as received from a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSubmission {
    #[serde(rename = "user")]
    pub author: String,
    #[serde(rename = "message")]
    pub body: String,
}

impl ChatSubmission {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
        }
    }
}

/// Reject blank authors and bodies before anything touches storage
pub fn validate_submission(author: &str, body: &str) -> Result<(), ValidationError> {
    if author.trim().is_empty() {
        return Err(ValidationError::EmptyAuthor);
    }
    if body.trim().is_empty() {
        return Err(ValidationError::EmptyBody);
    }
    Ok(())
}

/// Ordered view of the whole history at one instant, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistorySnapshot(Vec<Message>);

impl HistorySnapshot {
    pub fn new(messages: Vec<Message>) -> Self {
        Self(messages)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.0
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.0
    }

    /// `(author, body)` pairs, handy when the ids don't matter
    pub fn entries(&self) -> Vec<(&str, &str)> {
        self.0
            .iter()
            .map(|m| (m.author.as_str(), m.body.as_str()))
            .collect()
    }

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).unwrap_or_else(|_| serde_json::Value::Array(Vec::new()))
    }
}

/// A named event handed to a peer sink
///
/// Name and payload are reference counted so one broadcast builds the event
/// once and clones it per peer.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    name: Arc<str>,
    payload: Arc<serde_json::Value>,
}

impl OutboundEvent {
    pub fn new(name: &str, payload: serde_json::Value) -> Self {
        Self {
            name: Arc::from(name),
            payload: Arc::new(payload),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Decode a `messages` payload back into a snapshot
    pub fn history(&self) -> Option<HistorySnapshot> {
        serde_json::from_value(self.payload.as_ref().clone()).ok()
    }
}
