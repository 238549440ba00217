//! Shared types for the relay core.

use std::fmt;

use axum::extract::ws::{Message, Utf8Bytes};
use bytes::Bytes;
use thiserror::Error;

/// Unique identifier assigned to a connection when it is accepted.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
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

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque message body. The frame kind is kept so text stays text and
/// binary stays binary on the way out; the bytes are never inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(Utf8Bytes),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.as_str().len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts an inbound frame into a relayable payload.
    ///
    /// Control frames (ping, pong, close) carry no payload and yield `None`.
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(bytes) => Some(Self::Binary(bytes)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text),
            Self::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(Utf8Bytes::from(text))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(Utf8Bytes::from(text))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

/// Outcome of a single fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Recipients whose outbound queue accepted the message.
    pub delivered: usize,
    /// Recipients whose queue was full; the message was dropped for them.
    pub dropped: usize,
    /// Recipients that were no longer open or whose writer had gone away.
    pub closed: usize,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WsError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("outbound queue is full")]
    QueueFull,
    #[error("connection is not open")]
    NotOpen,
    #[error("outbound channel closed")]
    ChannelClosed,
}
