//! Transport message carried by the event bus.
//!
//! A [`Message`] is what actually travels through a topic: a unique id, a small
//! string map of metadata, and opaque payload bytes. Domain events are encoded
//! into the payload (see [`crate::event`]); everything the pipeline needs before
//! decoding (the correlation id and the event-kind tag) lives in metadata.
//!
//! # Wire Format
//!
//! Messages are serialized as a whole with `bincode` when a transport needs a
//! single byte buffer (Kafka record values). The payload inside stays JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Metadata key carrying the correlation id.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Metadata key carrying the event-kind tag.
pub const TYPE_KEY: &str = "type";

/// Errors raised while encoding or decoding a [`Message`].
#[derive(Error, Debug, Clone)]
pub enum MessageError {
    /// Failed to encode the message to bytes.
    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// Failed to decode bytes into a message.
    #[error("Failed to decode message: {0}")]
    Decode(String),
}

/// String metadata attached to a [`Message`].
///
/// Lookups treat an empty value the same as a missing one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Create empty metadata.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Get a non-empty value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Set a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A message published to, and delivered from, a topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id of this physical message (one per publish call).
    pub uuid: String,
    /// Metadata (correlation id, type tag, ...).
    pub metadata: Metadata,
    /// Encoded domain event.
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message with a fresh uuid and empty metadata.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            payload,
        }
    }

    /// Builder-style metadata setter.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.set(key, value);
        self
    }

    /// The correlation id, if present.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID_KEY)
    }

    /// The event-kind tag, if present.
    #[must_use]
    pub fn message_type(&self) -> Option<&str> {
        self.metadata.get(TYPE_KEY)
    }

    /// Encode the whole message with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Encode`] if bincode rejects the value.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        bincode::serialize(self).map_err(|e| MessageError::Encode(e.to_string()))
    }

    /// Decode a message previously produced by [`Message::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Decode`] if the bytes are not a valid message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        bincode::deserialize(bytes).map_err(|e| MessageError::Decode(e.to_string()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(uuid={}, type={}, {} bytes)",
            self.uuid,
            self.message_type().unwrap_or("<none>"),
            self.payload.len()
        )
    }
}
