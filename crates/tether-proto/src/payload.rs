//! Application payloads carried on open peer channels.
//!
//! A payload is either a chat [`Message`] or an opaque [`WorldSnapshot`]. The
//! `type` tag makes the distinction explicit on the wire; receivers never
//! guess from field presence.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{PeerAddress, ProtoError};

/// Append-only chat message.
///
/// Immutable once created. `timestamp` is unix epoch milliseconds taken by the
/// authoring participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Participant that authored the message.
    pub origin: PeerAddress,
    /// Authoring time in unix epoch milliseconds.
    pub timestamp: u64,
    /// Message body.
    pub text: String,
}

impl Message {
    /// Create a message.
    pub fn new(origin: PeerAddress, timestamp: u64, text: impl Into<String>) -> Self {
        Self { origin, timestamp, text: text.into() }
    }

    /// Identity used to recognise re-deliveries of the same message.
    pub fn key(&self) -> MessageKey {
        MessageKey {
            origin: self.origin.clone(),
            timestamp: self.timestamp,
            text: self.text.clone(),
        }
    }
}

/// Deduplication key: origin, timestamp and text together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey {
    /// Authoring participant.
    pub origin: PeerAddress,
    /// Authoring time.
    pub timestamp: u64,
    /// Message body.
    pub text: String,
}

/// Opaque evolving world state.
///
/// The protocol never interprets the bytes. Producers choose their own
/// encoding; [`WorldSnapshot::encode`] and [`WorldSnapshot::decode`] offer CBOR
/// for convenience.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    data: Bytes,
}

impl WorldSnapshot {
    /// Wrap raw snapshot bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Raw snapshot bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// True for the initial, never-written snapshot.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encode a serializable world value as CBOR.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, ProtoError> {
        let mut data = Vec::new();
        ciborium::into_writer(value, &mut data).map_err(|e| ProtoError::Encode(e.to_string()))?;
        Ok(Self::new(data))
    }

    /// Decode the snapshot bytes as CBOR.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtoError> {
        ciborium::from_reader(self.data.as_ref()).map_err(|e| ProtoError::Decode(e.to_string()))
    }
}

/// Data frame on an open peer channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Chat message to append (and possibly relay).
    Message(Message),
    /// Full world state replacing the receiver's copy.
    Snapshot(WorldSnapshot),
}

impl Payload {
    /// Shorthand for a message payload.
    pub fn message(origin: impl Into<PeerAddress>, timestamp: u64, text: &str) -> Self {
        Self::Message(Message::new(origin.into(), timestamp, text))
    }
}
