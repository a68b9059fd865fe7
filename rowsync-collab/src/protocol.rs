//! Binary protocol between a [`WireCollection`](crate::WireCollection) and a
//! [`CollectionHost`](crate::CollectionHost).
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬──────────────┬────────┬────────┬──────────┬──────────┐
//! │ msg_type │ subscription │ kind   │ key    │ prev_key │ payload  │
//! │ 1 byte   │ varint       │ option │ option │ option   │ JSON     │
//! └──────────┴──────────────┴────────┴────────┴──────────┴──────────┘
//! ```
//!
//! Values and patches travel as JSON bytes inside `payload`, so the envelope
//! never needs to know the shape of user data.

use rowsync_core::{EventKind, Key, RemoteEvent, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message types for the collection protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client starts listening to one event kind
    Subscribe = 1,
    /// Client stops listening
    Unsubscribe = 2,
    /// Store a whole value under a key
    Set = 3,
    /// Shallow-merge a patch into a value
    Update = 4,
    /// Delete a key
    Remove = 5,
    /// Child event for a subscription
    Event = 6,
    /// Heartbeat ping
    Ping = 7,
    /// Heartbeat pong
    Pong = 8,
    /// Host finished replaying a subscription; live events follow
    Synced = 9,
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    /// Client-chosen subscription id (Subscribe, Unsubscribe, Event)
    pub subscription: u64,
    pub kind: Option<EventKind>,
    pub key: Option<Key>,
    pub prev_key: Option<Key>,
    /// JSON value or patch (varies by msg_type)
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn bare(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            subscription: 0,
            kind: None,
            key: None,
            prev_key: None,
            payload: Vec::new(),
        }
    }

    pub fn subscribe(subscription: u64, kind: EventKind) -> Self {
        Self {
            subscription,
            kind: Some(kind),
            ..Self::bare(MessageType::Subscribe)
        }
    }

    pub fn unsubscribe(subscription: u64) -> Self {
        Self {
            subscription,
            ..Self::bare(MessageType::Unsubscribe)
        }
    }

    pub fn set(key: &Key, value: &Value) -> Result<Self, ProtocolError> {
        Ok(Self {
            key: Some(key.clone()),
            payload: to_json(value)?,
            ..Self::bare(MessageType::Set)
        })
    }

    pub fn update(key: &Key, patch: &Map<String, Value>) -> Result<Self, ProtocolError> {
        Ok(Self {
            key: Some(key.clone()),
            payload: to_json(patch)?,
            ..Self::bare(MessageType::Update)
        })
    }

    pub fn remove(key: &Key) -> Self {
        Self {
            key: Some(key.clone()),
            ..Self::bare(MessageType::Remove)
        }
    }

    /// Wrap a child event for delivery to `subscription`.
    pub fn event(subscription: u64, event: &RemoteEvent) -> Result<Self, ProtocolError> {
        let snapshot = event.snapshot();
        Ok(Self {
            subscription,
            kind: Some(event.kind()),
            key: snapshot.key.clone(),
            prev_key: event.prev_key().cloned(),
            payload: to_json(&snapshot.value)?,
            ..Self::bare(MessageType::Event)
        })
    }

    pub fn synced(subscription: u64) -> Self {
        Self {
            subscription,
            ..Self::bare(MessageType::Synced)
        }
    }

    pub fn ping() -> Self {
        Self::bare(MessageType::Ping)
    }

    pub fn pong() -> Self {
        Self::bare(MessageType::Pong)
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Key carried by Set / Update / Remove.
    pub fn require_key(&self) -> Result<&Key, ProtocolError> {
        self.key.as_ref().ok_or(ProtocolError::MissingField("key"))
    }

    /// Parse a Set payload.
    pub fn value(&self) -> Result<Value, ProtocolError> {
        if self.msg_type != MessageType::Set {
            return Err(ProtocolError::InvalidMessageType);
        }
        from_json(&self.payload)
    }

    /// Parse an Update payload.
    pub fn patch(&self) -> Result<Map<String, Value>, ProtocolError> {
        if self.msg_type != MessageType::Update {
            return Err(ProtocolError::InvalidMessageType);
        }
        from_json(&self.payload)
    }

    /// Rebuild the child event carried by an Event message.
    ///
    /// A missing key is passed through as a keyless snapshot; rejecting it
    /// is up to whoever applies the event.
    pub fn remote_event(&self) -> Result<RemoteEvent, ProtocolError> {
        if self.msg_type != MessageType::Event {
            return Err(ProtocolError::InvalidMessageType);
        }
        let kind = self.kind.ok_or(ProtocolError::MissingField("kind"))?;
        let value: Value = from_json(&self.payload)?;
        let snapshot = match &self.key {
            Some(key) => Snapshot::new(key.clone(), value),
            None => Snapshot::keyless(value),
        };
        let prev_key = self.prev_key.clone();
        Ok(match kind {
            EventKind::Added => RemoteEvent::added(snapshot, prev_key),
            EventKind::Changed => RemoteEvent::changed(snapshot),
            EventKind::Removed => RemoteEvent::removed(snapshot),
            EventKind::Moved => RemoteEvent::moved(snapshot, prev_key),
        })
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    MissingField(&'static str),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::MissingField(field) => write!(f, "Missing field: {field}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
