//! Core protocol types for Chatwire's wire format.
//!
//! Every frame on a chat connection, in either direction, is one
//! [`Envelope`]: a JSON object with exactly the keys `type` and
//! (optionally) `payload`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Event, ProtocolError};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The name a user is known by. Opaque and case-sensitive.
///
/// `#[serde(transparent)]` keeps it a plain JSON string on the wire:
/// `Identity("bob")` is `"bob"`, not `{"0":"bob"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The name of a chat room. Opaque and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(pub String);

impl RoomName {
    /// Returns the room name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty name, which is never a valid room.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<&str> for RoomName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RoomName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Envelope — the top-level wire format
// ---------------------------------------------------------------------------

/// The top-level message wrapper. Every frame on the wire is an Envelope.
///
/// ```text
/// { "type": "new_message", "payload": { "message": "hi", "from": "bob", "sent": 1700000000000 } }
/// ```
///
/// The shape of `payload` is decided by `type` alone, through the
/// [`Registry`](crate::Registry). Keys other than `type` and `payload` are
/// ignored on decode and never emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The event type tag, e.g. `send_message`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event data. Omitted from the wire when `None`; an explicit
    /// `"payload": null` decodes as `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present_payload",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
}

fn present_payload<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// Creates an envelope from a raw tag and payload.
    pub fn new(event_type: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Wraps a typed event, using its [`Event::TYPE`] as the tag.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the event can't be represented
    /// as a JSON value.
    pub fn from_event<E: Event>(event: &E) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_value(event).map_err(ProtocolError::Encode)?;
        Ok(Self::new(E::TYPE, Some(payload)))
    }

    /// Coerces the payload into event type `E`.
    ///
    /// A missing payload is treated as JSON `null`, so events with
    /// required fields fail here rather than being default-filled.
    pub fn payload_as<E: Event>(&self) -> Result<E, serde_json::Error> {
        match &self.payload {
            Some(value) => E::deserialize(value),
            None => E::deserialize(&Value::Null),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
