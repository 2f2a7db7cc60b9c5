//! Error types for the protocol layer.
//!
//! Codec failures ([`ProtocolError`]) and dispatch failures
//! ([`RouteError`]) are both non-fatal for a connection: the frame is
//! dropped and reported, the connection stays open. [`RegistryError`] is
//! the exception: it means startup wiring is wrong.

/// Errors from encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// An envelope with an empty `type` tag can't be put on the wire.
    #[error("encode failed: envelope type is empty")]
    EmptyType,

    /// Deserialization failed: not a JSON object, or no string `type` key.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}

impl ProtocolError {
    /// `true` for failures on the encoding side.
    pub fn is_encode(&self) -> bool {
        matches!(self, Self::Encode(_) | Self::EmptyType)
    }

    /// `true` for failures on the decoding side.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Errors raised while building a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A handler is already registered for this tag.
    #[error("a handler for event type {0:?} is already registered")]
    Duplicate(String),

    /// Tags must be non-empty.
    #[error("event type tag must not be empty")]
    EmptyTag,
}

/// Why the [`Router`](crate::Router) could not dispatch an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The envelope has an empty `type`.
    #[error("malformed envelope: no event type")]
    Malformed,

    /// No handler is registered for this tag.
    #[error("unsupported event type {0:?}")]
    Unsupported(String),

    /// The payload doesn't fit the schema registered for the tag.
    #[error("bad payload for {tag:?}: {reason}")]
    PayloadShape { tag: String, reason: String },

    /// The handler ran and reported a failure.
    #[error("handler for {tag:?} failed: {reason}")]
    Handler { tag: String, reason: String },
}

/// A failure reported by an event handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
