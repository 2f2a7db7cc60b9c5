//! Codec trait and implementations for serializing/deserializing envelopes.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The rest of the stack only needs something that implements [`Codec`];
//! [`JsonCodec`] is the implementation chat peers speak.

use serde::{Serialize, de::DeserializeOwned};

use crate::{Envelope, ProtocolError};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec is shared by every
/// connection task on the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Encodes an envelope, refusing one without a type tag.
    fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
        if envelope.event_type.is_empty() {
            return Err(ProtocolError::EmptyType);
        }
        self.encode(envelope)
    }

    /// Decodes an envelope.
    ///
    /// Succeeds for any well-formed object with a string `type`, whatever
    /// the tag is. Deciding whether the tag is known is the router's job.
    fn decode_envelope(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        self.decode(data)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is self-describing, which is what lets the payload shape be picked
/// by the `type` tag at decode time instead of being fixed per connection.
///
/// ## Example
///
/// ```rust
/// use chatwire_protocol::{ChangeRoomEvent, Codec, Envelope, JsonCodec, RoomName};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::from_event(&ChangeRoomEvent { name: RoomName::from("random") }).unwrap();
///
/// let bytes = codec.encode_envelope(&envelope).unwrap();
/// assert_eq!(bytes, br#"{"type":"change_room","payload":{"name":"random"}}"#);
///
/// let decoded = codec.decode_envelope(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
