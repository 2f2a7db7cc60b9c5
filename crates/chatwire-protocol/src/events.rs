//! Typed chat events and the tags that identify them on the wire.
//!
//! Each event type implements [`Event`], which ties the Rust type to its
//! `type` tag. Decoding a payload into one of these structs is the schema
//! check: a missing required field or a wrong primitive kind fails there.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Identity, RoomName};

/// Tag for [`SendMessageEvent`] (client → server).
pub const SEND_MESSAGE: &str = "send_message";
/// Tag for [`NewMessageEvent`] (server → client).
pub const NEW_MESSAGE: &str = "new_message";
/// Tag for [`ChangeRoomEvent`] (client → server).
pub const CHANGE_ROOM: &str = "change_room";
/// Tag for [`ErrorEvent`] (server → client).
pub const ERROR: &str = "error";

/// A payload type bound to one envelope tag.
pub trait Event: Serialize + DeserializeOwned + Send + 'static {
    /// The `type` tag this event travels under.
    const TYPE: &'static str;

    /// Checks constraints serde can't express (non-empty strings, etc.).
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A chat line the local user wants delivered to their current room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageEvent {
    pub message: String,
    pub from: Identity,
}

impl Event for SendMessageEvent {
    const TYPE: &'static str = SEND_MESSAGE;

    fn validate(&self) -> Result<(), String> {
        if self.message.is_empty() {
            return Err("message must not be empty".into());
        }
        Ok(())
    }
}

/// A chat line accepted and timestamped by the broadcast coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageEvent {
    pub message: String,
    pub from: Identity,
    /// Milliseconds since the Unix epoch, assigned server-side.
    pub sent: u64,
}

impl Event for NewMessageEvent {
    const TYPE: &'static str = NEW_MESSAGE;
}

/// Moves the sender into room `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRoomEvent {
    pub name: RoomName,
}

impl Event for ChangeRoomEvent {
    const TYPE: &'static str = CHANGE_ROOM;

    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("room name must not be empty".into());
        }
        Ok(())
    }
}

/// A non-fatal problem with a frame the peer sent.
///
/// The connection stays open after one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

impl Event for ErrorEvent {
    const TYPE: &'static str = ERROR;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_send_message_json_format() {
        let event = SendMessageEvent {
            message: "hello".into(),
            from: Identity::from("alice"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, json!({"message": "hello", "from": "alice"}));
    }

    #[test]
    fn test_new_message_sent_is_plain_number() {
        let event = NewMessageEvent {
            message: "hi".into(),
            from: Identity::from("bob"),
            sent: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sent"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_change_room_rejects_empty_name() {
        let event = ChangeRoomEvent {
            name: RoomName::from(""),
        };
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_change_room_accepts_name() {
        let event = ChangeRoomEvent {
            name: RoomName::from("random"),
        };
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_send_message_rejects_empty_text() {
        let event = SendMessageEvent {
            message: String::new(),
            from: Identity::from("alice"),
        };
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_tags_match_wire_names() {
        assert_eq!(SendMessageEvent::TYPE, "send_message");
        assert_eq!(NewMessageEvent::TYPE, "new_message");
        assert_eq!(ChangeRoomEvent::TYPE, "change_room");
    }
}
