//! Wire protocol for Chatwire.
//!
//! This crate defines the "language" that chat clients and servers speak:
//!
//! - **Envelope** ([`Envelope`]) — the `{type, payload}` wrapper every
//!   frame travels in.
//! - **Events** ([`SendMessageEvent`], [`NewMessageEvent`],
//!   [`ChangeRoomEvent`]) — the typed payloads, each bound to a type tag
//!   through the [`Event`] trait.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how envelopes are
//!   converted to/from bytes.
//! - **Dispatch** ([`Registry`], [`Router`]) — maps a type tag to a
//!   handler and invokes it for decoded envelopes.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Codec (Envelope) → Router (typed Event) → handler(ctx)
//! ```
//!
//! The codec never looks inside `payload`; only the router knows which
//! event type a tag stands for, and it learns that from the registry.

mod codec;
mod error;
mod events;
mod registry;
mod router;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::{HandlerError, ProtocolError, RegistryError, RouteError};
pub use events::{
    CHANGE_ROOM, ChangeRoomEvent, ERROR, ErrorEvent, Event, NEW_MESSAGE, NewMessageEvent,
    SEND_MESSAGE, SendMessageEvent,
};
pub use registry::Registry;
pub use router::Router;
pub use types::{Envelope, Identity, RoomName};
