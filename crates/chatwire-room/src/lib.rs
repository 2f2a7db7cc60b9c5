//! Room broadcast for Chatwire.
//!
//! A single coordinator task tracks every connected member, the identity
//! they authenticated as, and the room they are in. Publishing a message
//! fans a `new_message` envelope out to each member of the publisher's
//! room.
//!
//! # Key types
//!
//! - [`BroadcastHandle`] — send commands to the running coordinator
//! - [`MemberId`] — one connection's key in the coordinator
//! - [`Clock`] — where `sent` timestamps come from

mod clock;
mod coordinator;
mod error;

pub use clock::{Clock, SystemClock};
pub use coordinator::{BroadcastHandle, DEFAULT_COMMAND_BUFFER, MemberId, MemberSender};
pub use error::RoomError;
