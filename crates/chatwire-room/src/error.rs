//! Error types for the room layer.

use crate::MemberId;

/// Errors returned by a [`BroadcastHandle`](crate::BroadcastHandle).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The member never joined, or has already left.
    #[error("{0} is not a member")]
    UnknownMember(MemberId),

    /// The member id is already registered.
    #[error("{0} has already joined")]
    AlreadyJoined(MemberId),

    /// Room names must be non-empty.
    #[error("room name must not be empty")]
    EmptyRoomName,

    /// The coordinator task has stopped.
    #[error("broadcast coordinator is unavailable")]
    Unavailable,
}
