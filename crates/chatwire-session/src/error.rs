//! Error types for the session layer.

use chatwire_protocol::ProtocolError;

use crate::ConnectionState;

/// Errors that can occur while driving a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The credential exchange or token redemption was refused.
    ///
    /// Deliberately carries no detail: a wrong password and an unknown
    /// user look the same to the caller.
    #[error("unauthorized")]
    Unauthorized,

    /// A local action needs a connected session.
    ///
    /// Raised before anything reaches the transport, so no event is
    /// queued that could never be delivered.
    #[error("not connected (session is {0})")]
    NotConnected(ConnectionState),

    /// The requested transition isn't defined from the current state.
    #[error("cannot {operation} while {from}")]
    InvalidTransition {
        from: ConnectionState,
        operation: &'static str,
    },

    /// Room names must be non-empty.
    #[error("room name must not be empty")]
    EmptyRoomName,

    /// Building the outbound envelope failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
