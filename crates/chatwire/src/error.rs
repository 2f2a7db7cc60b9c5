//! Unified error type for Chatwire.

use chatwire_protocol::{ProtocolError, RegistryError};
use chatwire_room::RoomError;
use chatwire_session::SessionError;
use chatwire_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls,
/// so `?` converts sub-crate errors without ceremony.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A transport-level error (bind, upgrade, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encoding or decoding an envelope failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The event registry was misconfigured (for example a duplicate tag).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A session-level error (unauthorized, not connected, bad room).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The broadcast coordinator refused or is gone.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Loading configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from reading a TOML configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
