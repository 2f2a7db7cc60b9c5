//! # Chatwire
//!
//! Real-time room chat over WebSockets.
//!
//! Clients trade a username and password for a one-time token, open a
//! WebSocket with it, and from then on exchange small JSON envelopes:
//!
//! ```json
//! {"type": "send_message", "payload": {"message": "hi", "from": "alice"}}
//! ```
//!
//! The server fans each message out to everyone in the sender's room,
//! stamped with the time it was broadcast and the sender's authenticated
//! identity.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatwire::prelude::*;
//!
//! # async fn run() -> Result<(), ChatError> {
//! let auth = StaticAuthenticator::new().with_user("alice", "wonderland");
//! let server = ChatServerBuilder::new().bind("127.0.0.1:8080").build(auth).await?;
//! let login = server.login();
//! tokio::spawn(server.run());
//!
//! let (sink, mut inbox) = ChannelSink::new();
//! let client = ChatClient::connect(
//!     &ClientConfig::new("ws://127.0.0.1:8080/ws"),
//!     &login,
//!     &Credentials::new("alice", "wonderland"),
//!     sink,
//! )
//! .await?;
//! client.change_room("general").await?;
//! client.send_message("hello").await?;
//! let _echoed = inbox.recv().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod display;
mod error;
mod gate;
mod handler;
mod server;

pub use client::{ChatClient, ClientWarning};
pub use config::{ClientConfig, ServerConfig};
pub use display::{ChannelSink, DisplayMessage, DisplaySink, LogSink};
pub use error::{ChatError, ConfigError};
pub use server::{ChatServer, ChatServerBuilder};

pub use chatwire_protocol as protocol;
pub use chatwire_room as room;
pub use chatwire_session as session;
pub use chatwire_transport as transport;

/// Everything needed to run a server or a client.
pub mod prelude {
    pub use crate::{
        ChannelSink, ChatClient, ChatError, ChatServer, ChatServerBuilder, ClientConfig,
        ClientWarning, DisplayMessage, DisplaySink, LogSink, ServerConfig,
    };
    pub use chatwire_protocol::{Envelope, Identity, RoomName};
    pub use chatwire_session::{
        Authenticator, CloseCause, ConnectionState, CredentialExchange, Credentials,
        SessionError, StaticAuthenticator,
    };
}
