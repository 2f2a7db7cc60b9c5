//! `ChatServer` builder and accept loop.
//!
//! This is the entry point for running a chat server. It ties together
//! all the layers: transport → protocol → session → room.

use std::sync::{Arc, Mutex};

use chatwire_protocol::{
    ChangeRoomEvent, JsonCodec, Registry, RegistryError, Router, SendMessageEvent,
};
use chatwire_room::BroadcastHandle;
use chatwire_session::{Authenticator, LoginService, OtpStore, spawn_sweeper};
use chatwire_transport::{Transport, WebSocketTransport};

use crate::ChatError;
use crate::config::ServerConfig;
use crate::gate::OtpGate;
use crate::handler::{Action, ServerContext, handle_upgrade};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    pub(crate) router: Router<ServerContext>,
    pub(crate) coordinator: BroadcastHandle,
    pub(crate) codec: JsonCodec,
}

/// The event types a server accepts from clients.
pub(crate) fn server_router() -> Result<Router<ServerContext>, RegistryError> {
    let mut registry = Registry::new();
    registry
        .register(|ctx: &mut ServerContext, event: SendMessageEvent| {
            ctx.pending.push(Action::Publish(event));
            Ok(())
        })?
        .register(|ctx: &mut ServerContext, event: ChangeRoomEvent| {
            ctx.pending.push(Action::ChangeRoom(event.name));
            Ok(())
        })?;
    Ok(Router::new(registry))
}

/// Builder for configuring and starting a chat server.
///
/// # Example
///
/// ```rust,no_run
/// use chatwire::prelude::*;
///
/// # async fn run() -> Result<(), ChatError> {
/// let auth = StaticAuthenticator::new().with_user("alice", "wonderland");
/// let server = ChatServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build(auth)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct ChatServerBuilder {
    config: ServerConfig,
}

impl ChatServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listener and starts the coordinator and token sweeper.
    ///
    /// # Errors
    /// [`ChatError::Registry`] if the server's event table is inconsistent,
    /// [`ChatError::Transport`] if the address can't be bound.
    pub async fn build<A: Authenticator>(self, auth: A) -> Result<ChatServer<A>, ChatError> {
        let router = server_router()?;

        let otps = Arc::new(Mutex::new(OtpStore::new(
            self.config.otp_retention_period(),
        )));
        spawn_sweeper(&otps, self.config.otp_sweep_interval());

        let gate = OtpGate::new(Arc::clone(&otps), self.config.allowed_origins.clone());
        let transport = WebSocketTransport::bind_with_gate(&self.config.bind_addr, gate)
            .await?
            .max_message_size(self.config.max_frame_bytes);

        let state = Arc::new(ServerState {
            config: self.config,
            router,
            coordinator: BroadcastHandle::spawn(),
            codec: JsonCodec,
        });

        Ok(ChatServer {
            transport,
            state,
            login: LoginService::new(Arc::new(auth), otps),
        })
    }
}

impl Default for ChatServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound chat server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct ChatServer<A> {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
    login: LoginService<A>,
}

impl<A: Authenticator> ChatServer<A> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The credential exchange clients use to obtain upgrade tokens.
    pub fn login(&self) -> LoginService<A> {
        self.login.clone()
    }

    /// A handle to the broadcast coordinator, for inspecting membership.
    pub fn broadcast(&self) -> BroadcastHandle {
        self.state.coordinator.clone()
    }

    /// Runs the accept loop until the process is terminated.
    ///
    /// The loop only accepts sockets. The upgrade handshake and everything
    /// after it run in a task per connection, so a client that never
    /// finishes its handshake holds up nobody else.
    pub async fn run(mut self) -> Result<(), ChatError> {
        tracing::info!(addr = %self.state.config.bind_addr, "chat server running");

        loop {
            match self.transport.accept().await {
                Ok(pending) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_upgrade(pending, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chatwire_protocol::{Envelope, RoomName};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_server_router_handles_client_events_only() {
        let router = server_router().unwrap();
        assert_eq!(router.tags(), vec!["change_room", "send_message"]);
        assert!(!router.handles("new_message"));
    }

    #[test]
    fn test_server_router_queues_actions_in_order() {
        let router = server_router().unwrap();
        let mut ctx = ServerContext::default();

        router
            .route(
                &Envelope::new("change_room", Some(json!({"name": "random"}))),
                &mut ctx,
            )
            .unwrap();
        router
            .route(
                &Envelope::new("send_message", Some(json!({"message": "hi", "from": "x"}))),
                &mut ctx,
            )
            .unwrap();

        assert_eq!(ctx.pending.len(), 2);
        assert!(matches!(&ctx.pending[0], Action::ChangeRoom(name) if *name == RoomName::from("random")));
        assert!(matches!(&ctx.pending[1], Action::Publish(ev) if ev.message == "hi"));
    }
}
