//! The chat client: one session over one WebSocket.
//!
//! [`ChatClient::connect`] walks the session through the upgrade:
//!
//! ```text
//! Disconnected ──exchange credentials──→ Authenticating ──upgrade ok──→ Connected
//!      ↑                                       │
//!      └──────────── upgrade refused ──────────┘
//! ```
//!
//! Once connected, two tasks run in the background. The reader decodes
//! inbound frames and routes them under the session lock, so a
//! `new_message` reaches the [`DisplaySink`] exactly once. The writer
//! drains the outbound queue onto the socket. `change_room` and
//! `send_message` first wait for a free slot in the outbound queue, then
//! take the session lock and fill that slot before releasing it. Nothing
//! waits on the queue while holding the lock, and the order events leave
//! in still matches the order the session saw them.
//!
//! When the transport goes away for any reason the session drops to
//! `Disconnected`, queued events are discarded and both tasks stop. There
//! is no automatic reconnect: call `connect` again.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chatwire_protocol::{
    Codec, Envelope, ErrorEvent, HandlerError, Identity, JsonCodec, NewMessageEvent, Registry,
    RegistryError, RoomName, RouteError, Router,
};
use chatwire_session::{
    CloseCause, ConnectionState, CredentialExchange, Credentials, Session, SessionError,
};
use chatwire_transport::{Connection, TransportError, WebSocketConnection, connect};
use tokio::sync::{Mutex, mpsc, watch};

use crate::config::ClientConfig;
use crate::display::{DisplayMessage, DisplaySink};
use crate::ChatError;

/// Something the client received but could not act on.
///
/// None of these close the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientWarning {
    /// A frame that didn't decode as an envelope.
    Undecodable(String),
    /// An envelope the client has no use for, or whose payload was bad.
    Route(RouteError),
    /// The server reported a problem with something this client sent.
    Server(String),
}

/// What client-side handlers operate on. Lives behind the session lock.
struct ClientContext {
    session: Session,
    outbound: Option<mpsc::Sender<Envelope>>,
    sink: Box<dyn DisplaySink>,
    warnings: mpsc::UnboundedSender<ClientWarning>,
}

/// The event types a client accepts from the server.
fn client_router() -> Result<Router<ClientContext>, RegistryError> {
    let mut registry = Registry::new();
    registry
        .register(|ctx: &mut ClientContext, event: NewMessageEvent| {
            ctx.session
                .on_new_message(&event)
                .map_err(|e| HandlerError::new(e.to_string()))?;
            ctx.sink.display(&DisplayMessage::from(event));
            Ok(())
        })?
        .register(|ctx: &mut ClientContext, event: ErrorEvent| {
            tracing::warn!(reason = %event.message, "server reported an error");
            let _ = ctx.warnings.send(ClientWarning::Server(event.message));
            Ok(())
        })?;
    Ok(Router::new(registry))
}

struct Shared {
    ctx: Mutex<ClientContext>,
    router: Router<ClientContext>,
    codec: JsonCodec,
    conn: WebSocketConnection,
    warnings: mpsc::UnboundedSender<ClientWarning>,
    state: watch::Sender<ConnectionState>,
    closed: watch::Sender<Option<CloseCause>>,
}

impl Shared {
    /// Claims a slot in the outbound queue without holding the session lock.
    async fn reserve_slot(&self) -> Result<mpsc::OwnedPermit<Envelope>, ChatError> {
        let outbound = {
            let ctx = self.ctx.lock().await;
            ctx.outbound
                .clone()
                .ok_or(SessionError::NotConnected(ctx.session.state()))?
        };
        let permit = outbound
            .reserve_owned()
            .await
            .map_err(|_| TransportError::ConnectionClosed("outbound queue closed".into()))?;
        Ok(permit)
    }

    async fn dispatch(&self, data: &[u8]) {
        let envelope = match self.codec.decode_envelope(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
                let _ = self.warnings.send(ClientWarning::Undecodable(e.to_string()));
                return;
            }
        };

        let mut ctx = self.ctx.lock().await;
        if let Err(e) = self.router.route(&envelope, &mut *ctx) {
            tracing::warn!(error = %e, "inbound event not handled");
            let _ = self.warnings.send(ClientWarning::Route(e));
        }
    }

    /// Moves the session to `Disconnected` and closes the socket. Only the
    /// first call has any effect.
    async fn finish(&self, cause: CloseCause) {
        {
            let mut ctx = self.ctx.lock().await;
            if ctx.session.state() == ConnectionState::Disconnected {
                return;
            }
            let cause = ctx.session.close(cause);
            ctx.outbound = None;
            self.state.send_replace(ConnectionState::Disconnected);
            self.closed.send_replace(Some(cause));
        }
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "close after disconnect");
        }
    }
}

async fn closed_signal(rx: &mut watch::Receiver<Option<CloseCause>>) {
    let _ = rx.wait_for(Option::is_some).await;
}

async fn read_loop(shared: Arc<Shared>) {
    let mut closed = shared.closed.subscribe();
    let cause = loop {
        let data = tokio::select! {
            _ = closed_signal(&mut closed) => return,
            received = shared.conn.recv() => match received {
                Ok(Some(data)) => data,
                Ok(None) => break CloseCause::Closed,
                Err(e) => break CloseCause::Error(e.to_string()),
            },
        };
        shared.dispatch(&data).await;
    };
    shared.finish(cause).await;
}

async fn write_loop(shared: Arc<Shared>, mut rx: mpsc::Receiver<Envelope>) {
    let mut closed = shared.closed.subscribe();
    let cause = loop {
        let envelope = tokio::select! {
            biased;
            _ = closed_signal(&mut closed) => return,
            queued = rx.recv() => match queued {
                Some(envelope) => envelope,
                None => return,
            },
        };
        let bytes = match shared.codec.encode_envelope(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode outbound envelope");
                continue;
            }
        };
        if let Err(e) = shared.conn.send(&bytes).await {
            break CloseCause::Error(e.to_string());
        }
    };
    // Release anyone blocked on a full queue before taking the lock.
    drop(rx);
    shared.finish(cause).await;
}

/// A connected chat client.
///
/// Dropping the client closes the connection.
pub struct ChatClient {
    shared: Arc<Shared>,
    identity: Identity,
    warnings: StdMutex<Option<mpsc::UnboundedReceiver<ClientWarning>>>,
}

impl ChatClient {
    /// Exchanges `credentials` for a one-time token and opens the
    /// WebSocket with it.
    ///
    /// # Errors
    /// - [`ChatError::Session`] with [`SessionError::Unauthorized`] if
    ///   the exchange is refused; nothing is connected.
    /// - [`ChatError::Transport`] if the upgrade fails, for example
    ///   `UpgradeRejected(401)` for a token that expired in between.
    pub async fn connect<X, S>(
        config: &ClientConfig,
        exchange: &X,
        credentials: &Credentials,
        sink: S,
    ) -> Result<Self, ChatError>
    where
        X: CredentialExchange,
        S: DisplaySink,
    {
        let router = client_router()?;
        let mut session = Session::new();

        let otp = exchange.exchange(credentials).await?;
        let identity = otp
            .identity()
            .cloned()
            .unwrap_or_else(|| Identity::from(credentials.username.as_str()));
        session.begin_upgrade(identity.clone())?;

        let conn = match connect(&config.upgrade_url(otp.as_str())).await {
            Ok(conn) => conn,
            Err(e) => {
                session.fail_upgrade()?;
                tracing::warn!(%identity, error = %e, "upgrade failed");
                return Err(e.into());
            }
        };
        session.confirm_upgrade()?;

        let (tx, rx) = mpsc::channel(config.outbound_queue.max(1));
        let (warn_tx, warn_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Connected);
        let (closed, _) = watch::channel(None);

        let shared = Arc::new(Shared {
            ctx: Mutex::new(ClientContext {
                session,
                outbound: Some(tx),
                sink: Box::new(sink),
                warnings: warn_tx.clone(),
            }),
            router,
            codec: JsonCodec,
            conn,
            warnings: warn_tx,
            state,
            closed,
        });

        tokio::spawn(read_loop(Arc::clone(&shared)));
        tokio::spawn(write_loop(Arc::clone(&shared), rx));

        Ok(Self {
            shared,
            identity,
            warnings: StdMutex::new(Some(warn_rx)),
        })
    }

    /// The identity this client authenticated as.
    ///
    /// This is the identity the token was issued to, which is what the
    /// server stamps as `from` on this client's messages. It only falls
    /// back to the username from the credentials when the exchange
    /// returned a bare token.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watches the connection state. Starts at `Connected`.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub async fn current_room(&self) -> Option<RoomName> {
        self.shared.ctx.lock().await.session.current_room().cloned()
    }

    /// Switches rooms. The local room changes immediately; switching to
    /// the room the client is already in sends nothing.
    ///
    /// # Errors
    /// [`SessionError::NotConnected`] once the connection is gone,
    /// [`SessionError::EmptyRoomName`] for `""`.
    pub async fn change_room(&self, name: impl Into<RoomName>) -> Result<(), ChatError> {
        let permit = self.shared.reserve_slot().await?;
        let mut ctx = self.shared.ctx.lock().await;
        if let Some(envelope) = ctx.session.change_room(name.into())? {
            permit.send(envelope);
        }
        Ok(())
    }

    /// Sends `text` to the current room.
    ///
    /// # Errors
    /// [`SessionError::NotConnected`] once the connection is gone.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), ChatError> {
        let permit = self.shared.reserve_slot().await?;
        let ctx = self.shared.ctx.lock().await;
        let envelope = ctx.session.send_message(text)?;
        permit.send(envelope);
        Ok(())
    }

    /// Closes the connection. Queued events that haven't been written yet
    /// are discarded.
    pub async fn close(&self) {
        self.shared.finish(CloseCause::Closed).await;
    }

    /// Resolves once the connection has closed, with the reason.
    pub async fn closed(&self) -> CloseCause {
        let mut rx = self.shared.closed.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(cause) => (*cause).clone().unwrap_or(CloseCause::Closed),
            Err(_) => CloseCause::Closed,
        }
    }

    /// Takes the stream of [`ClientWarning`]s. Returns `None` after the
    /// first call.
    pub fn take_warnings(&self) -> Option<mpsc::UnboundedReceiver<ClientWarning>> {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if self.shared.closed.borrow().is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                shared.finish(CloseCause::Closed).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_router_handles_server_events_only() {
        let router = client_router().unwrap();
        assert_eq!(router.tags(), vec!["error", "new_message"]);
        assert!(!router.handles("send_message"));
    }
}
