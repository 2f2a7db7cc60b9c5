//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, header};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    Connection, ConnectionId, GateRejection, Handshake, OpenGate, Transport, TransportError,
    UpgradeGate, UpgradeRequest,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// How long a peer may take to complete the upgrade handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    gate: Arc<dyn UpgradeGate>,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport that admits every upgrade.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        Self::bind_with_gate(addr, OpenGate).await
    }

    /// Binds a new WebSocket transport whose upgrades pass through `gate`.
    pub async fn bind_with_gate(
        addr: &str,
        gate: impl UpgradeGate,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener,
            gate: Arc::new(gate),
            config: WebSocketConfig::default(),
        })
    }

    /// Caps the size of a single inbound message (and frame) in bytes.
    ///
    /// A peer that sends more gets a receive error instead of having the
    /// message buffered.
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config = self
            .config
            .max_message_size(Some(bytes))
            .max_frame_size(Some(bytes));
        self
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Handshake = PendingUpgrade;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Handshake, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        Ok(PendingUpgrade {
            stream,
            addr,
            gate: Arc::clone(&self.gate),
            config: self.config,
        })
    }
}

/// A TCP connection accepted by [`WebSocketTransport`] whose WebSocket
/// upgrade hasn't run yet.
pub struct PendingUpgrade {
    stream: TcpStream,
    addr: SocketAddr,
    gate: Arc<dyn UpgradeGate>,
    config: WebSocketConfig,
}

impl PendingUpgrade {
    /// The remote socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Handshake for PendingUpgrade {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn complete(self) -> Result<Self::Connection, Self::Error> {
        let Self {
            stream,
            addr,
            gate,
            config,
        } = self;

        let mut admitted: Option<String> = None;
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let upgrade = UpgradeRequest {
                path: req.uri().path(),
                query: req.uri().query(),
                origin: req
                    .headers()
                    .get(header::ORIGIN)
                    .and_then(|v| v.to_str().ok()),
            };
            match gate.admit(&upgrade) {
                Ok(peer) => {
                    admitted = Some(peer);
                    Ok(resp)
                }
                Err(rejection) => Err(rejection_response(&rejection)),
            }
        };

        let ws = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            tokio_tungstenite::accept_hdr_async_with_config(
                MaybeTlsStream::Plain(stream),
                callback,
                Some(config),
            ),
        )
        .await
        .map_err(|_| TransportError::HandshakeTimedOut)?
        .map_err(|e| {
            tracing::debug!(%addr, error = %e, "upgrade refused");
            TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let peer = admitted.unwrap_or_default();
        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %addr, %peer, "accepted WebSocket connection");

        Ok(WebSocketConnection::new(id, peer, ws))
    }
}

fn rejection_response(rejection: &GateRejection) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(rejection.to_string()));
    *response.status_mut() =
        StatusCode::from_u16(rejection.status_code()).unwrap_or(StatusCode::FORBIDDEN);
    response
}

/// Opens a client-side WebSocket connection to `url`.
///
/// A server that refuses the upgrade (for example with HTTP 401 on a
/// stale token) yields [`TransportError::UpgradeRejected`].
pub async fn connect(url: &str) -> Result<WebSocketConnection, TransportError> {
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| match e {
            tungstenite::Error::Http(response) => {
                TransportError::UpgradeRejected(response.status().as_u16())
            }
            other => TransportError::ConnectFailed(other.to_string()),
        })?;

    let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
    tracing::debug!(%id, "opened WebSocket connection");
    Ok(WebSocketConnection::new(id, "server".to_string(), ws))
}

/// A single WebSocket connection, server- or client-side.
///
/// The stream is split so the read half and the write half lock
/// independently.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    opened: Instant,
    /// Milliseconds after `opened` at which the last frame of any kind arrived.
    last_heard_ms: AtomicU64,
}

impl WebSocketConnection {
    fn new(id: ConnectionId, peer: String, ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id,
            peer,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            opened: Instant::now(),
            last_heard_ms: AtomicU64::new(0),
        }
    }

    /// Time since the peer last sent anything, pongs included.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_heard_ms.load(Ordering::Relaxed));
        self.opened.elapsed().saturating_sub(last)
    }

    fn touch(&self) {
        let now = self.opened.elapsed().as_millis() as u64;
        self.last_heard_ms.store(now, Ordering::Relaxed);
    }

    async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let msg = match std::str::from_utf8(data) {
            Ok(text) => Message::Text(text.to_owned().into()),
            Err(_) => Message::Binary(data.to_vec().into()),
        };
        self.send_message(msg).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        loop {
            let msg = self.stream.lock().await.next().await;
            if matches!(msg, Some(Ok(_))) {
                self.touch();
            }
            match msg {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        self.send_message(Message::Ping(Vec::<u8>::new().into())).await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        match self.sink.lock().await.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}
