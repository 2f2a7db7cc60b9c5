/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The peer did not finish the upgrade handshake in time.
    #[error("upgrade handshake timed out")]
    HandshakeTimedOut,

    /// The server answered the upgrade request with a non-101 status.
    #[error("upgrade rejected with HTTP {0}")]
    UpgradeRejected(u16),

    /// Opening an outgoing connection failed before any HTTP response.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
}
