//! Upgrade gate: decides whether an incoming upgrade request is admitted.
//!
//! The gate runs inside the HTTP upgrade handshake, before any frame is
//! exchanged. Rejected requests never become a [`Connection`](crate::Connection);
//! the peer sees a plain HTTP error status instead.

use std::fmt;

/// The parts of an upgrade request a gate may look at.
#[derive(Debug, Clone, Copy)]
pub struct UpgradeRequest<'a> {
    /// Request path, e.g. `/ws`.
    pub path: &'a str,
    /// Raw query string without the leading `?`.
    pub query: Option<&'a str>,
    /// Value of the `Origin` header, if present and valid UTF-8.
    pub origin: Option<&'a str>,
}

impl<'a> UpgradeRequest<'a> {
    /// Returns the first value of query parameter `name`.
    ///
    /// Values are returned verbatim; no percent-decoding is applied.
    pub fn query_param(&self, name: &str) -> Option<&'a str> {
        self.query?
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

/// Why a gate refused an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    /// Missing or invalid credentials. Answered with HTTP 401.
    Unauthorized,
    /// The request came from a disallowed origin. Answered with HTTP 403.
    Forbidden,
}

impl GateRejection {
    /// The HTTP status code sent back to the peer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
        }
    }
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::Forbidden => f.write_str("forbidden"),
        }
    }
}

/// Admits or rejects upgrade requests.
///
/// `admit` is synchronous because it runs inside the handshake callback.
/// On success it returns a label for the peer (typically the identity
/// bound to the presented token), retrievable later through
/// [`Connection::peer`](crate::Connection::peer).
pub trait UpgradeGate: Send + Sync + 'static {
    /// Inspects the request and returns the peer label or a rejection.
    fn admit(&self, request: &UpgradeRequest<'_>) -> Result<String, GateRejection>;
}

/// A gate that admits every request. Peers are labelled `anonymous`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl UpgradeGate for OpenGate {
    fn admit(&self, _request: &UpgradeRequest<'_>) -> Result<String, GateRejection> {
        Ok("anonymous".to_string())
    }
}
