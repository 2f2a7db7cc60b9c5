//! Credential checking and the credential-for-token exchange.
//!
//! Connecting is a two-step affair. First the client trades a username and
//! password for a short-lived one-time token ([`Otp`]) through a
//! [`CredentialExchange`]. Then it opens the WebSocket with that token in
//! the `otp` query parameter, and the server redeems it during the upgrade.
//! The password never travels over the WebSocket.
//!
//! Checking the password is the [`Authenticator`]'s job. Swap in your own
//! user store; [`StaticAuthenticator`] is a fixed in-memory table for demos
//! and tests.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use chatwire_protocol::Identity;
use serde::Deserialize;

use crate::SessionError;

/// A username and password pair.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A one-time token, valid for a single WebSocket upgrade.
///
/// Tokens minted by an [`OtpStore`](crate::OtpStore) also carry the
/// identity the server will bind the connection to. That can differ from
/// the username typed in, for example when the authenticator normalizes
/// case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Otp {
    token: String,
    identity: Option<Identity>,
}

impl Otp {
    /// A bare token, with no identity attached.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            identity: None,
        }
    }

    /// A token the server will redeem as `identity`.
    pub fn issued_to(token: impl Into<String>, identity: Identity) -> Self {
        Self {
            token: token.into(),
            identity: Some(identity),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// The identity the token is bound to, when the issuer said.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }
}

/// Trades credentials for a one-time token.
///
/// Implement this over whatever carries credentials in your deployment:
/// an HTTP call, an in-process [`LoginService`](crate::LoginService), a
/// stub in tests.
pub trait CredentialExchange: Send + Sync {
    /// # Errors
    /// [`SessionError::Unauthorized`] on any failure. Callers do not learn
    /// whether the username or the password was wrong.
    fn exchange(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Otp, SessionError>> + Send;
}

/// Checks credentials and returns the identity they belong to.
///
/// # Example
///
/// ```rust
/// use chatwire_protocol::Identity;
/// use chatwire_session::{Authenticator, Credentials, SessionError};
///
/// /// Lets anyone in whose password is their name reversed.
/// struct Mirror;
///
/// impl Authenticator for Mirror {
///     async fn authenticate(&self, c: &Credentials) -> Result<Identity, SessionError> {
///         let reversed: String = c.username.chars().rev().collect();
///         if c.password == reversed {
///             Ok(Identity::from(c.username.as_str()))
///         } else {
///             Err(SessionError::Unauthorized)
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Identity, SessionError>> + Send;
}

/// An [`Authenticator`] backed by a fixed username/password table.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    users: HashMap<String, String>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a user.
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, SessionError> {
        match self.users.get(&credentials.username) {
            Some(expected) if *expected == credentials.password => {
                Ok(Identity::from(credentials.username.as_str()))
            }
            _ => {
                tracing::debug!(username = %credentials.username, "credentials rejected");
                Err(SessionError::Unauthorized)
            }
        }
    }
}
