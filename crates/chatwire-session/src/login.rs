//! In-process credential exchange.

use std::sync::{Arc, Mutex, PoisonError};

use crate::{Authenticator, CredentialExchange, Credentials, Otp, OtpStore, SessionError};

/// Checks credentials with an [`Authenticator`] and issues a one-time
/// token from a shared [`OtpStore`].
///
/// Cloning is cheap; clones share the authenticator and the store. The
/// server hands one out from `ChatServer::login()`, and anything that
/// speaks to clients (an HTTP route, a test, the demo binary) calls
/// [`exchange`](CredentialExchange::exchange) on it.
pub struct LoginService<A> {
    auth: Arc<A>,
    otps: Arc<Mutex<OtpStore>>,
}

impl<A: Authenticator> LoginService<A> {
    pub fn new(auth: Arc<A>, otps: Arc<Mutex<OtpStore>>) -> Self {
        Self { auth, otps }
    }

    /// The store tokens are issued into.
    pub fn otps(&self) -> &Arc<Mutex<OtpStore>> {
        &self.otps
    }
}

impl<A> Clone for LoginService<A> {
    fn clone(&self) -> Self {
        Self {
            auth: Arc::clone(&self.auth),
            otps: Arc::clone(&self.otps),
        }
    }
}

impl<A: Authenticator> CredentialExchange for LoginService<A> {
    async fn exchange(&self, credentials: &Credentials) -> Result<Otp, SessionError> {
        let identity = self.auth.authenticate(credentials).await?;
        let otp = self
            .otps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .issue(identity);
        Ok(otp)
    }
}

#[cfg(test)]
mod tests {
    use chatwire_protocol::Identity;

    use super::*;
    use crate::StaticAuthenticator;

    fn service() -> LoginService<StaticAuthenticator> {
        let auth = StaticAuthenticator::new().with_user("alice", "wonderland");
        LoginService::new(Arc::new(auth), Arc::new(Mutex::new(OtpStore::default())))
    }

    #[tokio::test]
    async fn test_exchange_valid_credentials_issues_redeemable_token() {
        let login = service();

        let otp = login
            .exchange(&Credentials::new("alice", "wonderland"))
            .await
            .unwrap();

        let redeemed = login.otps().lock().unwrap().redeem(otp.as_str());
        assert_eq!(redeemed, Some(Identity::from("alice")));
    }

    #[tokio::test]
    async fn test_exchange_bad_credentials_issues_nothing() {
        let login = service();

        let result = login.exchange(&Credentials::new("alice", "nope")).await;

        assert!(matches!(result, Err(SessionError::Unauthorized)));
        assert!(login.otps().lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_one_store() {
        let login = service();
        let other = login.clone();

        other
            .exchange(&Credentials::new("alice", "wonderland"))
            .await
            .unwrap();

        assert_eq!(login.otps().lock().unwrap().len(), 1);
    }
}
