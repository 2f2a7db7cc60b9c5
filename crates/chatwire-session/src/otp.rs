//! One-time upgrade tokens.
//!
//! The server issues a token after a successful credential exchange and
//! redeems it when the WebSocket upgrade arrives. A token works once and
//! only for a short while; a background sweeper drops the ones nobody
//! came back for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chatwire_protocol::Identity;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::Otp;

/// How long an unredeemed token stays valid.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5);

/// How often [`spawn_sweeper`] runs by default.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(400);

struct Issued {
    identity: Identity,
    issued_at: Instant,
}

/// Outstanding one-time tokens and who they were issued to.
///
/// Shared between the credential exchange (which issues) and the upgrade
/// gate (which redeems). The gate runs inside a synchronous handshake
/// callback, so the store sits behind a `std::sync::Mutex` rather than an
/// async one.
pub struct OtpStore {
    tokens: HashMap<String, Issued>,
    retention: Duration,
}

impl OtpStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            tokens: HashMap::new(),
            retention,
        }
    }

    /// Issues a fresh token bound to `identity`.
    pub fn issue(&mut self, identity: Identity) -> Otp {
        let token = generate_token();
        tracing::debug!(%identity, "one-time token issued");
        self.tokens.insert(
            token.clone(),
            Issued {
                identity: identity.clone(),
                issued_at: Instant::now(),
            },
        );
        Otp::issued_to(token, identity)
    }

    /// Consumes `token`, returning the identity it was issued to.
    ///
    /// `None` for unknown, already used, or expired tokens. A token is
    /// removed on the first attempt whether or not it was still valid.
    pub fn redeem(&mut self, token: &str) -> Option<Identity> {
        let issued = self.tokens.remove(token)?;
        if issued.issued_at.elapsed() > self.retention {
            tracing::debug!(identity = %issued.identity, "one-time token expired");
            return None;
        }
        Some(issued.identity)
    }

    /// Drops every token older than the retention period. Returns how many
    /// were dropped.
    pub fn expire_stale(&mut self) -> usize {
        let before = self.tokens.len();
        let retention = self.retention;
        self.tokens
            .retain(|_, issued| issued.issued_at.elapsed() <= retention);
        before - self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for OtpStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

/// Starts a task that calls [`OtpStore::expire_stale`] every `every`.
///
/// The task holds only a weak reference and ends on its own once the
/// store is dropped.
pub fn spawn_sweeper(store: &Arc<Mutex<OtpStore>>, every: Duration) -> JoinHandle<()> {
    let store = Arc::downgrade(store);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(store) = store.upgrade() else {
                break;
            };
            let dropped = store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .expire_stale();
            if dropped > 0 {
                tracing::debug!(dropped, "expired one-time tokens swept");
            }
        }
    })
}

/// 16 random bytes (128 bits) as 32 lowercase hex characters.
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::from("alice")
    }

    #[test]
    fn test_issue_returns_32_hex_chars() {
        let mut store = OtpStore::default();
        let otp = store.issue(alice());

        assert_eq!(otp.as_str().len(), 32);
        assert!(otp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_issued_token_names_its_identity() {
        let mut store = OtpStore::default();
        let otp = store.issue(alice());

        assert_eq!(otp.identity(), Some(&alice()));
        assert_eq!(Otp::new("abc").identity(), None);
    }

    #[test]
    fn test_issue_twice_gives_distinct_tokens() {
        let mut store = OtpStore::default();
        let a = store.issue(alice());
        let b = store.issue(alice());
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_redeem_returns_identity_once() {
        let mut store = OtpStore::default();
        let otp = store.issue(alice());

        assert_eq!(store.redeem(otp.as_str()), Some(alice()));
        assert_eq!(store.redeem(otp.as_str()), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_redeem_unknown_token_is_none() {
        let mut store = OtpStore::default();
        store.issue(alice());
        assert_eq!(store.redeem("not-a-token"), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redeem_after_retention_is_none() {
        let mut store = OtpStore::new(Duration::from_secs(5));
        let otp = store.issue(alice());

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(store.redeem(otp.as_str()), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_stale_drops_only_old_tokens() {
        let mut store = OtpStore::new(Duration::from_secs(5));
        store.issue(alice());
        tokio::time::advance(Duration::from_secs(3)).await;
        let fresh = store.issue(Identity::from("bob"));
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(store.expire_stale(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.redeem(fresh.as_str()), Some(Identity::from("bob")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_tokens_in_background() {
        let store = Arc::new(Mutex::new(OtpStore::new(Duration::from_secs(1))));
        store.lock().unwrap().issue(alice());
        let sweeper = spawn_sweeper(&store, Duration::from_millis(400));

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(store.lock().unwrap().is_empty());
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_store_dropped() {
        let store = Arc::new(Mutex::new(OtpStore::default()));
        let sweeper = spawn_sweeper(&store, Duration::from_millis(400));

        drop(store);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(sweeper.is_finished());
    }
}
