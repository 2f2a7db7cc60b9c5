//! The server's upgrade gate: origin check, then one-time token.

use std::sync::{Arc, Mutex, PoisonError};

use chatwire_session::OtpStore;
use chatwire_transport::{GateRejection, UpgradeGate, UpgradeRequest};

/// Admits an upgrade carrying a valid `otp` query parameter from an
/// allowed origin. The admitted peer is labelled with the identity the
/// token was issued to.
///
/// The origin is checked first, so a request from a forbidden origin
/// never consumes a token.
pub(crate) struct OtpGate {
    otps: Arc<Mutex<OtpStore>>,
    allowed_origins: Vec<String>,
}

impl OtpGate {
    pub(crate) fn new(otps: Arc<Mutex<OtpStore>>, allowed_origins: Vec<String>) -> Self {
        Self {
            otps,
            allowed_origins,
        }
    }

    fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
    }
}

impl UpgradeGate for OtpGate {
    fn admit(&self, request: &UpgradeRequest<'_>) -> Result<String, GateRejection> {
        if !self.origin_allowed(request.origin) {
            tracing::debug!(origin = ?request.origin, "upgrade from disallowed origin");
            return Err(GateRejection::Forbidden);
        }

        let token = request
            .query_param("otp")
            .filter(|t| !t.is_empty())
            .ok_or(GateRejection::Unauthorized)?;

        let identity = self
            .otps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .redeem(token)
            .ok_or(GateRejection::Unauthorized)?;

        Ok(identity.0)
    }
}

#[cfg(test)]
mod tests {
    use chatwire_protocol::Identity;

    use super::*;

    fn gate(origins: &[&str]) -> (OtpGate, Arc<Mutex<OtpStore>>) {
        let store = Arc::new(Mutex::new(OtpStore::default()));
        let gate = OtpGate::new(
            Arc::clone(&store),
            origins.iter().map(|o| o.to_string()).collect(),
        );
        (gate, store)
    }

    fn request<'a>(query: Option<&'a str>, origin: Option<&'a str>) -> UpgradeRequest<'a> {
        UpgradeRequest {
            path: "/ws",
            query,
            origin,
        }
    }

    #[test]
    fn test_admit_valid_token_labels_peer_with_identity() {
        let (gate, store) = gate(&[]);
        let otp = store.lock().unwrap().issue(Identity::from("alice"));
        let query = format!("otp={}", otp.as_str());

        let peer = gate.admit(&request(Some(&query), None)).unwrap();

        assert_eq!(peer, "alice");
    }

    #[test]
    fn test_admit_token_works_only_once() {
        let (gate, store) = gate(&[]);
        let otp = store.lock().unwrap().issue(Identity::from("alice"));
        let query = format!("otp={}", otp.as_str());

        gate.admit(&request(Some(&query), None)).unwrap();
        let second = gate.admit(&request(Some(&query), None));

        assert_eq!(second, Err(GateRejection::Unauthorized));
    }

    #[test]
    fn test_admit_missing_or_empty_token_is_unauthorized() {
        let (gate, _) = gate(&[]);
        assert_eq!(
            gate.admit(&request(None, None)),
            Err(GateRejection::Unauthorized)
        );
        assert_eq!(
            gate.admit(&request(Some("otp="), None)),
            Err(GateRejection::Unauthorized)
        );
    }

    #[test]
    fn test_admit_disallowed_origin_is_forbidden_and_keeps_token() {
        let (gate, store) = gate(&["https://chat.example.com"]);
        let otp = store.lock().unwrap().issue(Identity::from("alice"));
        let query = format!("otp={}", otp.as_str());

        let rejected = gate.admit(&request(Some(&query), Some("https://evil.example")));
        assert_eq!(rejected, Err(GateRejection::Forbidden));
        assert_eq!(store.lock().unwrap().len(), 1);

        let admitted = gate.admit(&request(Some(&query), Some("https://chat.example.com")));
        assert_eq!(admitted, Ok("alice".to_string()));
    }

    #[test]
    fn test_admit_missing_origin_is_forbidden_when_list_set() {
        let (gate, _) = gate(&["https://chat.example.com"]);
        assert_eq!(
            gate.admit(&request(Some("otp=x"), None)),
            Err(GateRejection::Forbidden)
        );
    }
}
