//! The per-connection session: connection phase, identity, current room.
//!
//! A session is owned by exactly one connection and mutated only through
//! the methods here, in response to local user actions or routed inbound
//! events. Callers that share it between tasks wrap it in a mutex; the
//! methods themselves never block or touch the network.

use std::fmt;

use chatwire_protocol::{
    ChangeRoomEvent, Envelope, Identity, NewMessageEvent, RoomName, SendMessageEvent,
};

use crate::SessionError;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Where a session is in its connection lifecycle.
///
/// ```text
///                 begin_upgrade                confirm_upgrade
///  Disconnected ───────────────→ Authenticating ───────────────→ Connected
///       ↑                              │                            │
///       └────────── fail_upgrade ──────┘                            │
///       └──────────────────────────── close ────────────────────────┘
/// ```
///
/// A session that has gone back to `Disconnected` is finished. Reconnecting
/// means a fresh credential exchange and a fresh upgrade, not resuming the
/// old room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Authenticating,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Why the transport went away. Diagnostic only: every cause leads to
/// the same `Disconnected` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Either side closed the connection cleanly.
    Closed,
    /// The peer went quiet for longer than the keep-alive allows.
    Timeout,
    /// The transport failed.
    Error(String),
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("connection closed"),
            Self::Timeout => f.write_str("connection timed out"),
            Self::Error(reason) => write!(f, "connection error: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One connection's chat session.
///
/// Only one room is active at a time. Room changes are optimistic:
/// [`change_room`](Self::change_room) updates `current_room` immediately
/// and hands back the event to send; it does not wait for the server.
/// Room membership here only decides where outbound messages go. The
/// broadcast coordinator decides what is delivered.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: ConnectionState,
    current_room: Option<RoomName>,
    identity: Option<Identity>,
}

impl Session {
    /// A new session, `Disconnected`, with no identity or room.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn current_room(&self) -> Option<&RoomName> {
        self.current_room.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Credentials were exchanged for a token; the upgrade is starting.
    pub fn begin_upgrade(&mut self, identity: Identity) -> Result<(), SessionError> {
        self.expect_state(ConnectionState::Disconnected, "begin upgrade")?;
        tracing::debug!(%identity, "session authenticating");
        self.identity = Some(identity);
        self.state = ConnectionState::Authenticating;
        Ok(())
    }

    /// The transport confirmed the upgrade. No room is selected yet.
    pub fn confirm_upgrade(&mut self) -> Result<(), SessionError> {
        self.expect_state(ConnectionState::Authenticating, "confirm upgrade")?;
        self.state = ConnectionState::Connected;
        self.current_room = None;
        tracing::info!(identity = ?self.identity, "session connected");
        Ok(())
    }

    /// The upgrade was refused or failed.
    pub fn fail_upgrade(&mut self) -> Result<(), SessionError> {
        self.expect_state(ConnectionState::Authenticating, "fail upgrade")?;
        self.state = ConnectionState::Disconnected;
        self.identity = None;
        Ok(())
    }

    /// Switches to room `name` and returns the `change_room` envelope to send.
    ///
    /// Returns `Ok(None)` when already in that room: nothing changes and
    /// nothing needs sending.
    ///
    /// # Errors
    /// - [`SessionError::NotConnected`] unless `Connected`; the room is
    ///   left as it was.
    /// - [`SessionError::EmptyRoomName`] for `""`.
    pub fn change_room(&mut self, name: RoomName) -> Result<Option<Envelope>, SessionError> {
        self.require_connected()?;
        if name.is_empty() {
            return Err(SessionError::EmptyRoomName);
        }
        if self.current_room.as_ref() == Some(&name) {
            return Ok(None);
        }

        let envelope = Envelope::from_event(&ChangeRoomEvent { name: name.clone() })?;
        tracing::debug!(room = %name, "room changed");
        self.current_room = Some(name);
        Ok(Some(envelope))
    }

    /// Builds the `send_message` envelope for `text`, signed with the
    /// session's own identity.
    ///
    /// # Errors
    /// [`SessionError::NotConnected`] unless `Connected`.
    pub fn send_message(&self, text: impl Into<String>) -> Result<Envelope, SessionError> {
        self.require_connected()?;
        let from = self
            .identity
            .clone()
            .ok_or(SessionError::NotConnected(self.state))?;
        let envelope = Envelope::from_event(&SendMessageEvent {
            message: text.into(),
            from,
        })?;
        Ok(envelope)
    }

    /// Accepts an inbound `new_message`. No state changes.
    ///
    /// Messages are not filtered by room: one tagged for a room this
    /// session just left is still accepted.
    pub fn on_new_message(&self, _event: &NewMessageEvent) -> Result<(), SessionError> {
        self.require_connected()
    }

    /// The transport closed. Clears room and identity and returns `cause`
    /// so the caller can report it.
    pub fn close(&mut self, cause: CloseCause) -> CloseCause {
        if self.state != ConnectionState::Disconnected {
            tracing::info!(identity = ?self.identity, %cause, "session disconnected");
        }
        self.state = ConnectionState::Disconnected;
        self.current_room = None;
        self.identity = None;
        cause
    }

    fn require_connected(&self) -> Result<(), SessionError> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected(self.state));
        }
        Ok(())
    }

    fn expect_state(
        &self,
        expected: ConnectionState,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        if self.state != expected {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                operation,
            });
        }
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for the session state machine.
    //!
    //! Naming follows `test_{operation}_{scenario}_{expected}`.

    use chatwire_protocol::{ChangeRoomEvent, SendMessageEvent};

    use super::*;

    fn connected(identity: &str) -> Session {
        let mut session = Session::new();
        session.begin_upgrade(Identity::from(identity)).unwrap();
        session.confirm_upgrade().unwrap();
        session
    }

    fn room(name: &str) -> RoomName {
        RoomName::from(name)
    }

    // =====================================================================
    // Upgrade lifecycle
    // =====================================================================

    #[test]
    fn test_new_session_is_disconnected() {
        let session = Session::new();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.current_room().is_none());
        assert!(session.identity().is_none());
    }

    #[test]
    fn test_happy_path_walks_disconnected_authenticating_connected() {
        let mut session = Session::new();
        let mut seen = vec![session.state()];

        session.begin_upgrade(Identity::from("alice")).unwrap();
        seen.push(session.state());
        session.confirm_upgrade().unwrap();
        seen.push(session.state());

        assert_eq!(
            seen,
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Authenticating,
                ConnectionState::Connected,
            ]
        );
        assert_eq!(session.identity(), Some(&Identity::from("alice")));
        assert!(session.current_room().is_none(), "no room right after connect");
    }

    #[test]
    fn test_fail_upgrade_returns_to_disconnected() {
        let mut session = Session::new();
        session.begin_upgrade(Identity::from("alice")).unwrap();

        session.fail_upgrade().unwrap();

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.identity().is_none());
    }

    #[test]
    fn test_confirm_upgrade_from_disconnected_is_invalid() {
        let mut session = Session::new();

        let err = session.confirm_upgrade().unwrap_err();

        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                from: ConnectionState::Disconnected,
                ..
            }
        ));
    }

    #[test]
    fn test_begin_upgrade_twice_is_invalid() {
        let mut session = Session::new();
        session.begin_upgrade(Identity::from("alice")).unwrap();

        assert!(session.begin_upgrade(Identity::from("alice")).is_err());
        assert_eq!(session.state(), ConnectionState::Authenticating);
    }

    // =====================================================================
    // change_room()
    // =====================================================================

    #[test]
    fn test_change_room_updates_room_immediately() {
        let mut session = connected("alice");

        let envelope = session.change_room(room("random")).unwrap().unwrap();

        assert_eq!(session.current_room(), Some(&room("random")));
        assert_eq!(envelope.event_type, "change_room");
        let event: ChangeRoomEvent = envelope.payload_as().unwrap();
        assert_eq!(event.name, room("random"));
    }

    #[test]
    fn test_change_room_to_current_room_sends_nothing() {
        let mut session = connected("alice");
        session.change_room(room("random")).unwrap();

        let second = session.change_room(room("random")).unwrap();

        assert!(second.is_none());
        assert_eq!(session.current_room(), Some(&room("random")));
    }

    #[test]
    fn test_change_room_while_disconnected_is_rejected() {
        let mut session = Session::new();

        let err = session.change_room(room("random")).unwrap_err();

        assert!(matches!(
            err,
            SessionError::NotConnected(ConnectionState::Disconnected)
        ));
        assert!(session.current_room().is_none());
    }

    #[test]
    fn test_change_room_while_authenticating_is_rejected() {
        let mut session = Session::new();
        session.begin_upgrade(Identity::from("alice")).unwrap();

        let err = session.change_room(room("random")).unwrap_err();

        assert!(matches!(
            err,
            SessionError::NotConnected(ConnectionState::Authenticating)
        ));
        assert!(session.current_room().is_none());
    }

    #[test]
    fn test_change_room_empty_name_is_rejected() {
        let mut session = connected("alice");
        session.change_room(room("general")).unwrap();

        let err = session.change_room(room("")).unwrap_err();

        assert!(matches!(err, SessionError::EmptyRoomName));
        assert_eq!(session.current_room(), Some(&room("general")));
    }

    #[test]
    fn test_room_names_are_case_sensitive() {
        let mut session = connected("alice");
        session.change_room(room("general")).unwrap();

        assert!(session.change_room(room("General")).unwrap().is_some());
    }

    // =====================================================================
    // send_message()
    // =====================================================================

    #[test]
    fn test_send_message_signs_with_session_identity() {
        let session = connected("alice");

        let envelope = session.send_message("hello").unwrap();

        let event: SendMessageEvent = envelope.payload_as().unwrap();
        assert_eq!(event.from, Identity::from("alice"));
        assert_eq!(event.message, "hello");
    }

    #[test]
    fn test_send_message_while_disconnected_is_rejected() {
        let session = Session::new();
        assert!(matches!(
            session.send_message("hello"),
            Err(SessionError::NotConnected(_))
        ));
    }

    // =====================================================================
    // on_new_message() / close()
    // =====================================================================

    #[test]
    fn test_new_message_for_previous_room_is_accepted() {
        let mut session = connected("alice");
        session.change_room(room("general")).unwrap();
        session.change_room(room("random")).unwrap();

        let from_general = NewMessageEvent {
            message: "late".into(),
            from: Identity::from("bob"),
            sent: 1,
        };

        assert!(session.on_new_message(&from_general).is_ok());
        assert_eq!(session.current_room(), Some(&room("random")));
    }

    #[test]
    fn test_close_clears_room_and_identity() {
        let mut session = connected("alice");
        session.change_room(room("random")).unwrap();

        let cause = session.close(CloseCause::Timeout);

        assert_eq!(cause, CloseCause::Timeout);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.current_room().is_none());
        assert!(session.identity().is_none());
    }

    #[test]
    fn test_close_cause_does_not_change_resulting_state() {
        for cause in [
            CloseCause::Closed,
            CloseCause::Timeout,
            CloseCause::Error("reset".into()),
        ] {
            let mut session = connected("alice");
            session.close(cause);
            assert_eq!(session.state(), ConnectionState::Disconnected);
        }
    }

    #[test]
    fn test_actions_after_close_are_rejected() {
        let mut session = connected("alice");
        session.close(CloseCause::Closed);

        assert!(session.change_room(room("random")).is_err());
        assert!(session.send_message("hi").is_err());
    }
}
