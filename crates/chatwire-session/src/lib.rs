//! Chat session management for Chatwire.
//!
//! This crate covers everything between "who are you?" and "you are
//! connected, in this room":
//!
//! 1. **Credential exchange** — trading a username and password for a
//!    short-lived one-time token ([`CredentialExchange`], [`LoginService`])
//! 2. **Token issuance** — the server-side store of one-time tokens
//!    ([`OtpStore`]) and the [`Authenticator`] that checks credentials
//! 3. **Session state** — the per-connection [`Session`] state machine
//!    tracking connection phase and current room
//!
//! # How it fits in the stack
//!
//! ```text
//! Client / server glue (above)  ← drives the session from transport signals
//!     ↕
//! Session layer (this crate)    ← connection phase, room, identity, tokens
//!     ↕
//! Protocol layer (below)        ← Envelope, events, Identity, RoomName
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod login;
mod otp;
mod session;

pub use auth::{Authenticator, CredentialExchange, Credentials, Otp, StaticAuthenticator};
pub use error::SessionError;
pub use login::LoginService;
pub use otp::{DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL, OtpStore, spawn_sweeper};
pub use session::{CloseCause, ConnectionState, Session};
