//! Site session: cookies, persisted snapshot, and the login state machine.

pub mod cookie_jar;
pub mod manager;
pub mod store;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

pub use cookie_jar::CookieJar;
pub use manager::{NonceSource, SessionManager};
pub use store::{CredentialStore, SessionSnapshot, StoreError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("login rejected with status {status}")]
    Authentication { status: u16 },
    #[error("invalid endpoint: {0}")]
    Config(#[from] ConfigError),
}

/// `NoSession -> Validating -> Authenticated`. A restored session is always
/// re-validated before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Validating,
    Authenticated,
}

/// Session state threaded explicitly through every call.
#[derive(Debug, Clone)]
pub struct Session {
    pub jar: CookieJar,
    pub auth_token: Option<String>,
    pub state: SessionState,
    /// When the restored snapshot was written, if this session came from disk.
    pub restored_from: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            jar: CookieJar::new(),
            auth_token: None,
            state: SessionState::NoSession,
            restored_from: None,
        }
    }

    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            jar: snapshot.cookies,
            auth_token: snapshot.auth_token,
            state: SessionState::Validating,
            restored_from: Utc.timestamp_millis_opt(snapshot.timestamp).single(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
