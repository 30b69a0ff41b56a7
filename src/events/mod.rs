//! Event system for request and session activity.
//!
//! Provides hooks for logging and custom reactions around the gateway and
//! the session lifecycle.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Structured pre-request event.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub method: Method,
    pub url: Url,
    pub body_len: usize,
    pub timestamp: DateTime<Utc>,
}

/// Structured post-response event.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub method: Method,
    pub url: Url,
    pub status: u16,
    pub latency: Duration,
    pub cookies_absorbed: usize,
    pub timestamp: DateTime<Utc>,
}

/// Session lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    /// A persisted snapshot was loaded.
    Restored { cookies: usize },
    /// No usable snapshot on disk.
    NoSnapshot,
    Validated,
    Rejected { status: u16 },
    LoginStarted,
    /// The login form had no nonce; the configured default was sent instead.
    NonceFallback,
    /// `redirect` is the `Location` the server sent with the accepted form.
    LoggedIn {
        status: u16,
        redirect: Option<String>,
    },
    LoginFailed { status: u16 },
    Persisted,
    PersistFailed { reason: String },
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub transition: SessionTransition,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn now(transition: SessionTransition) -> Self {
        Self {
            transition,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarningEvent {
    pub context: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
    Session(SessionEvent),
    Warning(WarningEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ClientEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: ClientEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }

    pub fn session(&self, transition: SessionTransition) {
        self.dispatch(ClientEvent::Session(SessionEvent::now(transition)));
    }

    pub fn warn(&self, context: impl Into<String>, message: impl Into<String>) {
        self.dispatch(ClientEvent::Warning(WarningEvent {
            context: context.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }));
    }
}

/// Logs events using the `log` crate. Never prints cookie values or credentials.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &ClientEvent) {
        match event {
            ClientEvent::Request(req) => {
                log::debug!("-> {} {} ({} bytes)", req.method, req.url, req.body_len);
            }
            ClientEvent::Response(resp) => {
                log::debug!(
                    "<- {} {} -> {} ({:.2}s, {} cookies)",
                    resp.method,
                    resp.url,
                    resp.status,
                    resp.latency.as_secs_f64(),
                    resp.cookies_absorbed
                );
            }
            ClientEvent::Session(session) => match &session.transition {
                SessionTransition::Restored { cookies } => {
                    log::info!("restored saved session ({cookies} cookies)");
                }
                SessionTransition::NoSnapshot => log::info!("no saved session found"),
                SessionTransition::Validated => log::info!("saved session is still valid"),
                SessionTransition::Rejected { status } => {
                    log::info!("saved session rejected (status {status}), logging in again");
                }
                SessionTransition::LoginStarted => log::info!("logging in"),
                SessionTransition::NonceFallback => {
                    log::warn!("login nonce not found, using configured fallback nonce");
                }
                SessionTransition::LoggedIn { status, redirect } => match redirect {
                    Some(target) => log::info!("login succeeded (status {status}, redirect to {target})"),
                    None => log::info!("login succeeded (status {status})"),
                },
                SessionTransition::LoginFailed { status } => {
                    log::error!("login failed with status {status}");
                }
                SessionTransition::Persisted => log::debug!("session saved"),
                SessionTransition::PersistFailed { reason } => {
                    log::warn!("could not save session: {reason}");
                }
            },
            ClientEvent::Warning(warning) => {
                log::warn!("{}: {}", warning.context, warning.message);
            }
        }
    }
}
