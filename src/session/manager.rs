//! Login, validation, and persistence of the site session.
//!
//! Lifecycle of a run:
//! 1. Load the saved snapshot. Nothing usable means straight to login.
//! 2. Probe a protected page. Status 200 without the login form means the
//!    saved cookies still work.
//! 3. Otherwise scrape the login nonce, POST the credentials, and save the
//!    resulting cookies. A rejected login ends the run; there is no retry loop.

use std::sync::Arc;

use http::header::{ORIGIN, REFERER};

use crate::config::ClientConfig;
use crate::events::{EventDispatcher, SessionTransition};
use crate::extract::{FieldExtractor, is_login_page};
use crate::transport::{HttpGateway, RequestDescriptor};

use super::{CookieJar, Session, SessionError, SessionSnapshot, SessionState};
use super::store::CredentialStore;

/// Where the nonce sent with the login form came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonceSource {
    Scraped(String),
    /// The page had no nonce input; the configured default is sent instead.
    Fallback(String),
}

impl NonceSource {
    pub fn value(&self) -> &str {
        match self {
            NonceSource::Scraped(value) | NonceSource::Fallback(value) => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, NonceSource::Fallback(_))
    }
}

pub struct SessionManager {
    gateway: HttpGateway,
    store: CredentialStore,
    extractor: Arc<dyn FieldExtractor>,
    config: Arc<ClientConfig>,
    events: Arc<EventDispatcher>,
}

impl SessionManager {
    pub fn new(
        gateway: HttpGateway,
        store: CredentialStore,
        extractor: Arc<dyn FieldExtractor>,
        config: Arc<ClientConfig>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            gateway,
            store,
            extractor,
            config,
            events,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Returns an authenticated session, reusing the saved one when the
    /// server still accepts it.
    pub async fn ensure_session(&self) -> Result<Session, SessionError> {
        let mut session = match self.store.load() {
            Some(snapshot) => {
                self.events.session(SessionTransition::Restored {
                    cookies: snapshot.cookies.len(),
                });
                Session::from_snapshot(snapshot)
            }
            None => {
                self.events.session(SessionTransition::NoSnapshot);
                Session::new()
            }
        };

        if session.state == SessionState::Validating && self.validate(&mut session).await? {
            return Ok(session);
        }

        self.login(&mut session).await?;
        Ok(session)
    }

    /// Probes the protected page with the session's cookies.
    pub async fn validate(&self, session: &mut Session) -> Result<bool, SessionError> {
        session.state = SessionState::Validating;
        let url = self.config.site_url(&self.config.endpoints.probe)?;
        let response = self
            .gateway
            .send(&mut session.jar, RequestDescriptor::get(url))
            .await?;

        let valid = response.is_ok() && !is_login_page(&response.text());
        if valid {
            session.state = SessionState::Authenticated;
            self.events.session(SessionTransition::Validated);
        } else {
            session.state = SessionState::NoSession;
            self.events.session(SessionTransition::Rejected {
                status: response.status,
            });
        }
        Ok(valid)
    }

    /// Full login: scrape the nonce, POST the form, persist on success.
    /// Cookies from a rejected session are discarded first.
    pub async fn login(&self, session: &mut Session) -> Result<(), SessionError> {
        self.events.session(SessionTransition::LoginStarted);
        session.jar.clear();
        session.auth_token = None;
        session.state = SessionState::NoSession;
        session.restored_from = None;

        let login_url = self.config.site_url(&self.config.endpoints.login)?;
        let page = self
            .gateway
            .send(&mut session.jar, RequestDescriptor::get(login_url.clone()))
            .await?;

        let nonce = self.nonce_from(&page.text());
        if nonce.is_fallback() {
            self.events.session(SessionTransition::NonceFallback);
        }

        let credentials = &self.config.credentials;
        let request = RequestDescriptor::post(login_url.clone())
            .with_form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
                ("nonce", nonce.value()),
            ])
            .try_with_header(ORIGIN, &self.config.origin())?
            .try_with_header(REFERER, login_url.as_str())?;

        let response = self.gateway.send(&mut session.jar, request).await?;
        if !matches!(response.status, 200 | 302) {
            self.events.session(SessionTransition::LoginFailed {
                status: response.status,
            });
            return Err(SessionError::Authentication {
                status: response.status,
            });
        }

        session.state = SessionState::Authenticated;
        self.events.session(SessionTransition::LoggedIn {
            status: response.status,
            redirect: response.location().map(str::to_string),
        });
        self.persist(session);
        Ok(())
    }

    /// Scrapes the login nonce, falling back to the configured default.
    pub fn nonce_from(&self, login_page: &str) -> NonceSource {
        match self.extractor.input_value_by_name(login_page, "nonce") {
            Some(nonce) if !nonce.is_empty() => NonceSource::Scraped(nonce),
            _ => NonceSource::Fallback(self.config.fallback_nonce.clone()),
        }
    }

    /// Best-effort save. Failure is reported and the in-memory session stays usable.
    pub fn persist(&self, session: &Session) -> Option<SessionSnapshot> {
        match self
            .store
            .save(&session.jar, session.auth_token.as_deref())
        {
            Ok(snapshot) => {
                self.events.session(SessionTransition::Persisted);
                Some(snapshot)
            }
            Err(err) => {
                self.events.session(SessionTransition::PersistFailed {
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    /// Forgets the saved session on disk and in memory.
    pub fn logout(&self, session: &mut Session) -> bool {
        session.jar = CookieJar::new();
        session.auth_token = None;
        session.state = SessionState::NoSession;
        match self.store.clear() {
            Ok(removed) => removed,
            Err(err) => {
                self.events
                    .warn("logout", format!("could not remove session file: {err}"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::header::{COOKIE, HeaderMap, HeaderValue, SET_COOKIE};
    use http::Method;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use url::Url;

    use crate::events::{ClientEvent, EventHandler};
    use crate::extract::RegexExtractor;
    use crate::transport::{HttpTransport, RawResponse, TransportError};

    /// Replays canned responses keyed by `METHOD path`, recording every request.
    struct ScriptedTransport {
        routes: Mutex<Vec<(Method, String, RawResponse)>>,
        seen: Mutex<Vec<RequestDescriptor>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                routes: Mutex::new(Vec::new()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn route(self, method: Method, path: &str, status: u16, cookie: Option<&str>, body: &str) -> Self {
            let mut headers = HeaderMap::new();
            if let Some(cookie) = cookie {
                headers.append(SET_COOKIE, HeaderValue::from_str(cookie).unwrap());
            }
            self.respond(method, path, status, headers, body)
        }

        fn route_with_headers(self, method: Method, path: &str, status: u16, headers: HeaderMap) -> Self {
            self.respond(method, path, status, headers, "")
        }

        fn respond(self, method: Method, path: &str, status: u16, headers: HeaderMap, body: &str) -> Self {
            let response = RawResponse {
                status,
                headers,
                body: Bytes::from(body.to_string()),
                url: Url::parse("https://challenge.sunvoy.com").unwrap().join(path).unwrap(),
            };
            self.routes
                .lock()
                .unwrap()
                .push((method, path.to_string(), response));
            self
        }

        fn paths(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|r| format!("{} {}", r.method, r.path()))
                .collect()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(
            &self,
            request: &RequestDescriptor,
        ) -> Result<RawResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            let routes = self.routes.lock().unwrap();
            routes
                .iter()
                .find(|(method, path, _)| *method == request.method && path == request.path())
                .map(|(_, _, response)| response.clone())
                .ok_or_else(|| TransportError::Other(format!("no route for {}", request.url)))
        }
    }

    /// Collects every session transition in dispatch order.
    #[derive(Default)]
    struct Transitions(Mutex<Vec<SessionTransition>>);

    impl EventHandler for Transitions {
        fn handle(&self, event: &ClientEvent) {
            if let ClientEvent::Session(event) = event {
                self.0.lock().unwrap().push(event.transition.clone());
            }
        }
    }

    fn manager(transport: Arc<ScriptedTransport>, dir: &TempDir) -> SessionManager {
        manager_at(
            transport,
            dir.path().join("auth_credentials.json"),
            EventDispatcher::new(),
        )
    }

    fn manager_at(
        transport: Arc<ScriptedTransport>,
        session_path: std::path::PathBuf,
        events: EventDispatcher,
    ) -> SessionManager {
        let events = Arc::new(events);
        let config = ClientConfig {
            session_path,
            ..ClientConfig::default()
        };
        SessionManager::new(
            HttpGateway::new(transport, events.clone()),
            CredentialStore::new(&config.session_path),
            Arc::new(RegexExtractor::new()),
            Arc::new(config),
            events,
        )
    }

    const LOGIN_PAGE: &str = r#"<form><input type="hidden" name="nonce" value="n-123"></form>"#;

    #[tokio::test]
    async fn logs_in_without_saved_session() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(Method::GET, "/login", 200, None, LOGIN_PAGE)
                .route(Method::POST, "/login", 302, Some("JSESSIONID=fresh; Path=/"), ""),
        );
        let manager = manager(transport.clone(), &dir);

        let session = manager.ensure_session().await.unwrap();

        assert_eq!(session.state, SessionState::Authenticated);
        assert_eq!(session.jar.get("JSESSIONID"), Some("fresh"));
        assert_eq!(transport.paths(), vec!["GET /login", "POST /login"]);

        let saved = manager.store().load().unwrap();
        assert_eq!(saved.cookies.get("JSESSIONID"), Some("fresh"));

        let seen = transport.seen.lock().unwrap();
        let form = String::from_utf8(seen[1].body.clone().unwrap().to_vec()).unwrap();
        assert_eq!(form, "username=demo%40example.org&password=test&nonce=n-123");
        assert_eq!(seen[1].headers.get(ORIGIN).unwrap(), "https://challenge.sunvoy.com");
        assert_eq!(seen[1].headers.get(REFERER).unwrap(), "https://challenge.sunvoy.com/login");
    }

    #[tokio::test]
    async fn reuses_saved_session_when_probe_passes() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new().route(
            Method::GET,
            "/list",
            200,
            None,
            "<h1>Users</h1>",
        ));
        let manager = manager(transport.clone(), &dir);
        let mut jar = CookieJar::new();
        jar.set("JSESSIONID", "saved");
        manager.store().save(&jar, None).unwrap();

        let session = manager.ensure_session().await.unwrap();

        assert_eq!(session.state, SessionState::Authenticated);
        assert_eq!(transport.paths(), vec!["GET /list"]);
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].headers.get(COOKIE).unwrap(), "JSESSIONID=saved");
    }

    #[tokio::test]
    async fn probe_showing_login_form_triggers_login() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(Method::GET, "/list", 200, None, "<a href=\"/login\">Sign in</a>")
                .route(Method::GET, "/login", 200, None, LOGIN_PAGE)
                .route(Method::POST, "/login", 200, Some("JSESSIONID=fresh"), ""),
        );
        let manager = manager(transport.clone(), &dir);
        let mut jar = CookieJar::new();
        jar.set("JSESSIONID", "stale");
        jar.set("tracker", "x");
        manager.store().save(&jar, None).unwrap();

        let session = manager.ensure_session().await.unwrap();

        assert_eq!(transport.paths(), vec!["GET /list", "GET /login", "POST /login"]);
        assert_eq!(session.jar.get("JSESSIONID"), Some("fresh"));
        assert_eq!(session.jar.get("tracker"), None);
    }

    #[tokio::test]
    async fn missing_nonce_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(Method::GET, "/login", 200, None, "<form></form>")
                .route(Method::POST, "/login", 302, Some("JSESSIONID=fresh"), ""),
        );
        let manager = manager(transport.clone(), &dir);

        assert!(manager.nonce_from("<form></form>").is_fallback());
        manager.ensure_session().await.unwrap();

        let seen = transport.seen.lock().unwrap();
        let form = String::from_utf8(seen[1].body.clone().unwrap().to_vec()).unwrap();
        assert!(form.ends_with("nonce=sunvoy-default-nonce"));
    }

    #[tokio::test]
    async fn unwritable_session_file_keeps_login_usable() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("sessions");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), "x").unwrap();

        let transitions = Arc::new(Transitions::default());
        let mut events = EventDispatcher::new();
        events.register_handler(transitions.clone());

        let transport = Arc::new(
            ScriptedTransport::new()
                .route(Method::GET, "/login", 200, None, LOGIN_PAGE)
                .route(Method::POST, "/login", 302, Some("sid=1"), ""),
        );
        let manager = manager_at(transport, blocked.clone(), events);

        let mut session = Session::new();
        manager.login(&mut session).await.unwrap();

        assert_eq!(session.state, SessionState::Authenticated);
        assert_eq!(session.jar.get("sid"), Some("1"));
        assert!(blocked.is_dir());
        assert!(manager.persist(&session).is_none());

        let seen = transitions.0.lock().unwrap();
        assert!(seen.iter().any(|t| matches!(t, SessionTransition::PersistFailed { .. })));
        assert!(!seen.contains(&SessionTransition::Persisted));
    }

    #[tokio::test]
    async fn login_reports_redirect_target() {
        let dir = TempDir::new().unwrap();
        let transitions = Arc::new(Transitions::default());
        let mut events = EventDispatcher::new();
        events.register_handler(transitions.clone());

        let mut redirect = HeaderMap::new();
        redirect.insert(http::header::LOCATION, HeaderValue::from_static("/list"));
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(Method::GET, "/login", 200, None, LOGIN_PAGE)
                .route_with_headers(Method::POST, "/login", 302, redirect),
        );
        let manager = manager_at(transport, dir.path().join("auth_credentials.json"), events);

        manager.ensure_session().await.unwrap();

        let seen = transitions.0.lock().unwrap();
        assert!(seen.contains(&SessionTransition::LoggedIn {
            status: 302,
            redirect: Some("/list".to_string()),
        }));
        assert!(seen.contains(&SessionTransition::Persisted));
    }

    #[tokio::test]
    async fn rejected_login_is_terminal() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(Method::GET, "/login", 200, None, LOGIN_PAGE)
                .route(Method::POST, "/login", 401, None, "bad credentials"),
        );
        let manager = manager(transport.clone(), &dir);

        let err = manager.ensure_session().await.unwrap_err();

        assert!(matches!(err, SessionError::Authentication { status: 401 }));
        assert_eq!(transport.paths().len(), 2);
        assert!(manager.store().load().is_none());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let dir = TempDir::new().unwrap();
        let manager = manager(Arc::new(ScriptedTransport::new()), &dir);
        let err = manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[tokio::test]
    async fn logout_clears_memory_and_disk() {
        let dir = TempDir::new().unwrap();
        let manager = manager(Arc::new(ScriptedTransport::new()), &dir);
        let mut session = Session::new();
        session.jar.set("JSESSIONID", "x");
        manager.persist(&session).unwrap();

        assert!(manager.logout(&mut session));
        assert!(session.jar.is_empty());
        assert!(manager.store().load().is_none());
    }
}
