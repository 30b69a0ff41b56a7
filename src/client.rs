//! High level client orchestration.
//!
//! Wires the session manager, gateway, and signer together: make sure the
//! session is valid, fetch the user list, fetch the signed current-user
//! record, merge them, and write the result.

use std::path::PathBuf;
use std::sync::Arc;

use http::header::ORIGIN;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::{ClientConfig, ConfigError, Credentials};
use crate::events::{EventDispatcher, EventHandler, LoggingHandler};
use crate::extract::{FieldExtractor, RegexExtractor};
use crate::session::{CredentialStore, Session, SessionError, SessionManager};
use crate::signing::{CheckcodeLayout, RequestSigner, SigningError};
use crate::transport::{
    HttpGateway, HttpTransport, ReqwestTransport, RequestDescriptor, TransportError,
};

/// Result alias used across the orchestration layer.
pub type ClientResult<T> = Result<T, ClientError>;

/// High-level error surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),
    #[error("user list fetch failed: {0}")]
    DataFetch(String),
    #[error("failed to write output file: {0}")]
    Output(#[from] std::io::Error),
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub users: usize,
    pub current_user: bool,
    pub output_path: PathBuf,
    pub session_persisted: bool,
    /// True when the saved session was accepted without logging in.
    pub session_reused: bool,
}

/// Fluent builder for [`SunvoyClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    extractor: Option<Arc<dyn FieldExtractor>>,
    handlers: Vec<Arc<dyn EventHandler>>,
    enable_logging: bool,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
            extractor: None,
            handlers: Vec::new(),
            enable_logging: true,
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    pub fn with_base_url(mut self, url: url::Url) -> Self {
        self.config.base_url = url;
        self
    }

    pub fn with_api_base_url(mut self, url: url::Url) -> Self {
        self.config.api_base_url = url;
        self
    }

    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.session_path = path.into();
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    pub fn with_checkcode_layout(mut self, layout: CheckcodeLayout) -> Self {
        self.config.checkcode_layout = layout;
        self
    }

    pub fn with_max_users(mut self, max: usize) -> Self {
        self.config.max_users = max;
        self
    }

    /// Replace the reqwest transport, e.g. with a stub in tests.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FieldExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn disable_logging(mut self) -> Self {
        self.enable_logging = false;
        self
    }

    pub fn build(self) -> ClientResult<SunvoyClient> {
        let config = Arc::new(self.config);

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(
                &config.user_agent,
                config.request_timeout(),
            )?),
        };
        let extractor: Arc<dyn FieldExtractor> = self
            .extractor
            .unwrap_or_else(|| Arc::new(RegexExtractor::new()));

        let mut events = EventDispatcher::new();
        if self.enable_logging {
            events.register_handler(Arc::new(LoggingHandler));
        }
        for handler in self.handlers {
            events.register_handler(handler);
        }
        let events = Arc::new(events);

        let gateway = HttpGateway::new(transport, events.clone());
        let sessions = SessionManager::new(
            gateway.clone(),
            CredentialStore::new(&config.session_path),
            extractor.clone(),
            config.clone(),
            events.clone(),
        );
        let signer = RequestSigner::new(extractor, config.checkcode_layout.clone());

        Ok(SunvoyClient {
            config,
            gateway,
            sessions,
            signer,
            events,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Main client orchestrator.
pub struct SunvoyClient {
    config: Arc<ClientConfig>,
    gateway: HttpGateway,
    sessions: SessionManager,
    signer: RequestSigner,
    events: Arc<EventDispatcher>,
}

impl SunvoyClient {
    /// Construct a client with default configuration.
    pub fn new() -> ClientResult<Self> {
        ClientBuilder::new().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    /// One full run: session, user list, signed current user, merge, write, save.
    pub async fn run(&self) -> ClientResult<RunReport> {
        let mut session = self.sessions.ensure_session().await?;
        let session_reused = session.restored_from.is_some();

        let users = self.fetch_users(&mut session).await?;
        let user_count = users.len();
        let current = self.fetch_current_user(&mut session).await;
        let current_user = current.is_some();

        let merged = merge_current_user(users, current);
        let output_path = self.write_output(&merged).await?;
        let session_persisted = self.sessions.persist(&session).is_some();

        log::info!(
            "wrote {} users{} to {}",
            user_count,
            if current_user { " and the current user" } else { "" },
            output_path.display()
        );

        Ok(RunReport {
            users: user_count,
            current_user,
            output_path,
            session_persisted,
            session_reused,
        })
    }

    /// POSTs `{}` to the user list endpoint and keeps at most `max_users`
    /// records. A single object is wrapped into a one-element list.
    pub async fn fetch_users(&self, session: &mut Session) -> ClientResult<Vec<Value>> {
        let url = self.config.site_url(&self.config.endpoints.users)?;
        let request = RequestDescriptor::post(url).with_json(&json!({}));
        let response = self.gateway.send(&mut session.jar, request).await?;

        if !response.is_ok() {
            return Err(ClientError::DataFetch(format!(
                "unexpected status {}",
                response.status
            )));
        }

        match response.json {
            Some(Value::Array(mut users)) => {
                users.truncate(self.config.max_users);
                Ok(users)
            }
            Some(object @ Value::Object(_)) => Ok(vec![object]),
            Some(other) => Err(ClientError::DataFetch(format!(
                "expected a JSON array or object, got {}",
                json_kind(&other)
            ))),
            None => Err(ClientError::DataFetch("response body is not JSON".into())),
        }
    }

    /// Fetches the signed current-user record. Any failure is reported and
    /// yields `None`; the run carries on without it.
    pub async fn fetch_current_user(&self, session: &mut Session) -> Option<Value> {
        match self.try_fetch_current_user(session).await {
            Ok(value) => value,
            Err(err) => {
                self.events.warn("current user", err.to_string());
                None
            }
        }
    }

    async fn try_fetch_current_user(&self, session: &mut Session) -> ClientResult<Option<Value>> {
        let page_url = self.config.site_url(&self.config.endpoints.settings_page)?;
        let page = self
            .gateway
            .send(&mut session.jar, RequestDescriptor::get(page_url))
            .await?;

        let material = self.signer.extract_signing_material(&page.text());
        let missing = material.missing();
        if !missing.is_empty() {
            log::debug!("settings page lacks signing fields: {}", missing.join(", "));
        }
        if let Some(ref token) = material.access_token {
            session.auth_token = Some(token.clone());
        }

        let payload = self.signer.build_signed_request(&material)?;
        let url = self.config.api_url(&self.config.endpoints.signed)?;
        let request = RequestDescriptor::post(url)
            .with_json(&serde_json::to_value(&payload)?)
            .try_with_header(ORIGIN, &self.config.origin())?;
        let response = self.gateway.send(&mut session.jar, request).await?;

        if !response.is_ok() {
            self.events.warn(
                "current user",
                format!("signed endpoint returned status {}", response.status),
            );
            return Ok(None);
        }

        Ok(response.json.filter(|value| !value.is_null()))
    }

    /// Writes the merged records as pretty JSON to the configured output path.
    pub async fn write_output(&self, records: &[Value]) -> ClientResult<PathBuf> {
        let path = self.config.output_path.clone();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }

    /// Deletes the saved session so the next run logs in from scratch.
    pub fn forget_session(&self) -> bool {
        let mut session = Session::new();
        self.sessions.logout(&mut session)
    }
}

/// Appends the current user as a single `{"currentUser": ...}` record.
pub fn merge_current_user(mut users: Vec<Value>, current: Option<Value>) -> Vec<Value> {
    if let Some(current) = current {
        users.push(json!({ "currentUser": current }));
    }
    users
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
