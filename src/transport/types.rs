//! Core data structures shared across the gateway and its transports.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use http::Method;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Contract that abstracts the socket/TLS layer underneath the gateway.
///
/// Implementations must not follow redirects or keep their own cookie state:
/// the gateway observes every raw response and owns the cookie jar.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor) -> Result<RawResponse, TransportError>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("failed to convert header '{0}'")]
    InvalidHeader(String),
    #[error("http transport error: {0}")]
    Other(String),
}

/// Mutable request under construction. The gateway injects `Cookie` and
/// `Content-Length` into it right before transmission.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a header from a runtime string, failing on bytes a header cannot carry.
    pub fn try_with_header(self, name: HeaderName, value: &str) -> Result<Self, TransportError> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        Ok(self.with_header(name, value))
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON body with the matching content type.
    pub fn with_json(self, value: &Value) -> Self {
        self.with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(value.to_string())
    }

    /// `application/x-www-form-urlencoded` body built from ordered pairs.
    pub fn with_form(self, fields: &[(&str, &str)]) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        self.with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        )
        .with_body(encoded)
    }
}

/// Response exactly as the transport received it, body fully buffered.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
}

/// Response handed back to callers after cookie absorption and JSON sniffing.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
    pub json: Option<Value>,
}

impl GatewayResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
    }
}
