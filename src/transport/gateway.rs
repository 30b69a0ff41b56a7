//! Single request/response primitive used by every call the client makes.
//!
//! Sending a request:
//! 1. Render the cookie jar into the `Cookie` header.
//! 2. Fill in `Content-Length` from the body's byte length when unset.
//! 3. Hand the descriptor to the transport and buffer the full body.
//! 4. Absorb `Set-Cookie` lines, whatever the status.
//! 5. Decode the body as JSON when it looks like JSON; failures leave `json` empty.

use std::sync::Arc;
use std::time::Instant;

use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;

use crate::events::{ClientEvent, EventDispatcher, RequestEvent, ResponseEvent};
use crate::session::CookieJar;

use super::types::{GatewayResponse, HttpTransport, RequestDescriptor, TransportError};

#[derive(Clone)]
pub struct HttpGateway {
    transport: Arc<dyn HttpTransport>,
    events: Arc<EventDispatcher>,
}

impl HttpGateway {
    pub fn new(transport: Arc<dyn HttpTransport>, events: Arc<EventDispatcher>) -> Self {
        Self { transport, events }
    }

    /// Sends `descriptor` with the jar's cookies and folds response cookies
    /// back into the jar. Connection-level failures propagate; there is no retry.
    pub async fn send(
        &self,
        jar: &mut CookieJar,
        mut descriptor: RequestDescriptor,
    ) -> Result<GatewayResponse, TransportError> {
        jar.apply(&mut descriptor.headers)?;

        if let Some(ref body) = descriptor.body
            && !descriptor.headers.contains_key(CONTENT_LENGTH)
        {
            descriptor
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        self.events.dispatch(ClientEvent::Request(RequestEvent {
            method: descriptor.method.clone(),
            url: descriptor.url.clone(),
            body_len: descriptor.body.as_ref().map(|b| b.len()).unwrap_or(0),
            timestamp: chrono::Utc::now(),
        }));

        let started = Instant::now();
        let raw = self.transport.execute(&descriptor).await?;
        let latency = started.elapsed();

        let absorbed = jar.absorb(&raw.headers);
        let json = sniff_json(&raw.headers, &raw.body);

        self.events.dispatch(ClientEvent::Response(ResponseEvent {
            method: descriptor.method,
            url: raw.url.clone(),
            status: raw.status,
            latency,
            cookies_absorbed: absorbed,
            timestamp: chrono::Utc::now(),
        }));

        Ok(GatewayResponse {
            status: raw.status,
            headers: raw.headers,
            body: raw.body,
            url: raw.url,
            json,
        })
    }
}

fn sniff_json(headers: &HeaderMap, body: &[u8]) -> Option<Value> {
    let declared = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            let value = value.to_ascii_lowercase();
            value.contains("application/json") || value.contains("+json")
        })
        .unwrap_or(false);

    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim_start();
    let looks_like_json = trimmed.starts_with('{') || trimmed.starts_with('[');

    if !declared && !looks_like_json {
        return None;
    }

    match serde_json::from_str(trimmed) {
        Ok(value) => Some(value),
        Err(err) => {
            log::debug!("response body is not valid JSON: {err}");
            None
        }
    }
}
