//! Reqwest-based implementation of the `HttpTransport` trait.
//!
//! Provides a thin adapter around `reqwest::Client` that converts between the
//! shared HTTP representations used by the gateway and the concrete transport.

use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, redirect::Policy};

use super::types::{HttpTransport, RawResponse, RequestDescriptor, TransportError};

/// Reqwest-backed transport with redirects and the built-in cookie store disabled.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Other(err.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing reqwest client. The client should already have
    /// redirects disabled; otherwise the login flow will never observe the
    /// 302 that carries the session cookie.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<RawResponse, TransportError> {
        let method = map_method(&request.method)?;
        let headers = convert_headers(&request.headers)?;

        let mut builder = self
            .client
            .request(method, request.url.as_str())
            .headers(headers);
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|err| map_error(err, request.url.as_str()))?;

        let status = response.status().as_u16();
        let headers = convert_back_headers(response.headers())?;
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| map_error(err, url.as_str()))?;

        Ok(RawResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

fn map_error(err: reqwest::Error, url: &str) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else if err.is_connect() {
        TransportError::Connect {
            url: url.to_string(),
            message: err.to_string(),
        }
    } else {
        TransportError::Other(err.to_string())
    }
}

fn map_method(method: &http::Method) -> Result<Method, TransportError> {
    Method::from_bytes(method.as_str().as_bytes())
        .map_err(|err| TransportError::Other(err.to_string()))
}

fn convert_headers(headers: &HeaderMap) -> Result<reqwest::header::HeaderMap, TransportError> {
    let mut map = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        let header_name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        let header_value = reqwest::header::HeaderValue::from_bytes(value.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

// `append` keeps every repeated header; a response may carry several Set-Cookie lines.
fn convert_back_headers(map: &reqwest::header::HeaderMap) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    for (name, value) in map.iter() {
        let header_name = HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        let header_value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        headers.append(header_name, header_value);
    }
    Ok(headers)
}
