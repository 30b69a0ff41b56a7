//! Flat name/value cookie store.
//!
//! No domain, path, or expiry tracking: the client talks to one site and the
//! server decides when a session is stale.

use std::collections::BTreeMap;

use http::header::{COOKIE, HeaderMap, HeaderValue, SET_COOKIE};
use serde::{Deserialize, Serialize};

use crate::transport::TransportError;

/// Cookie name to value, case-sensitive keys, last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cookies.keys().map(String::as_str)
    }

    /// Renders `name=value; name2=value2`, or `None` when the jar is empty.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let rendered = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        Some(rendered)
    }

    /// Writes the `Cookie` header into `headers`. An empty jar leaves any
    /// caller-supplied header untouched.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), TransportError> {
        if let Some(rendered) = self.header_value() {
            let value = HeaderValue::from_str(&rendered)
                .map_err(|_| TransportError::InvalidHeader(COOKIE.to_string()))?;
            headers.insert(COOKIE, value);
        }
        Ok(())
    }

    /// Upserts the leading `name=value` pair of every `Set-Cookie` line, in
    /// header order. Lines without `=` or with an empty name are skipped.
    /// Returns how many pairs were stored.
    pub fn absorb(&mut self, headers: &HeaderMap) -> usize {
        let mut stored = 0;
        for line in headers.get_all(SET_COOKIE) {
            let Ok(line) = line.to_str() else {
                continue;
            };
            if let Some((name, value)) = parse_set_cookie(line) {
                self.cookies.insert(name.to_string(), value.to_string());
                stored += 1;
            }
        }
        stored
    }
}

impl FromIterator<(String, String)> for CookieJar {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            cookies: iter.into_iter().collect(),
        }
    }
}

fn parse_set_cookie(line: &str) -> Option<(&str, &str)> {
    let pair = line.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}
