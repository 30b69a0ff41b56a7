use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::signing::CheckcodeLayout;

pub const DEFAULT_BASE_URL: &str = "https://challenge.sunvoy.com";
pub const DEFAULT_API_BASE_URL: &str = "https://api.challenge.sunvoy.com";
pub const DEFAULT_SESSION_FILE: &str = "auth_credentials.json";
pub const DEFAULT_OUTPUT_FILE: &str = "users.json";
pub const DEFAULT_FALLBACK_NONCE: &str = "sunvoy-default-nonce";
pub const DEFAULT_MAX_USERS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = concat!("sunvoy-client/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid URL for {field}: {source}")]
    Url {
        field: &'static str,
        source: url::ParseError,
    },
    #[error("invalid number for {field}: {value}")]
    Number { field: &'static str, value: String },
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("demo@example.org", "test")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Paths on the site and API hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    /// Protected page used to check whether the saved cookies still work.
    pub probe: String,
    pub users: String,
    /// Protected page embedding the signing material.
    pub settings_page: String,
    /// Privileged endpoint on the API host.
    pub signed: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/login".into(),
            probe: "/list".into(),
            users: "/api/users".into(),
            settings_page: "/settings/tokens".into(),
            signed: "/api/settings".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: Url,
    /// Host serving the signed endpoint.
    pub api_base_url: Url,
    pub credentials: Credentials,
    pub session_path: PathBuf,
    pub output_path: PathBuf,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Sent when the login form carries no nonce.
    pub fallback_nonce: String,
    pub max_users: usize,
    pub checkcode_layout: CheckcodeLayout,
    pub endpoints: Endpoints,
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url"),
            api_base_url: Url::parse(DEFAULT_API_BASE_URL).expect("default api url"),
            credentials: Credentials::default(),
            session_path: PathBuf::from(DEFAULT_SESSION_FILE),
            output_path: PathBuf::from(DEFAULT_OUTPUT_FILE),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fallback_nonce: DEFAULT_FALLBACK_NONCE.to_string(),
            max_users: DEFAULT_MAX_USERS,
            checkcode_layout: CheckcodeLayout::default(),
            endpoints: Endpoints::default(),
            debug: false,
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Applies `SUNVOY_*` and `DEBUG` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(username) = var("SUNVOY_USERNAME") {
            self.credentials.username = username;
        }
        if let Some(password) = var("SUNVOY_PASSWORD") {
            self.credentials.password = password;
        }
        if let Some(raw) = var("SUNVOY_BASE_URL") {
            self.base_url = Url::parse(raw.trim()).map_err(|source| ConfigError::Url {
                field: "SUNVOY_BASE_URL",
                source,
            })?;
        }
        if let Some(raw) = var("SUNVOY_API_URL") {
            self.api_base_url = Url::parse(raw.trim()).map_err(|source| ConfigError::Url {
                field: "SUNVOY_API_URL",
                source,
            })?;
        }
        if let Some(path) = var("SUNVOY_SESSION_FILE") {
            self.session_path = PathBuf::from(path);
        }
        if let Some(path) = var("SUNVOY_OUTPUT_FILE") {
            self.output_path = PathBuf::from(path);
        }
        if let Some(raw) = var("SUNVOY_TIMEOUT_SECS") {
            self.request_timeout_secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::Number {
                    field: "SUNVOY_TIMEOUT_SECS",
                    value: raw.clone(),
                })?;
        }
        if let Some(raw) = var("DEBUG") {
            self.debug = raw.trim() == "true";
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Resolves a path against the site host.
    pub fn site_url(&self, path: &str) -> Result<Url, ConfigError> {
        self.base_url.join(path).map_err(|source| ConfigError::Url {
            field: "base_url",
            source,
        })
    }

    /// Resolves a path against the API host.
    pub fn api_url(&self, path: &str) -> Result<Url, ConfigError> {
        self.api_base_url.join(path).map_err(|source| ConfigError::Url {
            field: "api_base_url",
            source,
        })
    }

    /// `scheme://host[:port]` of the site, used for Origin headers.
    pub fn origin(&self) -> String {
        let url = &self.base_url;
        let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or(""));
        if let Some(port) = url.port() {
            origin.push(':');
            origin.push_str(&port.to_string());
        }
        origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_challenge_site() {
        let config = ClientConfig::default();
        assert_eq!(config.site_url("/login").unwrap().as_str(), "https://challenge.sunvoy.com/login");
        assert_eq!(
            config.api_url("/api/settings").unwrap().host_str(),
            Some("api.challenge.sunvoy.com")
        );
        assert_eq!(config.max_users, 10);
        assert_eq!(config.session_path, PathBuf::from("auth_credentials.json"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ClientConfig::from_json_str(
            r#"{"credentials": {"username": "a@b.c", "password": "pw"}, "endpoints": {"probe": "/home"}}"#,
        )
        .unwrap();
        assert_eq!(config.credentials.username, "a@b.c");
        assert_eq!(config.endpoints.probe, "/home");
        assert_eq!(config.endpoints.login, "/login");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_apply() {
        let config = ClientConfig::default()
            .apply_env_from(env(&[
                ("SUNVOY_USERNAME", "ops@example.org"),
                ("SUNVOY_BASE_URL", "http://127.0.0.1:8080"),
                ("SUNVOY_SESSION_FILE", "/tmp/s.json"),
                ("SUNVOY_TIMEOUT_SECS", "5"),
                ("DEBUG", "true"),
            ]))
            .unwrap();

        assert_eq!(config.credentials.username, "ops@example.org");
        assert_eq!(config.credentials.password, "test");
        assert_eq!(config.origin(), "http://127.0.0.1:8080");
        assert_eq!(config.session_path, PathBuf::from("/tmp/s.json"));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(config.debug);
    }

    #[test]
    fn env_rejects_bad_values() {
        let err = ClientConfig::default()
            .apply_env_from(env(&[("SUNVOY_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Number { .. }));

        let err = ClientConfig::default()
            .apply_env_from(env(&[("SUNVOY_API_URL", "not a url")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Url { .. }));
    }

    #[test]
    fn debug_output_hides_password() {
        let rendered = format!("{:?}", Credentials::new("u", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
