//! Persisted session snapshot.
//!
//! File layout: `{"cookies": {name: value}, "authToken": string|null, "timestamp": epoch-ms}`.
//! A missing or unreadable file means "no prior session", never an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CookieJar;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("session file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable unit of session state. `timestamp` records when the snapshot was
/// written; nothing expires on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub cookies: CookieJar,
    #[serde(default)]
    pub auth_token: Option<String>,
    pub timestamp: i64,
}

impl SessionSnapshot {
    pub fn capture(cookies: &CookieJar, auth_token: Option<&str>) -> Self {
        Self {
            cookies: cookies.clone(),
            auth_token: auth_token.map(str::to_string),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot, returning `None` when the file is missing,
    /// unreadable, or malformed.
    pub fn load(&self) -> Option<SessionSnapshot> {
        match self.try_load() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!(
                    "ignoring session file {}: {err}",
                    self.path.display()
                );
                None
            }
        }
    }

    fn try_load(&self) -> Result<Option<SessionSnapshot>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Overwrites the file with the jar, token, and a fresh timestamp.
    /// Writes to a sibling temp file first so a crash never leaves half a snapshot.
    pub fn save(
        &self,
        cookies: &CookieJar,
        auth_token: Option<&str>,
    ) -> Result<SessionSnapshot, StoreError> {
        let snapshot = SessionSnapshot::capture(cookies, auth_token);
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(snapshot)
    }

    /// Removes the persisted snapshot. Returns `true` when a file was deleted.
    pub fn clear(&self) -> Result<bool, StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
