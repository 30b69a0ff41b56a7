//! Checkcode signing for the privileged settings endpoint.
//!
//! The settings page embeds hidden inputs carrying the caller's identity.
//! The signed call echoes them back with a timestamp and a checkcode:
//! `upper(hex(sha1(access_token + user_id + timestamp)))`. The server rejects
//! any other concatenation, so the order is a [`CheckcodeLayout`] value that
//! can be pinned from configuration.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::extract::FieldExtractor;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("signing field '{0}' was not found on the settings page")]
    MissingField(&'static str),
}

/// Hidden inputs scraped from the settings page. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningMaterial {
    pub access_token: Option<String>,
    pub api_user: Option<String>,
    pub language: Option<String>,
    pub open_id: Option<String>,
    pub operate_id: Option<String>,
    pub user_id: Option<String>,
}

impl SigningMaterial {
    pub fn get(&self, field: SigningField) -> Option<&str> {
        match field {
            SigningField::AccessToken => self.access_token.as_deref(),
            SigningField::ApiUser => self.api_user.as_deref(),
            SigningField::Language => self.language.as_deref(),
            SigningField::OpenId => self.open_id.as_deref(),
            SigningField::OperateId => self.operate_id.as_deref(),
            SigningField::UserId => self.user_id.as_deref(),
        }
    }

    fn set(&mut self, field: SigningField, value: Option<String>) {
        let slot = match field {
            SigningField::AccessToken => &mut self.access_token,
            SigningField::ApiUser => &mut self.api_user,
            SigningField::Language => &mut self.language,
            SigningField::OpenId => &mut self.open_id,
            SigningField::OperateId => &mut self.operate_id,
            SigningField::UserId => &mut self.user_id,
        };
        *slot = value;
    }

    pub fn require(&self, field: SigningField) -> Result<&str, SigningError> {
        self.get(field)
            .ok_or(SigningError::MissingField(field.element_id()))
    }

    pub fn missing(&self) -> Vec<&'static str> {
        SigningField::ALL
            .iter()
            .filter(|field| self.get(**field).is_none())
            .map(|field| field.element_id())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningField {
    AccessToken,
    ApiUser,
    Language,
    OpenId,
    OperateId,
    UserId,
}

impl SigningField {
    pub const ALL: [SigningField; 6] = [
        SigningField::AccessToken,
        SigningField::ApiUser,
        SigningField::Language,
        SigningField::OpenId,
        SigningField::OperateId,
        SigningField::UserId,
    ];

    /// `id` attribute of the hidden input, which is also the wire name.
    pub fn element_id(self) -> &'static str {
        match self {
            SigningField::AccessToken => "access_token",
            SigningField::ApiUser => "apiuser",
            SigningField::Language => "language",
            SigningField::OpenId => "openId",
            SigningField::OperateId => "operateId",
            SigningField::UserId => "userId",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckcodeInput {
    Field(SigningField),
    Timestamp,
}

/// Ordered inputs concatenated into the checkcode digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckcodeLayout(pub Vec<CheckcodeInput>);

impl Default for CheckcodeLayout {
    fn default() -> Self {
        Self(vec![
            CheckcodeInput::Field(SigningField::AccessToken),
            CheckcodeInput::Field(SigningField::UserId),
            CheckcodeInput::Timestamp,
        ])
    }
}

impl CheckcodeLayout {
    pub fn compute(&self, material: &SigningMaterial, timestamp: i64) -> Result<String, SigningError> {
        let mut hasher = Sha1::new();
        for input in &self.0 {
            match input {
                CheckcodeInput::Field(field) => hasher.update(material.require(*field)?.as_bytes()),
                CheckcodeInput::Timestamp => hasher.update(timestamp.to_string().as_bytes()),
            }
        }
        Ok(hex::encode_upper(hasher.finalize()))
    }
}

/// `upper(hex(sha1(access_token + user_id + timestamp)))`, 40 characters.
pub fn compute_checkcode(access_token: &str, user_id: &str, timestamp: i64) -> String {
    let mut hasher = Sha1::new();
    hasher.update(access_token.as_bytes());
    hasher.update(user_id.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    hex::encode_upper(hasher.finalize())
}

/// JSON body of the signed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub access_token: String,
    pub apiuser: String,
    pub language: String,
    #[serde(rename = "openId")]
    pub open_id: String,
    #[serde(rename = "operateId")]
    pub operate_id: String,
    pub timestamp: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub checkcode: String,
}

#[derive(Clone)]
pub struct RequestSigner {
    extractor: Arc<dyn FieldExtractor>,
    layout: CheckcodeLayout,
}

impl RequestSigner {
    pub fn new(extractor: Arc<dyn FieldExtractor>, layout: CheckcodeLayout) -> Self {
        Self { extractor, layout }
    }

    pub fn layout(&self) -> &CheckcodeLayout {
        &self.layout
    }

    /// Looks up every signing field by element id; absent ones stay `None`.
    pub fn extract_signing_material(&self, page_body: &str) -> SigningMaterial {
        let mut material = SigningMaterial::default();
        for field in SigningField::ALL {
            let value = self
                .extractor
                .input_value_by_id(page_body, field.element_id());
            material.set(field, value);
        }
        material
    }

    /// Signs with the current Unix time in seconds.
    pub fn build_signed_request(
        &self,
        material: &SigningMaterial,
    ) -> Result<SignedPayload, SigningError> {
        self.build_signed_request_at(material, Utc::now().timestamp())
    }

    pub fn build_signed_request_at(
        &self,
        material: &SigningMaterial,
        timestamp: i64,
    ) -> Result<SignedPayload, SigningError> {
        let checkcode = self.layout.compute(material, timestamp)?;
        Ok(SignedPayload {
            access_token: material.require(SigningField::AccessToken)?.to_string(),
            apiuser: material.require(SigningField::ApiUser)?.to_string(),
            language: material.require(SigningField::Language)?.to_string(),
            open_id: material.require(SigningField::OpenId)?.to_string(),
            operate_id: material.require(SigningField::OperateId)?.to_string(),
            timestamp: timestamp.to_string(),
            user_id: material.require(SigningField::UserId)?.to_string(),
            checkcode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RegexExtractor;

    const SETTINGS_PAGE: &str = r#"
        <input type="hidden" id="userId" value="user-1">
        <input type="hidden" id="openId" value="open-9">
        <input type="hidden" id="access_token" value="tok-abc">
        <input type="hidden" id="apiuser" value="demo@example.org">
        <input type="hidden" id="language" value="en_US">
        <input type="hidden" id="operateId" value="op-7">
    "#;

    fn signer() -> RequestSigner {
        RequestSigner::new(Arc::new(RegexExtractor::new()), CheckcodeLayout::default())
    }

    #[test]
    fn checkcode_matches_known_digest() {
        assert_eq!(
            compute_checkcode("tok-abc", "user-1", 1_700_000_000),
            "4954B5AB5C270A552A25902E498CB604B932B442"
        );
    }

    #[test]
    fn checkcode_is_forty_uppercase_hex_chars() {
        for (token, user, ts) in [("", "", 0), ("a", "b", -1), ("tök", "ü", i64::MAX)] {
            let code = compute_checkcode(token, user, ts);
            assert_eq!(code.len(), 40);
            assert!(code.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }
    }

    #[test]
    fn checkcode_changes_with_each_input() {
        let base = compute_checkcode("tok", "user", 1_700_000_000);
        assert_eq!(base, compute_checkcode("tok", "user", 1_700_000_000));
        assert_ne!(base, compute_checkcode("tok", "user", 1_700_000_001));
        assert_ne!(base, compute_checkcode("tok2", "user", 1_700_000_000));
        assert_ne!(base, compute_checkcode("tok", "user2", 1_700_000_000));
    }

    #[test]
    fn extracts_every_field() {
        let material = signer().extract_signing_material(SETTINGS_PAGE);
        assert_eq!(material.access_token.as_deref(), Some("tok-abc"));
        assert_eq!(material.api_user.as_deref(), Some("demo@example.org"));
        assert_eq!(material.operate_id.as_deref(), Some("op-7"));
        assert!(material.missing().is_empty());
    }

    #[test]
    fn missing_fields_are_none_until_signing() {
        let material = signer().extract_signing_material(r#"<input id="userId" value="u">"#);
        assert_eq!(material.user_id.as_deref(), Some("u"));
        assert!(material.access_token.is_none());
        assert_eq!(material.missing().len(), 5);

        let err = signer().build_signed_request(&material).unwrap_err();
        assert_eq!(err, SigningError::MissingField("access_token"));
    }

    #[test]
    fn signed_payload_uses_wire_names() {
        let material = signer().extract_signing_material(SETTINGS_PAGE);
        let payload = signer()
            .build_signed_request_at(&material, 1_700_000_000)
            .unwrap();

        assert_eq!(payload.checkcode, "4954B5AB5C270A552A25902E498CB604B932B442");
        let json = serde_json::to_value(&payload).unwrap();
        for key in [
            "access_token",
            "apiuser",
            "language",
            "openId",
            "operateId",
            "timestamp",
            "userId",
            "checkcode",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["timestamp"], "1700000000");
    }

    #[test]
    fn layout_can_be_reordered_from_config() {
        let layout: CheckcodeLayout =
            serde_json::from_str(r#"[{"field": "user_id"}, {"field": "open_id"}, "timestamp"]"#)
                .unwrap();
        let material = signer().extract_signing_material(SETTINGS_PAGE);

        let code = layout.compute(&material, 42).unwrap();
        let mut hasher = Sha1::new();
        hasher.update(b"user-1open-942");
        assert_eq!(code, hex::encode_upper(hasher.finalize()));
        assert_ne!(code, CheckcodeLayout::default().compute(&material, 42).unwrap());
    }
}
