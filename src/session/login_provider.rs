//! External credential login.
//!
//! The provider exchanges email/password (and an optional TOTP secret) for a
//! fresh cookie set. [`ApiLoginProvider`] talks to the hosted iOS login API;
//! recovery only sees the [`LoginProvider`] trait.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::error::LoginError;
use crate::session::cookies::normalize_cookie_header;
use crate::session::identity::{IdentitySource, SessionIdentity};

pub const DEFAULT_API_SERVER: &str = "https://minhdong.site";
pub const LOGIN_PATH: &str = "/api/v1/facebook/login_ios";
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials handed to a provider.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: SecretString,
    /// Base32 TOTP secret, not a six-digit code.
    pub two_factor: Option<SecretString>,
    /// Overrides the provider's configured server.
    pub base_url: Option<String>,
}

/// What a successful login hands back.
#[derive(Debug, Clone, Default)]
pub struct LoginGrant {
    pub identity: Option<SessionIdentity>,
    pub access_token: Option<SecretString>,
    /// `name=value` pairs ready for import.
    pub cookie_pairs: Vec<String>,
}

#[async_trait]
pub trait LoginProvider: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginGrant, LoginError>;
}

/// Provider backed by the hosted login API.
#[derive(Debug, Clone)]
pub struct ApiLoginProvider {
    client: Client,
    api_server: String,
    api_key: Option<SecretString>,
}

impl ApiLoginProvider {
    pub fn new(api_server: impl Into<String>, api_key: Option<SecretString>) -> Result<Self, LoginError> {
        let client = Client::builder()
            .timeout(LOGIN_TIMEOUT)
            .build()
            .map_err(|e| LoginError::RequestFailed(format!("client init failed: {e}")))?;
        Ok(Self {
            client,
            api_server: api_server.into(),
            api_key,
        })
    }
}

#[async_trait]
impl LoginProvider for ApiLoginProvider {
    async fn login(&self, request: &LoginRequest) -> Result<LoginGrant, LoginError> {
        let base = request
            .base_url
            .as_deref()
            .unwrap_or(&self.api_server)
            .trim_end_matches('/');
        let endpoint = format!("{base}{LOGIN_PATH}");

        let mut body = serde_json::json!({
            "email": request.email,
            "password": request.password.expose_secret(),
        });
        if let Some(secret) = request
            .two_factor
            .as_ref()
            .map(|s| clean_two_factor(s.expose_secret()))
            .filter(|s| !s.is_empty())
        {
            body["twoFactor"] = Value::String(secret);
        }

        let mut builder = self
            .client
            .post(&endpoint)
            .header("Accept", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key.expose_secret());
        }

        tracing::info!("API-LOGIN: attempting login for {}", mask(&request.email, 2));
        let response = builder
            .send()
            .await
            .map_err(|e| LoginError::RequestFailed(redact_sensitive_detail(&e.to_string())))?;
        let status = response.status().as_u16();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        let grant = parse_login_response(status, &payload)?;
        tracing::info!(
            "API-LOGIN: login successful for UID {}",
            grant
                .identity
                .as_ref()
                .map(|i| i.as_str())
                .unwrap_or("unknown")
        );
        Ok(grant)
    }
}

/// Interpret a login API reply.
pub fn parse_login_response(status: u16, payload: &Value) -> Result<LoginGrant, LoginError> {
    if let Some(error) = payload.get("error").filter(|v| !v.is_null()) {
        return Err(LoginError::Rejected(value_text(error)));
    }
    if status != 200 || payload.is_null() {
        let message = payload
            .get("message")
            .map(value_text)
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(LoginError::Rejected(message));
    }

    let uid = first_field(payload, &["uid", "user_id", "userId"]).map(value_text);
    let access_token = first_field(payload, &["access_token", "accessToken"]).map(value_text);
    let cookies = first_field(payload, &["cookie", "cookies"]);

    if uid.is_none() && access_token.is_none() && cookies.is_none() {
        return Err(LoginError::InvalidResponse(
            "response missing uid, access_token and cookie".to_string(),
        ));
    }

    Ok(LoginGrant {
        identity: uid
            .as_deref()
            .and_then(|raw| SessionIdentity::parse(raw, IdentitySource::FromLoginProvider)),
        access_token: access_token.map(SecretString::from),
        cookie_pairs: cookies.map(cookie_pairs_from).unwrap_or_default(),
    })
}

fn first_field<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| payload.get(*name))
        .find(|v| !v.is_null())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cookies arrive as a header string, or an array of `name=value` strings
/// or `{key|name, value}` objects.
fn cookie_pairs_from(value: &Value) -> Vec<String> {
    match value {
        Value::String(header) => normalize_cookie_header(header),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(pair) => Some(pair.clone()),
                Value::Object(obj) => {
                    let name = obj
                        .get("key")
                        .or_else(|| obj.get("name"))
                        .and_then(Value::as_str)?;
                    let value = obj.get("value").map(value_text)?;
                    Some(format!("{name}={value}"))
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Strip whitespace and upper-case a Base32 TOTP secret.
pub fn clean_two_factor(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Keep the first `keep` characters, star out the rest.
pub fn mask(value: &str, keep: usize) -> String {
    let len = value.chars().count();
    if len <= keep {
        return "*".repeat(len);
    }
    let head: String = value.chars().take(keep).collect();
    format!("{head}{}", "*".repeat(len - keep))
}

/// Scrub bearer tokens and `key=value` secrets from free-form error text.
pub fn redact_sensitive_detail(raw: &str) -> String {
    let mut value = raw.to_string();
    let patterns = [
        (r"(?i)\b(bearer)\s+[a-z0-9._\-~+/]+=*", "$1 [REDACTED]"),
        (
            r"(?i)\b(token|api[_\-]?key|secret|password|fb_dtsg|xs)\b(\s*[:=]\s*)([^,;\s]+)",
            "$1$2[REDACTED]",
        ),
    ];

    for (pattern, replacement) in patterns {
        if let Ok(re) = Regex::new(pattern) {
            value = re.replace_all(&value, replacement).to_string();
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_string_cookie_and_uid_aliases() {
        let grant = parse_login_response(
            200,
            &json!({"user_id": "100042", "accessToken": "EAA", "cookie": "c_user=100042; xs=\"9:abc\""}),
        )
        .unwrap();
        assert_eq!(grant.identity.unwrap().as_str(), "100042");
        assert_eq!(grant.access_token.unwrap().expose_secret(), "EAA");
        assert_eq!(grant.cookie_pairs, vec!["c_user=100042", "xs=9:abc"]);
    }

    #[test]
    fn parses_cookie_arrays() {
        let grant = parse_login_response(
            200,
            &json!({
                "uid": 7,
                "cookies": [{"key": "c_user", "value": "7"}, {"name": "xs", "value": "t"}, "fr=1", 5]
            }),
        )
        .unwrap();
        assert_eq!(grant.identity.unwrap().as_str(), "7");
        assert_eq!(grant.cookie_pairs, vec!["c_user=7", "xs=t", "fr=1"]);
    }

    #[test]
    fn error_field_is_a_rejection() {
        let err = parse_login_response(200, &json!({"error": "Wrong password"})).unwrap_err();
        assert!(matches!(err, LoginError::Rejected(ref m) if m == "Wrong password"));

        let err = parse_login_response(401, &json!({"message": "unauthorized"})).unwrap_err();
        assert!(matches!(err, LoginError::Rejected(ref m) if m == "unauthorized"));

        let err = parse_login_response(502, &Value::Null).unwrap_err();
        assert!(matches!(err, LoginError::Rejected(ref m) if m == "HTTP 502"));
    }

    #[test]
    fn empty_success_is_invalid() {
        let err = parse_login_response(200, &json!({"ok": true})).unwrap_err();
        assert!(matches!(err, LoginError::InvalidResponse(_)));
    }

    #[test]
    fn invalid_uid_is_dropped_not_fatal() {
        let grant = parse_login_response(200, &json!({"uid": "0", "cookie": "c_user=5"})).unwrap();
        assert!(grant.identity.is_none());
        assert_eq!(grant.cookie_pairs, vec!["c_user=5"]);
    }

    #[test]
    fn two_factor_secret_is_cleaned() {
        assert_eq!(clean_two_factor(" abcd efgh\tij "), "ABCDEFGHIJ");
    }

    #[test]
    fn masking_and_redaction() {
        assert_eq!(mask("someone@x", 2), "so*******");
        assert_eq!(mask("ab", 3), "**");
        assert_eq!(mask("", 2), "");

        let redacted = redact_sensitive_detail("password=hunter2, Bearer abc.def token: xyz");
        assert!(!redacted.contains("hunter2"));
        assert!(!redacted.contains("abc.def"));
        assert!(!redacted.contains("xyz"));
    }
}
