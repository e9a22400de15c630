//! User settings persistence.
//!
//! Stores user preferences in ~/.fca/config.json (or config.toml).
//! Settings are loaded with env var > config file > default priority.
//! Keys are camelCase on disk, matching existing fca config files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Directory holding the settings file, `.env` and the backup database.
pub fn fca_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fca")
}

/// User settings persisted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Fall back to a credential login when no stored session works.
    pub auto_login: bool,

    /// Base URL of the credential login service.
    pub api_server: Option<String>,

    /// Sent as `x-api-key` to the login service.
    pub api_key: Option<String>,

    pub credentials: CredentialSettings,

    /// Legacy top-level credential keys; `credentials.*` wins when both exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twofactor: Option<String>,

    pub retry: RetrySettings,

    /// How long a dispatched task waits for its reply.
    pub task_timeout_ms: u64,

    pub http_timeout_secs: u64,

    pub user_agent: Option<String>,

    pub backup: BackupSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_login: true,
            api_server: None,
            api_key: None,
            credentials: CredentialSettings::default(),
            email: None,
            password: None,
            twofactor: None,
            retry: RetrySettings::default(),
            task_timeout_ms: 20_000,
            http_timeout_secs: 60,
            user_agent: None,
            backup: BackupSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CredentialSettings {
    pub email: Option<String>,
    pub password: Option<String>,
    /// Base32 TOTP secret. Spaces and case are normalised at login time.
    #[serde(alias = "twoFactor")]
    pub twofactor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackupSettings {
    pub enabled: bool,
    /// Path to the local libSQL database file.
    pub libsql_path: Option<String>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            libsql_path: None,
        }
    }
}

impl Settings {
    /// Email from `credentials.email`, falling back to the legacy key.
    pub fn email(&self) -> Option<&str> {
        self.credentials
            .email
            .as_deref()
            .or(self.email.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn password(&self) -> Option<&str> {
        self.credentials
            .password
            .as_deref()
            .or(self.password.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn twofactor(&self) -> Option<&str> {
        self.credentials
            .twofactor
            .as_deref()
            .or(self.twofactor.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// Get the default settings file path (~/.fca/config.json).
    pub fn default_path() -> PathBuf {
        fca_dir().join("config.json")
    }

    /// Default TOML config file path (~/.fca/config.toml).
    pub fn default_toml_path() -> PathBuf {
        fca_dir().join("config.toml")
    }

    /// Load settings from disk, returning default if not found.
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    /// Load JSON settings from a specific path. A missing or unreadable
    /// file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed settings in {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        let settings: Self = toml::from_str(&data)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))?;
        Ok(Some(settings))
    }

    /// Merge values from `other` into `self`, preferring `other` for
    /// fields that differ from the default.
    ///
    /// Only fields the overlay explicitly changed are applied, so a TOML
    /// file can override a subset of the JSON settings.
    pub fn merge_from(&mut self, other: &Self) {
        let default_json = match serde_json::to_value(Self::default()) {
            Ok(v) => v,
            Err(_) => return,
        };
        let other_json = match serde_json::to_value(other) {
            Ok(v) => v,
            Err(_) => return,
        };
        let mut self_json = match serde_json::to_value(&*self) {
            Ok(v) => v,
            Err(_) => return,
        };

        merge_non_default(&mut self_json, &other_json, &default_json);

        if let Ok(merged) = serde_json::from_value(self_json) {
            *self = merged;
        }
    }
}

fn merge_non_default(
    target: &mut serde_json::Value,
    overlay: &serde_json::Value,
    defaults: &serde_json::Value,
) {
    let (Some(target), Some(overlay)) = (target.as_object_mut(), overlay.as_object()) else {
        return;
    };
    for (key, value) in overlay {
        let default = defaults.get(key).unwrap_or(&serde_json::Value::Null);
        if value.is_object() && default.is_object() {
            if let Some(slot) = target.get_mut(key) {
                merge_non_default(slot, value, default);
            } else {
                target.insert(key.clone(), value.clone());
            }
        } else if value != default {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_existing_camel_case_config() {
        let raw = r#"{
            "autoLogin": false,
            "apiServer": "https://login.example",
            "apiKey": "k-123",
            "credentials": {"email": "a@b.c", "password": "pw", "twofactor": "abcd efgh"}
        }"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert!(!settings.auto_login);
        assert_eq!(settings.api_server.as_deref(), Some("https://login.example"));
        assert_eq!(settings.email(), Some("a@b.c"));
        assert_eq!(settings.twofactor(), Some("abcd efgh"));
        assert_eq!(settings.retry, RetrySettings::default());
        assert_eq!(settings.task_timeout_ms, 20_000);
    }

    #[test]
    fn legacy_flat_credentials_are_a_fallback() {
        let raw = r#"{"email": "flat@x.y", "password": "p", "credentials": {"email": "nested@x.y"}}"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.email(), Some("nested@x.y"));
        assert_eq!(settings.password(), Some("p"));
    }

    #[test]
    fn missing_and_malformed_files_yield_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load_from(&dir.path().join("nope.json")), Settings::default());

        let bad = dir.path().join("config.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert_eq!(Settings::load_from(&bad), Settings::default());
        assert_eq!(Settings::load_toml(&dir.path().join("nope.toml")).unwrap(), None);
    }

    #[test]
    fn toml_overlay_only_applies_changed_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "taskTimeoutMs = 5000\n\n[retry]\nmaxAttempts = 5\n").unwrap();

        let mut settings = Settings {
            api_server: Some("https://login.example".into()),
            ..Settings::default()
        };
        settings.retry.base_delay_ms = 250;
        let overlay = Settings::load_toml(&path).unwrap().unwrap();
        settings.merge_from(&overlay);

        assert_eq!(settings.task_timeout_ms, 5000);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.base_delay_ms, 250);
        assert_eq!(settings.api_server.as_deref(), Some("https://login.example"));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "autoLogin = [").unwrap();
        assert!(Settings::load_toml(&path).is_err());
    }
}
