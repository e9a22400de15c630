//! Configuration for fca-session.
//!
//! Settings are loaded with priority: env var > config file > default.
//! Env vars may also come from `~/.fca/.env` (loaded via dotenvy early
//! in startup).

mod backup;
pub(crate) mod helpers;
mod login;
mod network;

use std::path::Path;

use crate::error::ConfigError;
use crate::settings::Settings;

pub use self::backup::{BackupConfig, default_libsql_path};
pub use self::login::LoginConfig;
pub use self::network::NetworkConfig;

/// Main configuration for a session client.
#[derive(Debug, Clone)]
pub struct Config {
    pub login: LoginConfig,
    pub network: NetworkConfig,
    pub backup: BackupConfig,
}

impl Config {
    /// Load configuration from environment variables and the settings file.
    ///
    /// Loads both `./.env` and `~/.fca/.env` via dotenvy, which never
    /// overwrites existing vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional TOML config file overlay.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_fca_env();
        let mut settings = Settings::load();

        // TOML values win over JSON settings
        Self::apply_toml_overlay(&mut settings, toml_path)?;

        Self::resolve(&settings)
    }

    /// Load and merge a TOML config file into settings.
    ///
    /// If `explicit_path` is `Some`, loads from that path (errors are fatal).
    /// If `None`, tries the default path `~/.fca/config.toml` (missing
    /// file is silently ignored).
    fn apply_toml_overlay(
        settings: &mut Settings,
        explicit_path: Option<&Path>,
    ) -> Result<(), ConfigError> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(toml_settings)) => {
                settings.merge_from(&toml_settings);
                tracing::debug!("Loaded TOML config from {}", path.display());
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
            }
        }
        Ok(())
    }

    /// Layer env vars over `settings`.
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            login: LoginConfig::resolve(settings)?,
            network: NetworkConfig::resolve(settings)?,
            backup: BackupConfig::resolve(settings)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use secrecy::ExposeSecret;

    use super::*;
    use crate::error::ConfigError;
    use crate::settings::Settings;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "FCA_AUTO_LOGIN",
        "FCA_EMAIL",
        "FCA_PASSWORD",
        "FCA_TWOFACTOR",
        "FCA_API_SERVER",
        "FCA_API_KEY",
        "FCA_RETRY_MAX_ATTEMPTS",
        "FCA_RETRY_BASE_DELAY_MS",
        "FCA_TASK_TIMEOUT_MS",
        "FCA_HTTP_TIMEOUT_SECS",
        "FCA_USER_AGENT",
        "FCA_LIBSQL_PATH",
        "FCA_BACKUP_ENABLED",
    ];

    fn clear_fca_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            for var in VARS {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn resolves_safe_defaults() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_fca_env();

        let config = Config::resolve(&Settings::default()).expect("resolve");
        assert!(config.login.auto_login);
        assert!(config.login.credentials.is_none());
        assert_eq!(config.login.api_server, "https://minhdong.site");
        assert_eq!(config.login.max_attempts, 3);
        assert_eq!(config.login.base_delay, Duration::from_millis(1000));
        assert_eq!(config.network.task_timeout, Duration::from_secs(20));
        assert_eq!(config.network.http_timeout, Duration::from_secs(60));
        assert!(config.backup.enabled);
        assert!(config.backup.libsql_path.ends_with(".fca/backups.db"));
    }

    #[test]
    fn env_overrides_settings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_fca_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("FCA_AUTO_LOGIN", "false");
            std::env::set_var("FCA_PASSWORD", "from-env");
            std::env::set_var("FCA_RETRY_MAX_ATTEMPTS", "5");
            std::env::set_var("FCA_LIBSQL_PATH", "/tmp/fca-backups.db");
        }

        let mut settings = Settings::default();
        settings.credentials.email = Some("me@example.com".into());
        settings.credentials.password = Some("from-file".into());
        settings.retry.max_attempts = 9;

        let config = Config::resolve(&settings).expect("resolve");
        assert!(!config.login.auto_login);
        let credentials = config.login.credentials.clone().expect("credentials");
        assert_eq!(credentials.email, "me@example.com");
        assert_eq!(credentials.password.expose_secret(), "from-env");
        assert_eq!(config.login.max_attempts, 5);
        assert_eq!(config.backup.libsql_path, PathBuf::from("/tmp/fca-backups.db"));

        let options = config.login.recovery_options();
        assert!(!options.auto_login);
        assert_eq!(options.max_attempts, 5);

        clear_fca_env();
    }

    #[test]
    fn rejects_invalid_values() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_fca_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("FCA_TASK_TIMEOUT_MS", "0");
        }
        match Config::resolve(&Settings::default()).unwrap_err() {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "FCA_TASK_TIMEOUT_MS"),
            other => panic!("unexpected error: {other}"),
        }

        clear_fca_env();
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("FCA_AUTO_LOGIN", "maybe");
        }
        match Config::resolve(&Settings::default()).unwrap_err() {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "FCA_AUTO_LOGIN"),
            other => panic!("unexpected error: {other}"),
        }

        clear_fca_env();
    }

    #[test]
    fn half_configured_credentials_are_reported() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_fca_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("FCA_EMAIL", "lonely@example.com");
        }
        match Config::resolve(&Settings::default()).unwrap_err() {
            ConfigError::MissingRequired { key, .. } => assert_eq!(key, "FCA_PASSWORD"),
            other => panic!("unexpected error: {other}"),
        }

        clear_fca_env();
    }

    #[test]
    fn explicit_toml_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            Config::apply_toml_overlay(&mut settings, Some(&missing)),
            Err(ConfigError::ParseError(_))
        ));
    }
}
