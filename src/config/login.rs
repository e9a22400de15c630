use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_bool_env, parse_optional_env, require_positive};
use crate::error::ConfigError;
use crate::session::login_provider::DEFAULT_API_SERVER;
use crate::session::{Credentials, RecoveryOptions};
use crate::settings::Settings;

/// How recovery falls back to a credential login.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub auto_login: bool,
    pub credentials: Option<Credentials>,
    pub api_server: String,
    pub api_key: Option<SecretString>,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl LoginConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let auto_login = parse_bool_env("FCA_AUTO_LOGIN", settings.auto_login)?;

        let email = optional_env("FCA_EMAIL")?.or_else(|| settings.email().map(str::to_string));
        let password =
            optional_env("FCA_PASSWORD")?.or_else(|| settings.password().map(str::to_string));
        let two_factor =
            optional_env("FCA_TWOFACTOR")?.or_else(|| settings.twofactor().map(str::to_string));

        let credentials = match (email, password) {
            (Some(email), Some(password)) => Some(Credentials {
                email,
                password: SecretString::from(password),
                two_factor: two_factor.map(SecretString::from),
            }),
            (Some(_), None) => {
                return Err(ConfigError::MissingRequired {
                    key: "FCA_PASSWORD".to_string(),
                    hint: "An email is configured without a password.".to_string(),
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingRequired {
                    key: "FCA_EMAIL".to_string(),
                    hint: "A password is configured without an email.".to_string(),
                });
            }
            (None, None) => None,
        };

        let api_server = optional_env("FCA_API_SERVER")?
            .or_else(|| settings.api_server.clone())
            .unwrap_or_else(|| DEFAULT_API_SERVER.to_string());
        url::Url::parse(&api_server).map_err(|e| ConfigError::InvalidValue {
            key: "FCA_API_SERVER".to_string(),
            message: format!("must be an absolute URL: {e}"),
        })?;

        let api_key = optional_env("FCA_API_KEY")?
            .or_else(|| settings.api_key.clone())
            .map(SecretString::from);

        let max_attempts =
            parse_optional_env("FCA_RETRY_MAX_ATTEMPTS", settings.retry.max_attempts)?;
        require_positive("FCA_RETRY_MAX_ATTEMPTS", u64::from(max_attempts))?;
        let base_delay_ms =
            parse_optional_env("FCA_RETRY_BASE_DELAY_MS", settings.retry.base_delay_ms)?;

        Ok(Self {
            auto_login,
            credentials,
            api_server,
            api_key,
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms),
        })
    }

    pub fn recovery_options(&self) -> RecoveryOptions {
        RecoveryOptions {
            auto_login: self.auto_login,
            credentials: self.credentials.clone(),
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
        }
    }
}
