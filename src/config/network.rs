use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env, require_positive};
use crate::error::ConfigError;
use crate::session::http::DEFAULT_USER_AGENT;
use crate::settings::Settings;

/// HTTP client and realtime reply settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub user_agent: String,
    pub http_timeout: Duration,
    /// How long a submitted task waits for its correlated reply.
    pub task_timeout: Duration,
}

impl NetworkConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let user_agent = optional_env("FCA_USER_AGENT")?
            .or_else(|| settings.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let http_timeout_secs = require_positive(
            "FCA_HTTP_TIMEOUT_SECS",
            parse_optional_env("FCA_HTTP_TIMEOUT_SECS", settings.http_timeout_secs)?,
        )?;
        let task_timeout_ms = require_positive(
            "FCA_TASK_TIMEOUT_MS",
            parse_optional_env("FCA_TASK_TIMEOUT_MS", settings.task_timeout_ms)?,
        )?;

        Ok(Self {
            user_agent,
            http_timeout: Duration::from_secs(http_timeout_secs),
            task_timeout: Duration::from_millis(task_timeout_ms),
        })
    }
}
