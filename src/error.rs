//! Error types for fca-session.

use std::time::Duration;

use crate::session::recovery::RecoveryStage;

/// Top-level error type for the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backup store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[cfg(feature = "libsql")]
    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),
}

/// Transport-level HTTP errors from the cookie-bound client.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Too many redirects starting at {url}")]
    TooManyRedirects { url: String },

    #[error("Unexpected HTTP {status} from {url}")]
    Status { url: String, status: u16 },
}

/// Cookie jar errors. Callers importing in bulk treat these as noise.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("Cookie {name} domain {domain} does not match host {host}")]
    DomainMismatch {
        name: String,
        domain: String,
        host: String,
    },

    #[error("Malformed cookie: {0}")]
    Malformed(String),

    #[error("Invalid cookie URL: {0}")]
    InvalidUrl(String),
}

/// External login provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("Login provider rejected credentials: {0}")]
    Rejected(String),

    #[error("Login provider returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Login provider request failed: {0}")]
    RequestFailed(String),
}

/// Terminal failures of the authentication recovery state machine.
///
/// Every variant names the recovery stage that failed last so the login
/// entry point can report where recovery gave up.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Configuration error during {stage}: {reason}")]
    Configuration { stage: RecoveryStage, reason: String },

    #[error("Authentication rejected during {stage}: {reason}")]
    Authentication { stage: RecoveryStage, reason: String },

    #[error("Checkpoint still present after bypass during {stage}")]
    Checkpoint { stage: RecoveryStage },

    #[error("Could not establish a session (last stage: {stage}): {reason}")]
    Establishment { stage: RecoveryStage, reason: String },
}

impl SessionError {
    /// Stage that produced the error.
    pub fn stage(&self) -> RecoveryStage {
        match self {
            Self::Configuration { stage, .. }
            | Self::Authentication { stage, .. }
            | Self::Checkpoint { stage }
            | Self::Establishment { stage, .. } => *stage,
        }
    }
}

/// Realtime transport errors, as reported by the publish side.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Task dispatcher errors, always delivered to the caller that submitted the task.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Realtime channel unavailable: {reason}")]
    Connectivity { reason: String },

    #[error("Request {request_id} timed out after {timeout:?}")]
    Timeout { request_id: u64, timeout: Duration },

    #[error("Malformed envelope: {0}")]
    Protocol(String),

    #[error("Failed to publish request {request_id}: {reason}")]
    Publish { request_id: u64, reason: String },

    #[error("Request {request_id} rejected by server: {reason}")]
    Rejected { request_id: u64, reason: String },
}

/// Capability registry and invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Capability {name} already registered")]
    Duplicate { name: String },

    #[error("Capability {name} not found")]
    NotFound { name: String },

    #[error("Invalid parameters for capability {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Capability {name} failed: {source}")]
    Dispatch {
        name: String,
        #[source]
        source: DispatchError,
    },
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, Error>;
