use std::path::PathBuf;

use crate::config::helpers::{optional_env, parse_bool_env};
use crate::error::ConfigError;
use crate::settings::{Settings, fca_dir};

/// Where session snapshots are persisted.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub enabled: bool,
    pub libsql_path: PathBuf,
}

/// Default backup database (~/.fca/backups.db).
pub fn default_libsql_path() -> PathBuf {
    fca_dir().join("backups.db")
}

impl BackupConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: parse_bool_env("FCA_BACKUP_ENABLED", settings.backup.enabled)?,
            libsql_path: optional_env("FCA_LIBSQL_PATH")?
                .or_else(|| settings.backup.libsql_path.clone())
                .map(PathBuf::from)
                .unwrap_or_else(default_libsql_path),
        })
    }
}
