//! Session snapshot persistence.
//!
//! Recovery writes the current cookie header and app-state after every
//! successful login and reads them back when a seed is missing or dead.
//! At most one snapshot exists per `(identity, kind)`; a write replaces it.

#[cfg(feature = "libsql")]
pub mod libsql;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

#[cfg(feature = "libsql")]
pub use self::libsql::LibSqlBackupSink;

/// What a snapshot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// A `name=value; ...` cookie header.
    Cookie,
    /// A JSON array of structured cookies.
    AppState,
}

impl SnapshotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cookie => "cookie",
            Self::AppState => "appstate",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cookie" => Ok(Self::Cookie),
            "appstate" => Ok(Self::AppState),
            other => Err(format!("unknown snapshot kind '{other}', expected cookie or appstate")),
        }
    }
}

/// One stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub identity: String,
    pub kind: SnapshotKind,
    pub data: String,
    pub updated_at: DateTime<Utc>,
}

/// Storage for session snapshots.
#[async_trait]
pub trait BackupSink: Send + Sync {
    /// Store `data`, replacing any snapshot for `(identity, kind)`.
    async fn put(&self, identity: &str, kind: SnapshotKind, data: &str)
    -> Result<(), DatabaseError>;

    async fn get(
        &self,
        identity: &str,
        kind: SnapshotKind,
    ) -> Result<Option<SessionSnapshot>, DatabaseError>;

    /// Most recently written snapshot of `kind` across all identities.
    async fn get_latest_any(
        &self,
        kind: SnapshotKind,
    ) -> Result<Option<SessionSnapshot>, DatabaseError>;
}

/// In-process sink; snapshots live as long as the value.
#[derive(Debug, Default)]
pub struct MemoryBackupSink {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    snapshots: HashMap<(String, SnapshotKind), (SessionSnapshot, u64)>,
    writes: u64,
}

impl MemoryBackupSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BackupSink for MemoryBackupSink {
    async fn put(
        &self,
        identity: &str,
        kind: SnapshotKind,
        data: &str,
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock();
        inner.writes += 1;
        let seq = inner.writes;
        inner.snapshots.insert(
            (identity.to_string(), kind),
            (
                SessionSnapshot {
                    identity: identity.to_string(),
                    kind,
                    data: data.to_string(),
                    updated_at: Utc::now(),
                },
                seq,
            ),
        );
        Ok(())
    }

    async fn get(
        &self,
        identity: &str,
        kind: SnapshotKind,
    ) -> Result<Option<SessionSnapshot>, DatabaseError> {
        Ok(self
            .inner
            .lock()
            .snapshots
            .get(&(identity.to_string(), kind))
            .map(|(snapshot, _)| snapshot.clone()))
    }

    async fn get_latest_any(
        &self,
        kind: SnapshotKind,
    ) -> Result<Option<SessionSnapshot>, DatabaseError> {
        Ok(self
            .inner
            .lock()
            .snapshots
            .values()
            .filter(|(snapshot, _)| snapshot.kind == kind)
            .max_by_key(|(_, seq)| *seq)
            .map(|(snapshot, _)| snapshot.clone()))
    }
}
