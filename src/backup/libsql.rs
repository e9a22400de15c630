//! libSQL-backed snapshot store.
//!
//! One row per `(user_id, kind)` in `app_state_backups`; writes upsert.
//! Every write takes the next `write_seq`, which orders "most recent"
//! independently of clock resolution.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase};

use crate::backup::{BackupSink, SessionSnapshot, SnapshotKind};
use crate::error::DatabaseError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS app_state_backups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    write_seq INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, kind)
);
"#;

const WRITE_SEQ_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_app_state_backups_write_seq
    ON app_state_backups(kind, write_seq);
"#;

pub struct LibSqlBackupSink {
    db: Arc<LibSqlDatabase>,
}

impl LibSqlBackupSink {
    /// Open (or create) a local database file and ensure the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {}", e))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {}", e)))?;

        let sink = Self { db: Arc::new(db) };
        sink.run_migrations().await?;
        Ok(sink)
    }

    /// Sets `PRAGMA busy_timeout = 5000` so a concurrent backup write waits
    /// instead of failing with "database is locked".
    pub async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {}", e)))?;
        conn.query("PRAGMA busy_timeout = 5000", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy_timeout: {}", e)))?;
        Ok(conn)
    }

    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute_batch(SCHEMA)
            .await
            .map_err(|e| DatabaseError::Query(format!("backup schema failed: {}", e)))?;

        // Files created before writes were sequenced lack the column.
        let mut rows = conn
            .query(
                "SELECT 1 FROM pragma_table_info('app_state_backups') WHERE name = 'write_seq'",
                (),
            )
            .await?;
        if rows.next().await?.is_none() {
            tracing::info!("Adding write_seq to app_state_backups");
            conn.execute(
                "ALTER TABLE app_state_backups ADD COLUMN write_seq INTEGER NOT NULL DEFAULT 0",
                (),
            )
            .await?;
        }

        conn.execute_batch(WRITE_SEQ_INDEX)
            .await
            .map_err(|e| DatabaseError::Query(format!("backup index failed: {}", e)))?;
        Ok(())
    }

    async fn fetch_one(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Option<SessionSnapshot>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn.query(sql, params).await?;
        match rows.next().await {
            Ok(Some(row)) => row_to_snapshot(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(e.to_string())),
        }
    }
}

#[async_trait]
impl BackupSink for LibSqlBackupSink {
    async fn put(
        &self,
        identity: &str,
        kind: SnapshotKind,
        data: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        let now = fmt_ts(&Utc::now());
        conn.execute(
            r#"
            INSERT INTO app_state_backups (user_id, kind, data, created_at, updated_at, write_seq)
            VALUES (?1, ?2, ?3, ?4, ?4,
                (SELECT COALESCE(MAX(write_seq), 0) + 1 FROM app_state_backups))
            ON CONFLICT (user_id, kind) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                write_seq = excluded.write_seq
            "#,
            libsql::params![identity, kind.as_str(), data, now],
        )
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        identity: &str,
        kind: SnapshotKind,
    ) -> Result<Option<SessionSnapshot>, DatabaseError> {
        self.fetch_one(
            r#"
            SELECT user_id, kind, data, updated_at
            FROM app_state_backups
            WHERE user_id = ?1 AND kind = ?2
            "#,
            libsql::params![identity, kind.as_str()],
        )
        .await
    }

    async fn get_latest_any(
        &self,
        kind: SnapshotKind,
    ) -> Result<Option<SessionSnapshot>, DatabaseError> {
        self.fetch_one(
            r#"
            SELECT user_id, kind, data, updated_at
            FROM app_state_backups
            WHERE kind = ?1
            ORDER BY write_seq DESC, id DESC
            LIMIT 1
            "#,
            libsql::params![kind.as_str()],
        )
        .await
    }
}

fn row_to_snapshot(row: &libsql::Row) -> Result<SessionSnapshot, DatabaseError> {
    let identity: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let kind: String = row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let data: String = row.get(2).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let updated_at: String = row.get(3).map_err(|e| DatabaseError::Query(e.to_string()))?;

    Ok(SessionSnapshot {
        identity,
        kind: kind.parse().map_err(DatabaseError::Serialization)?,
        data,
        updated_at: parse_timestamp(&updated_at).map_err(DatabaseError::Serialization)?,
    })
}

/// RFC 3339 with millisecond precision.
fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }
    Err(format!("unparseable timestamp: {:?}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sink() -> (tempfile::TempDir, LibSqlBackupSink) {
        let dir = tempfile::tempdir().unwrap();
        let sink = LibSqlBackupSink::new_local(&dir.path().join("backups.db"))
            .await
            .unwrap();
        (dir, sink)
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_identity_and_kind() {
        let (_dir, sink) = sink().await;
        sink.put("1001", SnapshotKind::Cookie, "c_user=1001; xs=a").await.unwrap();
        sink.put("1001", SnapshotKind::Cookie, "c_user=1001; xs=a").await.unwrap();

        let conn = sink.connect().await.unwrap();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM app_state_backups WHERE user_id = ?1",
                libsql::params!["1001"],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn get_returns_latest_write() {
        let (_dir, sink) = sink().await;
        sink.put("1001", SnapshotKind::AppState, "[1]").await.unwrap();
        sink.put("1001", SnapshotKind::AppState, "[2]").await.unwrap();
        let snapshot = sink.get("1001", SnapshotKind::AppState).await.unwrap().unwrap();
        assert_eq!(snapshot.data, "[2]");
        assert_eq!(snapshot.kind, SnapshotKind::AppState);
        assert!(sink.get("1001", SnapshotKind::Cookie).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_any_orders_by_update_time() {
        let (_dir, sink) = sink().await;
        sink.put("1", SnapshotKind::Cookie, "a").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        sink.put("2", SnapshotKind::Cookie, "b").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        sink.put("1", SnapshotKind::Cookie, "a2").await.unwrap();

        let latest = sink.get_latest_any(SnapshotKind::Cookie).await.unwrap().unwrap();
        assert_eq!(latest.identity, "1");
        assert_eq!(latest.data, "a2");
        assert!(sink.get_latest_any(SnapshotKind::AppState).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_any_follows_write_order_within_one_millisecond() {
        let (_dir, sink) = sink().await;
        sink.put("1", SnapshotKind::Cookie, "a").await.unwrap();
        sink.put("2", SnapshotKind::Cookie, "b").await.unwrap();
        sink.put("1", SnapshotKind::Cookie, "a2").await.unwrap();

        let latest = sink.get_latest_any(SnapshotKind::Cookie).await.unwrap().unwrap();
        assert_eq!(latest.identity, "1");
        assert_eq!(latest.data, "a2");

        sink.put("2", SnapshotKind::Cookie, "b2").await.unwrap();
        let latest = sink.get_latest_any(SnapshotKind::Cookie).await.unwrap().unwrap();
        assert_eq!(latest.identity, "2");
    }

    #[tokio::test]
    async fn older_files_gain_the_write_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let db = libsql::Builder::new_local(&path).build().await.unwrap();
            let conn = db.connect().unwrap();
            conn.execute_batch(
                "CREATE TABLE app_state_backups (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    data TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (user_id, kind)
                );
                INSERT INTO app_state_backups (user_id, kind, data, created_at, updated_at)
                VALUES ('9', 'cookie', 'c_user=9', '2024-01-01T00:00:00.000Z', '2024-01-01T00:00:00.000Z');",
            )
            .await
            .unwrap();
        }

        let sink = LibSqlBackupSink::new_local(&path).await.unwrap();
        sink.put("10", SnapshotKind::Cookie, "c_user=10").await.unwrap();
        let latest = sink.get_latest_any(SnapshotKind::Cookie).await.unwrap().unwrap();
        assert_eq!(latest.identity, "10");
        assert_eq!(sink.get("9", SnapshotKind::Cookie).await.unwrap().unwrap().data, "c_user=9");
    }

    #[tokio::test]
    async fn busy_timeout_set_on_connect() {
        let (_dir, sink) = sink().await;
        let conn = sink.connect().await.unwrap();
        let mut rows = conn.query("PRAGMA busy_timeout", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let timeout: i64 = row.get(0).unwrap();
        assert_eq!(timeout, 5000);
    }
}
