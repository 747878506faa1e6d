//! SQLite-backed handoff store.
//!
//! Handoff documents are stored as JSON next to the columns used for
//! filtering and ordering. The compare-and-swap is a single
//! `UPDATE ... WHERE id = ? AND version = ?`; zero affected rows means the
//! caller lost a race (or the id is unknown).
//!
//! # Tables
//!
//! - `handoffs`: one row per handoff, never deleted
//! - `token_index`: token digest → handoff id, never deleted
//! - `notification_log`: append-only delivery attempts
//! - `handoff_sequences`: per-type code counters

use super::{HandoffFilter, HandoffStore};
use crate::model::{Handoff, HandoffType};
use crate::notification::NotificationLogEntry;
use crate::token::TokenDigest;
use custody_core::{CustodyError, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

fn db(err: rusqlite::Error) -> CustodyError {
    CustodyError::Storage(format!("database error: {}", err))
}

pub struct SqliteHandoffStore {
    conn: Mutex<Connection>,
}

impl SqliteHandoffStore {
    /// Create or open a store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening handoff store");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CustodyError::Storage(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(db)?;

        conn.pragma_update(None, "journal_mode", "WAL").map_err(db)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(db)?;

        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS handoffs (
                id TEXT PRIMARY KEY,
                handoff_code TEXT NOT NULL UNIQUE,
                handoff_type TEXT NOT NULL,
                status TEXT NOT NULL,
                session_id TEXT,
                created_at INTEGER NOT NULL,
                version INTEGER NOT NULL,
                document TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_handoffs_status ON handoffs(status);
            CREATE INDEX IF NOT EXISTS idx_handoffs_session ON handoffs(session_id);
            CREATE INDEX IF NOT EXISTS idx_handoffs_created ON handoffs(created_at);

            CREATE TABLE IF NOT EXISTS token_index (
                digest TEXT PRIMARY KEY,
                handoff_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notification_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                handoff_id TEXT NOT NULL,
                document TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notification_handoff ON notification_log(handoff_id);

            CREATE TABLE IF NOT EXISTS handoff_sequences (
                handoff_type TEXT PRIMARY KEY,
                last_value INTEGER NOT NULL
            );
            "#,
        )
        .map_err(db)?;

        debug!("Handoff store schema initialized");
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CustodyError::Storage("connection lock poisoned".to_string()))
    }

    fn decode(document: String) -> Result<Handoff> {
        Ok(serde_json::from_str(&document)?)
    }

    fn query_documents(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Handoff>> {
        let mut stmt = conn.prepare(sql).map_err(db)?;
        let rows = stmt
            .query_map(args, |row| row.get::<_, String>(0))
            .map_err(db)?;
        let mut handoffs = Vec::new();
        for row in rows {
            handoffs.push(Self::decode(row.map_err(db)?)?);
        }
        Ok(handoffs)
    }
}

impl HandoffStore for SqliteHandoffStore {
    fn next_sequence(&self, handoff_type: HandoffType) -> Result<u64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO handoff_sequences (handoff_type, last_value) VALUES (?1, 1)
             ON CONFLICT(handoff_type) DO UPDATE SET last_value = last_value + 1",
            params![handoff_type.as_str()],
        )
        .map_err(db)?;
        let value: i64 = conn
            .query_row(
                "SELECT last_value FROM handoff_sequences WHERE handoff_type = ?1",
                params![handoff_type.as_str()],
                |row| row.get(0),
            )
            .map_err(db)?;
        Ok(value as u64)
    }

    fn insert(&self, handoff: Handoff) -> Result<Handoff> {
        let document = serde_json::to_string(&handoff)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db)?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM handoffs WHERE id = ?1",
                params![handoff.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;
        if exists.is_some() {
            return Err(CustodyError::Validation(format!(
                "handoff {} already exists",
                handoff.id
            )));
        }

        tx.execute(
            "INSERT INTO handoffs (id, handoff_code, handoff_type, status, session_id, created_at, version, document)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                handoff.id,
                handoff.handoff_id,
                handoff.handoff_type.as_str(),
                handoff.status.as_str(),
                handoff.session_id,
                handoff.created_at as i64,
                handoff.version as i64,
                document,
            ],
        )
        .map_err(db)?;

        if let Some(token) = &handoff.confirmation_token {
            tx.execute(
                "INSERT INTO token_index (digest, handoff_id) VALUES (?1, ?2)",
                params![token.digest().to_hex(), handoff.id],
            )
            .map_err(db)?;
        }
        tx.commit().map_err(db)?;

        debug!(handoff_id = %handoff.handoff_id, "Handoff persisted");
        Ok(handoff)
    }

    fn get(&self, id: &str) -> Result<Handoff> {
        let conn = self.conn()?;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM handoffs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;
        match document {
            Some(document) => Self::decode(document),
            None => Err(CustodyError::not_found(id)),
        }
    }

    fn list(&self, filter: &HandoffFilter) -> Result<Vec<Handoff>> {
        let status = filter.status.map(|s| s.as_str());
        let handoff_type = filter.handoff_type.map(|t| t.as_str());
        let conn = self.conn()?;
        Self::query_documents(
            &conn,
            "SELECT document FROM handoffs
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR handoff_type = ?2)
             ORDER BY created_at DESC, rowid DESC",
            &[&status, &handoff_type],
        )
    }

    fn by_session(&self, session_id: &str) -> Result<Vec<Handoff>> {
        let conn = self.conn()?;
        Self::query_documents(
            &conn,
            "SELECT document FROM handoffs WHERE session_id = ?1
             ORDER BY created_at DESC, rowid DESC",
            &[&session_id],
        )
    }

    fn find_by_token(&self, digest: &TokenDigest) -> Result<Option<Handoff>> {
        let conn = self.conn()?;
        let document: Option<String> = conn
            .query_row(
                "SELECT h.document FROM token_index t JOIN handoffs h ON h.id = t.handoff_id
                 WHERE t.digest = ?1",
                params![digest.to_hex()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;
        document.map(Self::decode).transpose()
    }

    fn replace(&self, expected_version: u64, mut handoff: Handoff) -> Result<Handoff> {
        handoff.version = expected_version + 1;
        let document = serde_json::to_string(&handoff)?;
        let conn = self.conn()?;

        let updated = conn
            .execute(
                "UPDATE handoffs SET status = ?1, version = ?2, document = ?3
                 WHERE id = ?4 AND version = ?5",
                params![
                    handoff.status.as_str(),
                    handoff.version as i64,
                    document,
                    handoff.id,
                    expected_version as i64,
                ],
            )
            .map_err(db)?;

        if updated == 1 {
            return Ok(handoff);
        }

        let actual: Option<i64> = conn
            .query_row(
                "SELECT version FROM handoffs WHERE id = ?1",
                params![handoff.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;
        match actual {
            Some(actual) => Err(CustodyError::ConcurrencyConflict {
                id: handoff.id.clone(),
                expected: expected_version,
                actual: actual as u64,
            }),
            None => Err(CustodyError::not_found(&handoff.id)),
        }
    }

    fn expiry_candidates(&self) -> Result<Vec<Handoff>> {
        let conn = self.conn()?;
        Self::query_documents(
            &conn,
            "SELECT document FROM handoffs WHERE status IN ('pending', 'confirmed_by_sender')
             ORDER BY created_at DESC, rowid DESC",
            &[],
        )
    }

    fn append_notification(&self, entry: NotificationLogEntry) -> Result<()> {
        let document = serde_json::to_string(&entry)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notification_log (handoff_id, document) VALUES (?1, ?2)",
            params![entry.handoff_id, document],
        )
        .map_err(db)?;
        Ok(())
    }

    fn notifications(&self, handoff_id: &str) -> Result<Vec<NotificationLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT document FROM notification_log WHERE handoff_id = ?1 ORDER BY seq ASC")
            .map_err(db)?;
        let rows = stmt
            .query_map(params![handoff_id], |row| row.get::<_, String>(0))
            .map_err(db)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(serde_json::from_str(&row.map_err(db)?)?);
        }
        Ok(entries)
    }
}
