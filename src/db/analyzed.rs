//! Repository for analyzed conversation summaries

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Row, params};
use serde::Serialize;
use uuid::Uuid;

use super::interaction::parse_timestamp;
use super::{DbPool, connection};
use crate::Result;

/// A conversation summary held locally until the remote side accepts it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzedChatRecord {
    pub id: i64,
    /// Idempotency key the remote side deduplicates on
    pub sync_key: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
}

/// Analyzed chat repository
#[derive(Clone)]
pub struct AnalyzedChatRepo {
    pool: DbPool,
}

impl AnalyzedChatRepo {
    /// Create a new analyzed chat repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a conversation summary as unsynced
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn insert(&self, title: &str, summary: &str) -> Result<AnalyzedChatRecord> {
        let conn = connection(&self.pool)?;
        let sync_key = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO local_analyzed_chats (sync_key, title, summary, created_at, synced)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                sync_key,
                title,
                summary,
                created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
            ],
        )?;

        Ok(AnalyzedChatRecord {
            id: conn.last_insert_rowid(),
            sync_key,
            title: Some(title.to_string()),
            summary: Some(summary.to_string()),
            created_at,
            synced: false,
        })
    }

    /// All summaries not yet accepted by the remote side, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn unsynced(&self) -> Result<Vec<AnalyzedChatRecord>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT id, sync_key, title, summary, created_at, synced
             FROM local_analyzed_chats WHERE synced = 0 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_record)?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Mark one row as synced
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn mark_synced(&self, id: i64) -> Result<bool> {
        let conn = connection(&self.pool)?;
        let updated = conn.execute(
            "UPDATE local_analyzed_chats SET synced = 1 WHERE id = ?1 AND synced = 0",
            [id],
        )?;

        Ok(updated > 0)
    }

    /// Number of rows awaiting sync
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count_unsynced(&self) -> Result<usize> {
        let conn = connection(&self.pool)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM local_analyzed_chats WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;

        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AnalyzedChatRecord> {
    let created_at: String = row.get(4)?;
    let synced: i64 = row.get(5)?;

    Ok(AnalyzedChatRecord {
        id: row.get(0)?,
        sync_key: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        created_at: parse_timestamp(&created_at),
        synced: synced != 0,
    })
}
