//! Repository for completed chat interactions

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use uuid::Uuid;

use super::{DbPool, connection};
use crate::Result;

const INTERACTION_COLUMNS: &str =
    "id, sync_key, message, response, timestamp, chat_type, tags, synced";

/// Chat type recorded for socket-streamed turns
pub const CHAT_TYPE_CHAT: &str = "chat";

/// Chat type recorded for image generation turns
pub const CHAT_TYPE_IMAGE: &str = "image";

/// A completed interaction held locally until the remote side accepts it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalInteractionRecord {
    pub id: i64,
    /// Idempotency key the remote side deduplicates on
    pub sync_key: String,
    pub message: String,
    pub response: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub chat_type: Option<String>,
    pub tags: Option<String>,
    pub synced: bool,
}

/// Fields supplied when recording an interaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewInteraction {
    pub message: String,
    pub response: Option<String>,
    pub chat_type: Option<String>,
    pub tags: Option<String>,
}

impl NewInteraction {
    /// A streamed chat turn
    #[must_use]
    pub fn chat(message: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: Some(response.into()),
            chat_type: Some(CHAT_TYPE_CHAT.to_string()),
            tags: None,
        }
    }

    /// An image generation turn
    #[must_use]
    pub fn image(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            message: prompt.into(),
            response: Some(response.into()),
            chat_type: Some(CHAT_TYPE_IMAGE.to_string()),
            tags: None,
        }
    }

    /// Attach free-form tags
    #[must_use]
    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }
}

/// Interaction repository
#[derive(Clone)]
pub struct InteractionRepo {
    pool: DbPool,
}

impl InteractionRepo {
    /// Create a new interaction repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a completed interaction as unsynced
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn insert(&self, new: &NewInteraction) -> Result<LocalInteractionRecord> {
        let conn = connection(&self.pool)?;
        let sync_key = Uuid::new_v4().to_string();
        let timestamp = Utc::now();

        conn.execute(
            "INSERT INTO local_ai_interactions (sync_key, message, response, timestamp, chat_type, tags, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                sync_key,
                new.message,
                new.response,
                timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                new.chat_type,
                new.tags,
            ],
        )?;
        let id = conn.last_insert_rowid();

        tracing::debug!(id, chat_type = ?new.chat_type, "recorded interaction");

        Ok(LocalInteractionRecord {
            id,
            sync_key,
            message: new.message.clone(),
            response: new.response.clone(),
            timestamp,
            chat_type: new.chat_type.clone(),
            tags: new.tags.clone(),
            synced: false,
        })
    }

    /// Get an interaction by row id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: i64) -> Result<Option<LocalInteractionRecord>> {
        let conn = connection(&self.pool)?;
        let sql = format!("SELECT {INTERACTION_COLUMNS} FROM local_ai_interactions WHERE id = ?1");

        let record = conn.query_row(&sql, [id], row_to_record).optional()?;
        Ok(record)
    }

    /// All interactions not yet accepted by the remote side, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn unsynced(&self) -> Result<Vec<LocalInteractionRecord>> {
        let conn = connection(&self.pool)?;
        let sql = format!(
            "SELECT {INTERACTION_COLUMNS} FROM local_ai_interactions WHERE synced = 0 ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_record)?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Mark one row as synced
    ///
    /// Returns `false` if the row was already synced or does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn mark_synced(&self, id: i64) -> Result<bool> {
        let conn = connection(&self.pool)?;
        let updated = conn.execute(
            "UPDATE local_ai_interactions SET synced = 1 WHERE id = ?1 AND synced = 0",
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
            "SELECT COUNT(*) FROM local_ai_interactions WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Most recent interactions, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, limit: usize) -> Result<Vec<LocalInteractionRecord>> {
        let conn = connection(&self.pool)?;
        let sql = format!(
            "SELECT {INTERACTION_COLUMNS} FROM local_ai_interactions ORDER BY timestamp DESC, id DESC LIMIT ?1"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([limit], row_to_record)?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<LocalInteractionRecord> {
    let timestamp: String = row.get(4)?;
    let synced: i64 = row.get(7)?;

    Ok(LocalInteractionRecord {
        id: row.get(0)?,
        sync_key: row.get(1)?,
        message: row.get(2)?,
        response: row.get(3)?,
        timestamp: parse_timestamp(&timestamp),
        chat_type: row.get(5)?,
        tags: row.get(6)?,
        synced: synced != 0,
    })
}

/// Parse a stored timestamp, accepting both RFC 3339 and `SQLite`'s `datetime()` format
pub(super) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}
