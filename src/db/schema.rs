//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Completed chat interactions awaiting remote sync
        CREATE TABLE IF NOT EXISTS local_ai_interactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sync_key TEXT NOT NULL UNIQUE,
            message TEXT NOT NULL,
            response TEXT,
            timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            chat_type TEXT,
            tags TEXT,
            synced INTEGER NOT NULL DEFAULT 0 CHECK(synced IN (0, 1))
        );

        CREATE INDEX IF NOT EXISTS idx_interactions_synced ON local_ai_interactions(synced);

        -- Conversation summaries awaiting remote sync
        CREATE TABLE IF NOT EXISTS local_analyzed_chats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sync_key TEXT NOT NULL UNIQUE,
            title TEXT,
            summary TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            synced INTEGER NOT NULL DEFAULT 0 CHECK(synced IN (0, 1))
        );

        CREATE INDEX IF NOT EXISTS idx_analyzed_synced ON local_analyzed_chats(synced);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Rows are an audit trail: never deleted, never un-synced
        CREATE TRIGGER IF NOT EXISTS interactions_no_delete
        BEFORE DELETE ON local_ai_interactions
        BEGIN
            SELECT RAISE(ABORT, 'local interactions are append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS interactions_no_unsync
        BEFORE UPDATE OF synced ON local_ai_interactions
        WHEN OLD.synced = 1 AND NEW.synced = 0
        BEGIN
            SELECT RAISE(ABORT, 'synced flag cannot be cleared');
        END;

        CREATE TRIGGER IF NOT EXISTS analyzed_no_delete
        BEFORE DELETE ON local_analyzed_chats
        BEGIN
            SELECT RAISE(ABORT, 'analyzed chats are append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS analyzed_no_unsync
        BEFORE UPDATE OF synced ON local_analyzed_chats
        WHEN OLD.synced = 1 AND NEW.synced = 0
        BEGIN
            SELECT RAISE(ABORT, 'synced flag cannot be cleared');
        END;

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2");
    Ok(())
}
