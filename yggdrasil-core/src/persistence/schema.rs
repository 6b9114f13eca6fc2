//! SQLite schema.
//!
//! The `shows` table is authoritative for recovery: one row per show,
//! holding the latest full-state JSON snapshot. The remaining tables are
//! append-only and exist for post-hoc analysis, never for recovery.

use rusqlite::{Connection, Result as SqlResult};

pub fn create_tables(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS shows (
            show_id    TEXT PRIMARY KEY,
            state      TEXT NOT NULL,
            version    INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS users (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            show_id   TEXT NOT NULL,
            user_id   TEXT NOT NULL,
            seat      TEXT,
            joined_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS votes (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            show_id       TEXT NOT NULL,
            user_id       TEXT NOT NULL,
            row_index     INTEGER NOT NULL,
            attempt       INTEGER NOT NULL,
            faction_vote  TEXT NOT NULL,
            personal_vote TEXT NOT NULL,
            ts            INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS responses (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            show_id    TEXT NOT NULL,
            user_id    TEXT NOT NULL,
            text       TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );",
    )
}
