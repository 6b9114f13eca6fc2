//! Snapshot persistence.
//!
//! After every accepted command the full `ShowState` is serialised to JSON
//! and upserted inside a transaction, keyed by show id. Start-up loads the
//! most recent snapshot; a missing row means a fresh show. Persistence
//! failures never un-accept a command (the state is already mutated in
//! memory), so callers log and carry on.

mod backup;
mod schema;

#[cfg(test)]
mod tests;

pub use backup::BackupWriter;

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};

use yggdrasil_types::{ShowId, ShowState, Timestamp, User, UserId, Vote};

pub struct Persistence {
    conn: Connection,
}

impl Persistence {
    pub fn open(path: &Path) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        schema::create_tables(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create_tables(&conn)?;
        Ok(Self { conn })
    }

    /// Atomically upsert the full state snapshot.
    pub fn save_snapshot(&mut self, state: &ShowState) -> SqlResult<()> {
        let json = serde_json::to_string(state)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO shows (show_id, state, version, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(show_id) DO UPDATE SET
                 state = excluded.state,
                 version = excluded.version,
                 updated_at = excluded.updated_at",
            params![state.id, json, state.version as i64, state.last_updated],
        )?;
        tx.commit()
    }

    /// Load the latest snapshot for a show, if one exists.
    pub fn load_snapshot(&self, show_id: &ShowId) -> SqlResult<Option<ShowState>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM shows WHERE show_id = ?1",
                params![show_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => {
                let state = serde_json::from_str(&json)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    // ── Append-only analysis tables ─────────────────────────────

    pub fn record_user(&self, show_id: &ShowId, user: &User) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO users (show_id, user_id, seat, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![show_id, user.id, user.seat, user.joined_at],
        )?;
        Ok(())
    }

    pub fn record_vote(&self, show_id: &ShowId, vote: &Vote) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO votes (show_id, user_id, row_index, attempt, faction_vote, personal_vote, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                show_id,
                vote.user_id,
                vote.row_index as i64,
                vote.attempt as i64,
                vote.faction_vote,
                vote.personal_vote,
                vote.timestamp
            ],
        )?;
        Ok(())
    }

    pub fn record_response(
        &self,
        show_id: &ShowId,
        user_id: &UserId,
        text: &str,
        now: Timestamp,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO responses (show_id, user_id, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![show_id, user_id, text, now],
        )?;
        Ok(())
    }
}
