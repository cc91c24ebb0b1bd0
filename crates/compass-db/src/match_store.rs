use compass_common::{Error, Result};
use rusqlite::{OptionalExtension, params};

use crate::parse_timestamp;
use crate::pool::Database;

/// Raw cached match payload for one user. Interpreting the JSON is left to the caller.
#[derive(Debug, Clone)]
pub struct StoredMatches {
    pub user_id: i64,
    pub payload: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct MatchStore {
    db: Database,
}

impl MatchStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn load(&self, user_id: i64) -> Result<Option<StoredMatches>> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT payload, created_at, updated_at FROM college_matches WHERE user_id = ?1",
            params![user_id],
            |row| {
                let created_raw: String = row.get(1)?;
                let updated_raw: String = row.get(2)?;
                Ok(StoredMatches {
                    user_id,
                    payload: row.get(0)?,
                    created_at: parse_timestamp(&created_raw),
                    updated_at: parse_timestamp(&updated_raw),
                })
            },
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to load college matches: {e}")))
    }

    /// Insert or replace the cached payload. `created_at` survives replacement.
    pub fn upsert(&self, user_id: i64, payload: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO college_matches (user_id, payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![user_id, payload, now],
        )
        .map_err(|e| Error::Database(format!("failed to save college matches: {e}")))?;
        Ok(())
    }
}
