use compass_common::{Error, Result};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pool::Database;

pub const DEFAULT_SEARCH_LIMIT: u32 = 50;
pub const MAX_SEARCH_LIMIT: u32 = 200;

#[derive(Debug, Clone, Serialize)]
pub struct Institution {
    pub id: i64,
    pub unitid: i64,
    pub name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub control: Option<String>,
    pub acceptance_rate: Option<f64>,
    pub tuition: Option<f64>,
    pub website: Option<String>,
    pub is_favorite: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewInstitution {
    pub unitid: i64,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub control: Option<String>,
    #[serde(default)]
    pub acceptance_rate: Option<f64>,
    #[serde(default)]
    pub tuition: Option<f64>,
    #[serde(default)]
    pub website: Option<String>,
}

/// College explorer: institution search and per-user favourites.
#[derive(Clone)]
pub struct InstitutionStore {
    db: Database,
}

impl InstitutionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or refresh one institution keyed by `unitid`. Returns its row id.
    pub fn insert(&self, institution: &NewInstitution) -> Result<i64> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO institutions
                (unitid, name, city, state, zip, control, acceptance_rate, tuition, website)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(unitid) DO UPDATE SET
                name = excluded.name,
                city = excluded.city,
                state = excluded.state,
                zip = excluded.zip,
                control = excluded.control,
                acceptance_rate = excluded.acceptance_rate,
                tuition = excluded.tuition,
                website = excluded.website",
            params![
                institution.unitid,
                institution.name,
                institution.city,
                institution.state,
                institution.zip,
                institution.control,
                institution.acceptance_rate,
                institution.tuition,
                institution.website,
            ],
        )
        .map_err(|e| Error::Database(format!("failed to insert institution: {e}")))?;

        conn.query_row(
            "SELECT id FROM institutions WHERE unitid = ?1",
            params![institution.unitid],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to load institution id: {e}")))
    }

    /// Case-insensitive name search, optionally filtered by state, flagged with
    /// the user's favourites.
    pub fn search(
        &self,
        user_id: i64,
        query: Option<&str>,
        state: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Institution>> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);
        let pattern = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", escape_like(&q.to_lowercase())));
        let state = state
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase);
        debug!("institution search: pattern={:?} state={:?} limit={}", pattern, state, limit);

        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT i.id, i.unitid, i.name, i.city, i.state, i.zip, i.control,
                        i.acceptance_rate, i.tuition, i.website,
                        EXISTS(SELECT 1 FROM user_favorite_institutions f
                               WHERE f.user_id = ?1 AND f.institution_id = i.id)
                 FROM institutions i
                 WHERE (?2 IS NULL OR LOWER(i.name) LIKE ?2 ESCAPE '\\')
                   AND (?3 IS NULL OR UPPER(i.state) = ?3)
                 ORDER BY i.name ASC
                 LIMIT ?4",
            )
            .map_err(|e| Error::Database(format!("failed to prepare institution query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id, pattern, state, limit], institution_from_row)
            .map_err(|e| Error::Database(format!("failed to search institutions: {e}")))?;

        let mut institutions = Vec::new();
        for row in rows {
            institutions.push(
                row.map_err(|e| Error::Database(format!("failed to read institution row: {e}")))?,
            );
        }
        Ok(institutions)
    }

    /// Flip the favourite flag. Returns whether the institution is now a favourite.
    pub fn toggle_favorite(&self, user_id: i64, institution_id: i64) -> Result<bool> {
        let conn = self.db.conn()?;
        let exists = conn
            .query_row(
                "SELECT id FROM institutions WHERE id = ?1",
                params![institution_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load institution: {e}")))?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("Institution {institution_id}")));
        }

        let removed = conn
            .execute(
                "DELETE FROM user_favorite_institutions WHERE user_id = ?1 AND institution_id = ?2",
                params![user_id, institution_id],
            )
            .map_err(|e| Error::Database(format!("failed to remove favorite: {e}")))?;
        if removed > 0 {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO user_favorite_institutions (user_id, institution_id) VALUES (?1, ?2)",
            params![user_id, institution_id],
        )
        .map_err(|e| Error::Database(format!("failed to add favorite: {e}")))?;
        Ok(true)
    }

    pub fn favorites(&self, user_id: i64) -> Result<Vec<Institution>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT i.id, i.unitid, i.name, i.city, i.state, i.zip, i.control,
                        i.acceptance_rate, i.tuition, i.website, 1
                 FROM institutions i
                 JOIN user_favorite_institutions f ON f.institution_id = i.id
                 WHERE f.user_id = ?1
                 ORDER BY i.name ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare favorites query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id], institution_from_row)
            .map_err(|e| Error::Database(format!("failed to load favorites: {e}")))?;

        let mut favorites = Vec::new();
        for row in rows {
            favorites.push(
                row.map_err(|e| Error::Database(format!("failed to read institution row: {e}")))?,
            );
        }
        Ok(favorites)
    }
}

/// Escape `LIKE` wildcards so user text matches literally (escape char `\`).
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn institution_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Institution> {
    Ok(Institution {
        id: row.get(0)?,
        unitid: row.get(1)?,
        name: row.get(2)?,
        city: row.get(3)?,
        state: row.get(4)?,
        zip: row.get(5)?,
        control: row.get(6)?,
        acceptance_rate: row.get(7)?,
        tuition: row.get(8)?,
        website: row.get(9)?,
        is_favorite: row.get(10)?,
    })
}
