use compass_common::{Error, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::parse_timestamp;
use crate::pool::Database;

/// A row of the student's activity plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanItem {
    pub id: i64,
    pub user_id: i64,
    pub activity_text: String,
    pub category: String,
    pub grade_year: String,
    pub url: Option<String>,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPlanItem {
    pub activity_text: String,
    pub category: String,
    pub grade_year: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Clone)]
pub struct PlanStore {
    db: Database,
}

impl PlanStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a pending plan item.
    pub fn add(&self, user_id: i64, item: &NewPlanItem) -> Result<PlanItem> {
        if item.activity_text.trim().is_empty() {
            return Err(Error::Validation("Plan item text cannot be empty".into()));
        }
        let metadata = if item.metadata.is_null() {
            serde_json::json!({})
        } else {
            item.metadata.clone()
        };
        let created_at = chrono::Utc::now();

        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO plan_items
                (user_id, activity_text, category, grade_year, url, status, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7)",
            params![
                user_id,
                item.activity_text,
                item.category,
                item.grade_year,
                item.url,
                metadata.to_string(),
                created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Database(format!("failed to add plan item: {e}")))?;

        Ok(PlanItem {
            id: conn.last_insert_rowid(),
            user_id,
            activity_text: item.activity_text.clone(),
            category: item.category.clone(),
            grade_year: item.grade_year.clone(),
            url: item.url.clone(),
            status: "pending".to_string(),
            metadata,
            created_at,
        })
    }

    /// Plan items for a user, oldest first.
    pub fn list(&self, user_id: i64) -> Result<Vec<PlanItem>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, activity_text, category, grade_year, url, status, metadata, created_at
                 FROM plan_items WHERE user_id = ?1 ORDER BY id ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare plan query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                let metadata_raw: String = row.get(7)?;
                let created_raw: String = row.get(8)?;
                Ok(PlanItem {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    activity_text: row.get(2)?,
                    category: row.get(3)?,
                    grade_year: row.get(4)?,
                    url: row.get(5)?,
                    status: row.get(6)?,
                    metadata: serde_json::from_str(&metadata_raw)
                        .unwrap_or(serde_json::Value::Null),
                    created_at: parse_timestamp(&created_raw),
                })
            })
            .map_err(|e| Error::Database(format!("failed to load plan items: {e}")))?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(|e| Error::Database(format!("failed to read plan row: {e}")))?);
        }
        Ok(items)
    }

    pub fn count(&self, user_id: i64) -> Result<i64> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM plan_items WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to count plan items: {e}")))
    }
}
