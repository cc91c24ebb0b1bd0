use compass_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::parse_timestamp;
use crate::pool::Database;

#[derive(Debug, Clone, Serialize)]
pub struct Achievement {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub icon_name: String,
    pub points: i64,
    pub category: String,
    pub requirements: Value,
}

/// Catalog entry paired with one user's progress toward it.
#[derive(Debug, Clone, Serialize)]
pub struct AchievementProgress {
    pub achievement: Achievement,
    pub progress: Value,
    pub completed: bool,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AchievementOutcome {
    AlreadyCompleted,
    Completed { points: i64 },
    InProgress { progress: Value },
}

#[derive(Debug, Clone, Serialize)]
pub struct AchievementCheck {
    pub achievement: String,
    #[serde(flatten)]
    pub outcome: AchievementOutcome,
}

#[derive(Clone)]
pub struct AchievementStore {
    db: Database,
}

impl AchievementStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn catalog(&self) -> Result<Vec<Achievement>> {
        let conn = self.db.conn()?;
        load_catalog(&conn)
    }

    /// Every achievement with the user's progress, completed or not.
    pub fn user_progress(&self, user_id: i64) -> Result<Vec<AchievementProgress>> {
        let conn = self.db.conn()?;
        let catalog = load_catalog(&conn)?;

        let mut progress = Vec::with_capacity(catalog.len());
        for achievement in catalog {
            let row: Option<(String, bool, Option<String>)> = conn
                .query_row(
                    "SELECT progress, completed, completed_at FROM user_achievements
                     WHERE user_id = ?1 AND achievement_id = ?2",
                    params![user_id, achievement.id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| Error::Database(format!("failed to load achievement progress: {e}")))?;

            let (progress_raw, completed, completed_at) =
                row.unwrap_or_else(|| ("{}".to_string(), false, None));
            progress.push(AchievementProgress {
                achievement,
                progress: serde_json::from_str(&progress_raw).unwrap_or(Value::Null),
                completed,
                completed_at: completed_at.as_deref().map(parse_timestamp),
            });
        }
        Ok(progress)
    }

    pub fn total_points(&self, user_id: i64) -> Result<i64> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT COALESCE(SUM(a.points), 0) FROM user_achievements ua
             JOIN achievements a ON a.id = ua.achievement_id
             WHERE ua.user_id = ?1 AND ua.completed = 1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to sum achievement points: {e}")))
    }

    /// Evaluate every achievement against a snapshot of the user's state and
    /// record progress. Completed achievements are never re-evaluated.
    pub fn check(&self, user_id: i64, state: &Value) -> Result<Vec<AchievementCheck>> {
        let conn = self.db.conn()?;
        let catalog = load_catalog(&conn)?;

        let mut results = Vec::with_capacity(catalog.len());
        for achievement in catalog {
            let outcome = check_one(&conn, user_id, &achievement, state)?;
            results.push(AchievementCheck {
                achievement: achievement.name,
                outcome,
            });
        }
        Ok(results)
    }
}

fn check_one(
    conn: &Connection,
    user_id: i64,
    achievement: &Achievement,
    state: &Value,
) -> Result<AchievementOutcome> {
    let already: Option<bool> = conn
        .query_row(
            "SELECT completed FROM user_achievements WHERE user_id = ?1 AND achievement_id = ?2",
            params![user_id, achievement.id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to load achievement progress: {e}")))?;
    if already == Some(true) {
        return Ok(AchievementOutcome::AlreadyCompleted);
    }

    let progress = progress_snapshot(&achievement.requirements, state);
    let completed = requirements_met(&achievement.requirements, state);
    let completed_at = completed.then(|| chrono::Utc::now().to_rfc3339());

    conn.execute(
        "INSERT INTO user_achievements (user_id, achievement_id, progress, completed, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id, achievement_id) DO UPDATE SET
            progress = excluded.progress,
            completed = excluded.completed,
            completed_at = excluded.completed_at",
        params![user_id, achievement.id, progress.to_string(), completed, completed_at],
    )
    .map_err(|e| Error::Database(format!("failed to record achievement progress: {e}")))?;

    if completed {
        info!("user {} earned achievement '{}'", user_id, achievement.name);
        Ok(AchievementOutcome::Completed {
            points: achievement.points,
        })
    } else {
        Ok(AchievementOutcome::InProgress { progress })
    }
}

/// Numeric requirements are minimums, list requirements must all be present,
/// anything else must match exactly. An empty requirement set is never met.
pub fn requirements_met(requirements: &Value, state: &Value) -> bool {
    let Some(requirements) = requirements.as_object() else {
        return false;
    };
    if requirements.is_empty() {
        return false;
    }

    requirements.iter().all(|(key, required)| {
        let actual = &state[key.as_str()];
        match required {
            Value::Number(min) => match (actual.as_f64(), min.as_f64()) {
                (Some(actual), Some(min)) => actual >= min,
                _ => false,
            },
            Value::Array(needed) => actual
                .as_array()
                .map(|have| needed.iter().all(|item| have.contains(item)))
                .unwrap_or(false),
            other => actual == other,
        }
    })
}

fn progress_snapshot(requirements: &Value, state: &Value) -> Value {
    let mut snapshot = serde_json::Map::new();
    if let Some(requirements) = requirements.as_object() {
        for key in requirements.keys() {
            snapshot.insert(key.clone(), state[key.as_str()].clone());
        }
    }
    Value::Object(snapshot)
}

fn load_catalog(conn: &Connection) -> Result<Vec<Achievement>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, description, icon_name, points, category, requirements
             FROM achievements ORDER BY id ASC",
        )
        .map_err(|e| Error::Database(format!("failed to prepare achievement query: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            let requirements_raw: String = row.get(6)?;
            Ok(Achievement {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                icon_name: row.get(3)?,
                points: row.get(4)?,
                category: row.get(5)?,
                requirements: serde_json::from_str(&requirements_raw).unwrap_or(Value::Null),
            })
        })
        .map_err(|e| Error::Database(format!("failed to load achievements: {e}")))?;

    let mut catalog = Vec::new();
    for row in rows {
        catalog.push(row.map_err(|e| Error::Database(format!("failed to read achievement row: {e}")))?);
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> AchievementStore {
        AchievementStore::new(Database::in_memory().unwrap())
    }

    fn outcome_for<'a>(results: &'a [AchievementCheck], name: &str) -> &'a AchievementOutcome {
        &results
            .iter()
            .find(|r| r.achievement == name)
            .expect("achievement present")
            .outcome
    }

    #[test]
    fn default_catalog_is_seeded() {
        let names: Vec<_> = store().catalog().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Profile Pioneer", "Chat Champion", "Goal Getter"]);
    }

    #[test]
    fn numeric_requirements_are_minimums() {
        let reqs = json!({"chat_sessions": 5});
        assert!(requirements_met(&reqs, &json!({"chat_sessions": 5})));
        assert!(requirements_met(&reqs, &json!({"chat_sessions": 9})));
        assert!(!requirements_met(&reqs, &json!({"chat_sessions": 4})));
        assert!(!requirements_met(&reqs, &json!({})));
    }

    #[test]
    fn list_requirements_need_every_entry() {
        let reqs = json!({"profile_fields": ["gpa", "interests"]});
        assert!(requirements_met(
            &reqs,
            &json!({"profile_fields": ["interests", "gpa", "activities"]})
        ));
        assert!(!requirements_met(&reqs, &json!({"profile_fields": ["gpa"]})));
    }

    #[test]
    fn empty_requirements_are_never_met() {
        assert!(!requirements_met(&json!({}), &json!({"anything": 1})));
        assert!(!requirements_met(&Value::Null, &json!({})));
    }

    #[test]
    fn check_records_progress_then_completion_once() {
        let db = Database::in_memory().unwrap();
        let user = crate::users::UserStore::new(db.clone())
            .get_or_create("ach@example.org", "Ach")
            .unwrap();
        let store = AchievementStore::new(db);

        let results = store
            .check(user.id, &json!({"chat_sessions": 2, "goals_set": 3}))
            .unwrap();
        assert_eq!(
            outcome_for(&results, "Chat Champion"),
            &AchievementOutcome::InProgress {
                progress: json!({"chat_sessions": 2})
            }
        );
        assert_eq!(
            outcome_for(&results, "Goal Getter"),
            &AchievementOutcome::Completed { points: 200 }
        );

        let results = store.check(user.id, &json!({"goals_set": 0})).unwrap();
        assert_eq!(
            outcome_for(&results, "Goal Getter"),
            &AchievementOutcome::AlreadyCompleted
        );

        assert_eq!(store.total_points(user.id).unwrap(), 200);
        let progress = store.user_progress(user.id).unwrap();
        let goal = progress
            .iter()
            .find(|p| p.achievement.name == "Goal Getter")
            .unwrap();
        assert!(goal.completed);
        assert!(goal.completed_at.is_some());
    }
}
