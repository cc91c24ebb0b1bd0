use compass_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pool::Database;
use crate::{json_list, parse_timestamp};

pub const MIN_GPA: f64 = 0.0;
pub const MAX_GPA: f64 = 5.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Academic profile that every agent receives as context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: i64,
    pub gpa: Option<f64>,
    pub interests: Vec<String>,
    pub activities: Vec<String>,
    pub target_majors: Vec<String>,
    pub target_schools: Vec<String>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Profile {
    /// Names of the content fields that hold a value.
    pub fn filled_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.gpa.is_some() {
            fields.push("gpa");
        }
        for (name, values) in [
            ("interests", &self.interests),
            ("activities", &self.activities),
            ("target_majors", &self.target_majors),
            ("target_schools", &self.target_schools),
        ] {
            if !values.is_empty() {
                fields.push(name);
            }
        }
        fields
    }
}

/// Full replacement of a profile's content fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub gpa: Option<f64>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub activities: Vec<String>,
    #[serde(default)]
    pub target_majors: Vec<String>,
    #[serde(default)]
    pub target_schools: Vec<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<()> {
        match self.gpa {
            Some(gpa) if !(MIN_GPA..=MAX_GPA).contains(&gpa) => Err(Error::Validation(format!(
                "GPA must be between {MIN_GPA:.1} and {MAX_GPA:.1}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Users and their profiles.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Look up a user by email, creating the row on first sign-in.
    pub fn get_or_create(&self, email: &str, name: &str) -> Result<User> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::Validation("A valid email address is required".into()));
        }
        let name = match name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            name => name.to_string(),
        };

        let conn = self.db.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO users (email, name, created_at) VALUES (?1, ?2, ?3)",
                params![email, name, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to create user: {e}")))?;
        if inserted > 0 {
            info!("created user {}", conn.last_insert_rowid());
        }

        find_by_email(&conn, &email)?
            .ok_or_else(|| Error::Database(format!("user {email} vanished after insert")))
    }

    pub fn get(&self, user_id: i64) -> Result<User> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT id, email, name, created_at FROM users WHERE id = ?1",
            params![user_id],
            user_from_row,
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to load user: {e}")))?
        .ok_or_else(|| Error::NotFound(format!("User {user_id}")))
    }

    pub fn profile(&self, user_id: i64) -> Result<Option<Profile>> {
        let conn = self.db.conn()?;
        load_profile(&conn, user_id)
    }

    /// Profile for a user, or an empty one if nothing has been saved yet.
    pub fn profile_or_default(&self, user_id: i64) -> Result<Profile> {
        Ok(self.profile(user_id)?.unwrap_or(Profile {
            user_id,
            ..Profile::default()
        }))
    }

    /// Insert or replace the profile for `user_id`.
    pub fn save_profile(&self, user_id: i64, update: &ProfileUpdate) -> Result<Profile> {
        update.validate()?;

        let conn = self.db.conn()?;
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                params![user_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check user: {e}")))?;
        if !exists {
            return Err(Error::NotFound(format!("User {user_id}")));
        }

        conn.execute(
            "INSERT INTO profiles
                (user_id, gpa, interests, activities, target_majors, target_schools, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id) DO UPDATE SET
                gpa = excluded.gpa,
                interests = excluded.interests,
                activities = excluded.activities,
                target_majors = excluded.target_majors,
                target_schools = excluded.target_schools,
                updated_at = excluded.updated_at",
            params![
                user_id,
                update.gpa,
                serde_json::to_string(&update.interests)?,
                serde_json::to_string(&update.activities)?,
                serde_json::to_string(&update.target_majors)?,
                serde_json::to_string(&update.target_schools)?,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Database(format!("failed to save profile: {e}")))?;

        load_profile(&conn, user_id)?
            .ok_or_else(|| Error::Database(format!("profile for user {user_id} missing after save")))
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let created_raw: String = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_timestamp(&created_raw),
    })
}

fn find_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, email, name, created_at FROM users WHERE email = ?1",
        params![email],
        user_from_row,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to load user: {e}")))
}

fn load_profile(conn: &Connection, user_id: i64) -> Result<Option<Profile>> {
    conn.query_row(
        "SELECT gpa, interests, activities, target_majors, target_schools, updated_at
         FROM profiles WHERE user_id = ?1",
        params![user_id],
        |row| {
            let interests: String = row.get(1)?;
            let activities: String = row.get(2)?;
            let majors: String = row.get(3)?;
            let schools: String = row.get(4)?;
            let updated_raw: String = row.get(5)?;
            Ok(Profile {
                user_id,
                gpa: row.get(0)?,
                interests: json_list(&interests),
                activities: json_list(&activities),
                target_majors: json_list(&majors),
                target_schools: json_list(&schools),
                updated_at: Some(parse_timestamp(&updated_raw)),
            })
        },
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to load profile: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        UserStore::new(Database::in_memory().unwrap())
    }

    #[test]
    fn get_or_create_is_idempotent_by_email() {
        let store = store();
        let first = store.get_or_create("Student@School.org", "Sam").unwrap();
        let second = store.get_or_create("student@school.org", "Someone Else").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Sam");
        assert_eq!(second.email, "student@school.org");
    }

    #[test]
    fn name_defaults_to_email_local_part() {
        let user = store().get_or_create("river@example.com", "  ").unwrap();
        assert_eq!(user.name, "river");
    }

    #[test]
    fn invalid_email_is_rejected() {
        let err = store().get_or_create("not-an-email", "x").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn unknown_user_is_not_found() {
        assert!(matches!(store().get(42), Err(Error::NotFound(_))));
    }

    #[test]
    fn profile_upsert_replaces_fields() {
        let store = store();
        let user = store.get_or_create("a@b.org", "A").unwrap();
        assert!(store.profile(user.id).unwrap().is_none());

        let saved = store
            .save_profile(
                user.id,
                &ProfileUpdate {
                    gpa: Some(3.8),
                    interests: vec!["robotics".into()],
                    ..ProfileUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(saved.gpa, Some(3.8));
        assert_eq!(saved.interests, vec!["robotics".to_string()]);

        let saved = store
            .save_profile(
                user.id,
                &ProfileUpdate {
                    gpa: None,
                    target_majors: vec!["Computer Science".into()],
                    ..ProfileUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(saved.gpa, None);
        assert!(saved.interests.is_empty());
        assert_eq!(saved.target_majors, vec!["Computer Science".to_string()]);
    }

    #[test]
    fn gpa_out_of_range_is_a_validation_error() {
        let store = store();
        let user = store.get_or_create("a@b.org", "A").unwrap();
        let err = store
            .save_profile(
                user.id,
                &ProfileUpdate {
                    gpa: Some(5.1),
                    ..ProfileUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.profile(user.id).unwrap().is_none());
    }

    #[test]
    fn saving_profile_for_missing_user_is_not_found() {
        let err = store()
            .save_profile(9, &ProfileUpdate::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn filled_fields_reports_present_values() {
        let profile = Profile {
            gpa: Some(3.2),
            activities: vec!["band".into()],
            ..Profile::default()
        };
        assert_eq!(profile.filled_fields(), vec!["gpa", "activities"]);
    }
}
