use chrono::{Days, NaiveDate, Utc};
use compass_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pool::Database;
use crate::{parse_date, parse_timestamp};

/// Days before a deadline at which its reminder falls due.
pub const REMINDER_LEAD_DAYS: u64 = 7;

/// Longest look-ahead accepted by `upcoming_reminders`.
pub const MAX_REMINDER_WINDOW_DAYS: i64 = 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineStatus {
    Pending,
    InProgress,
    Completed,
}

impl TimelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineStatus::Pending => "pending",
            TimelineStatus::InProgress => "in_progress",
            TimelineStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(TimelineStatus::Pending),
            "in_progress" => Ok(TimelineStatus::InProgress),
            "completed" => Ok(TimelineStatus::Completed),
            other => Err(Error::Validation(format!("unknown status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Deadline {
    pub id: i64,
    pub user_id: i64,
    pub college_name: String,
    pub deadline_type: String,
    pub deadline_date: NaiveDate,
    pub status: TimelineStatus,
    pub requirements: serde_json::Value,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDeadline {
    pub college_name: String,
    pub deadline_type: String,
    pub deadline_date: NaiveDate,
    #[serde(default)]
    pub requirements: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Milestone {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub due_date: NaiveDate,
    pub status: TimelineStatus,
    pub completed_at: Option<chrono::DateTime<Utc>>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMilestone {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    pub due_date: NaiveDate,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_priority() -> String {
    "medium".to_string()
}

/// An unsent reminder joined with the deadline it points at.
#[derive(Debug, Clone, Serialize)]
pub struct Reminder {
    pub id: i64,
    pub deadline_id: i64,
    pub college_name: String,
    pub deadline_type: String,
    pub deadline_date: NaiveDate,
    pub reminder_date: NaiveDate,
    pub reminder_type: String,
}

/// Application deadlines, milestones and their reminders.
#[derive(Clone)]
pub struct TimelineStore {
    db: Database,
}

impl TimelineStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a deadline and its reminder one week ahead.
    pub fn add_deadline(&self, user_id: i64, deadline: &NewDeadline) -> Result<Deadline> {
        if deadline.college_name.trim().is_empty() {
            return Err(Error::Validation("College name is required".into()));
        }
        let reminder_date = deadline
            .deadline_date
            .checked_sub_days(Days::new(REMINDER_LEAD_DAYS))
            .ok_or_else(|| Error::Validation("Deadline date is out of range".into()))?;
        let now = Utc::now().to_rfc3339();
        let requirements = if deadline.requirements.is_null() {
            serde_json::json!({})
        } else {
            deadline.requirements.clone()
        };

        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO application_deadlines
                (user_id, college_name, deadline_type, deadline_date, status, requirements, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?6)",
            params![
                user_id,
                deadline.college_name.trim(),
                deadline.deadline_type,
                deadline.deadline_date.to_string(),
                requirements.to_string(),
                now,
            ],
        )
        .map_err(|e| Error::Database(format!("failed to add deadline: {e}")))?;
        let deadline_id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO deadline_reminders (user_id, deadline_id, reminder_date, reminder_type)
             VALUES (?1, ?2, ?3, 'one_week')",
            params![user_id, deadline_id, reminder_date.to_string()],
        )
        .map_err(|e| Error::Database(format!("failed to add reminder: {e}")))?;
        info!(
            "added deadline {} for user {} with reminder on {}",
            deadline_id, user_id, reminder_date
        );

        load_deadline(&conn, user_id, deadline_id)
    }

    /// Deadlines for a user, soonest first.
    pub fn deadlines(&self, user_id: i64) -> Result<Vec<Deadline>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{DEADLINE_COLUMNS} WHERE user_id = ?1 ORDER BY deadline_date ASC, id ASC"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare deadline query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id], deadline_from_row)
            .map_err(|e| Error::Database(format!("failed to load deadlines: {e}")))?;

        let mut deadlines = Vec::new();
        for row in rows {
            let row = row.map_err(|e| Error::Database(format!("failed to read deadline row: {e}")))?;
            deadlines.push(row.into_deadline()?);
        }
        Ok(deadlines)
    }

    pub fn update_deadline_status(
        &self,
        user_id: i64,
        deadline_id: i64,
        status: TimelineStatus,
    ) -> Result<Deadline> {
        let conn = self.db.conn()?;
        let updated = conn
            .execute(
                "UPDATE application_deadlines SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND user_id = ?4",
                params![status.as_str(), Utc::now().to_rfc3339(), deadline_id, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to update deadline: {e}")))?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Deadline {deadline_id}")));
        }
        load_deadline(&conn, user_id, deadline_id)
    }

    pub fn add_milestone(&self, user_id: i64, milestone: &NewMilestone) -> Result<Milestone> {
        if milestone.title.trim().is_empty() {
            return Err(Error::Validation("Milestone title is required".into()));
        }
        let now = Utc::now().to_rfc3339();

        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO timeline_milestones
                (user_id, title, description, category, priority, due_date, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
            params![
                user_id,
                milestone.title.trim(),
                milestone.description,
                milestone.category,
                milestone.priority,
                milestone.due_date.to_string(),
                now,
            ],
        )
        .map_err(|e| Error::Database(format!("failed to add milestone: {e}")))?;

        load_milestone(&conn, user_id, conn.last_insert_rowid())
    }

    /// Milestones for a user, soonest first.
    pub fn milestones(&self, user_id: i64) -> Result<Vec<Milestone>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{MILESTONE_COLUMNS} WHERE user_id = ?1 ORDER BY due_date ASC, id ASC"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare milestone query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id], milestone_from_row)
            .map_err(|e| Error::Database(format!("failed to load milestones: {e}")))?;

        let mut milestones = Vec::new();
        for row in rows {
            let row =
                row.map_err(|e| Error::Database(format!("failed to read milestone row: {e}")))?;
            milestones.push(row.into_milestone()?);
        }
        Ok(milestones)
    }

    /// Set a milestone's status. `completed` stamps `completed_at`; any other status clears it.
    pub fn update_milestone_status(
        &self,
        user_id: i64,
        milestone_id: i64,
        status: TimelineStatus,
    ) -> Result<Milestone> {
        let now = Utc::now().to_rfc3339();
        let completed_at = (status == TimelineStatus::Completed).then(|| now.clone());

        let conn = self.db.conn()?;
        let updated = conn
            .execute(
                "UPDATE timeline_milestones SET status = ?1, completed_at = ?2, updated_at = ?3
                 WHERE id = ?4 AND user_id = ?5",
                params![status.as_str(), completed_at, now, milestone_id, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to update milestone: {e}")))?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Milestone {milestone_id}")));
        }
        load_milestone(&conn, user_id, milestone_id)
    }

    /// Unsent reminders falling due between `today` and `today + days`, inclusive.
    pub fn upcoming_reminders(
        &self,
        user_id: i64,
        today: NaiveDate,
        days: i64,
    ) -> Result<Vec<Reminder>> {
        if days > MAX_REMINDER_WINDOW_DAYS {
            return Err(Error::Validation(format!(
                "Reminder window cannot exceed {MAX_REMINDER_WINDOW_DAYS} days"
            )));
        }
        let until = today
            .checked_add_days(Days::new(days.max(0) as u64))
            .ok_or_else(|| Error::Validation("Reminder window is out of range".into()))?;
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT r.id, r.deadline_id, d.college_name, d.deadline_type, d.deadline_date,
                        r.reminder_date, r.reminder_type
                 FROM deadline_reminders r
                 JOIN application_deadlines d ON d.id = r.deadline_id
                 WHERE r.user_id = ?1 AND r.sent = 0
                   AND r.reminder_date >= ?2 AND r.reminder_date <= ?3
                 ORDER BY r.reminder_date ASC, r.id ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare reminder query: {e}")))?;
        let rows = stmt
            .query_map(
                params![user_id, today.to_string(), until.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .map_err(|e| Error::Database(format!("failed to load reminders: {e}")))?;

        let mut reminders = Vec::new();
        for row in rows {
            let (id, deadline_id, college_name, deadline_type, deadline_raw, reminder_raw, kind) =
                row.map_err(|e| Error::Database(format!("failed to read reminder row: {e}")))?;
            reminders.push(Reminder {
                id,
                deadline_id,
                college_name,
                deadline_type,
                deadline_date: parse_date(&deadline_raw)?,
                reminder_date: parse_date(&reminder_raw)?,
                reminder_type: kind,
            });
        }
        Ok(reminders)
    }

    pub fn mark_reminder_sent(&self, user_id: i64, reminder_id: i64) -> Result<bool> {
        let conn = self.db.conn()?;
        let rows = conn
            .execute(
                "UPDATE deadline_reminders SET sent = 1 WHERE id = ?1 AND user_id = ?2 AND sent = 0",
                params![reminder_id, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to mark reminder sent: {e}")))?;
        Ok(rows > 0)
    }

    /// Deadlines plus milestones the user is tracking.
    pub fn count_goals(&self, user_id: i64) -> Result<i64> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT (SELECT COUNT(*) FROM application_deadlines WHERE user_id = ?1)
                  + (SELECT COUNT(*) FROM timeline_milestones WHERE user_id = ?1)",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to count goals: {e}")))
    }
}

const DEADLINE_COLUMNS: &str = "SELECT id, user_id, college_name, deadline_type, deadline_date, status,
        requirements, created_at, updated_at
 FROM application_deadlines";

const MILESTONE_COLUMNS: &str = "SELECT id, user_id, title, description, category, priority, due_date,
        status, completed_at, created_at, updated_at
 FROM timeline_milestones";

/// Raw deadline columns; date and status parsing happens outside the row closure.
struct DeadlineRow {
    id: i64,
    user_id: i64,
    college_name: String,
    deadline_type: String,
    deadline_date: String,
    status: String,
    requirements: String,
    created_at: String,
    updated_at: String,
}

impl DeadlineRow {
    fn into_deadline(self) -> Result<Deadline> {
        Ok(Deadline {
            id: self.id,
            user_id: self.user_id,
            college_name: self.college_name,
            deadline_type: self.deadline_type,
            deadline_date: parse_date(&self.deadline_date)?,
            status: TimelineStatus::parse(&self.status)?,
            requirements: serde_json::from_str(&self.requirements)
                .unwrap_or(serde_json::Value::Null),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

fn deadline_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeadlineRow> {
    Ok(DeadlineRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        college_name: row.get(2)?,
        deadline_type: row.get(3)?,
        deadline_date: row.get(4)?,
        status: row.get(5)?,
        requirements: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

struct MilestoneRow {
    id: i64,
    user_id: i64,
    title: String,
    description: String,
    category: String,
    priority: String,
    due_date: String,
    status: String,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl MilestoneRow {
    fn into_milestone(self) -> Result<Milestone> {
        Ok(Milestone {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            description: self.description,
            category: self.category,
            priority: self.priority,
            due_date: parse_date(&self.due_date)?,
            status: TimelineStatus::parse(&self.status)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

fn milestone_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MilestoneRow> {
    Ok(MilestoneRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        priority: row.get(5)?,
        due_date: row.get(6)?,
        status: row.get(7)?,
        completed_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn load_deadline(conn: &Connection, user_id: i64, deadline_id: i64) -> Result<Deadline> {
    conn.query_row(
        &format!("{DEADLINE_COLUMNS} WHERE id = ?1 AND user_id = ?2"),
        params![deadline_id, user_id],
        deadline_from_row,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to load deadline: {e}")))?
    .ok_or_else(|| Error::NotFound(format!("Deadline {deadline_id}")))?
    .into_deadline()
}

fn load_milestone(conn: &Connection, user_id: i64, milestone_id: i64) -> Result<Milestone> {
    conn.query_row(
        &format!("{MILESTONE_COLUMNS} WHERE id = ?1 AND user_id = ?2"),
        params![milestone_id, user_id],
        milestone_from_row,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to load milestone: {e}")))?
    .ok_or_else(|| Error::NotFound(format!("Milestone {milestone_id}")))?
    .into_milestone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserStore;

    fn setup() -> (TimelineStore, i64) {
        let db = Database::in_memory().unwrap();
        let user = UserStore::new(db.clone())
            .get_or_create("timeline@example.org", "Tim")
            .unwrap();
        (TimelineStore::new(db), user.id)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn deadline(college: &str, on: &str) -> NewDeadline {
        NewDeadline {
            college_name: college.into(),
            deadline_type: "early_action".into(),
            deadline_date: date(on),
            requirements: serde_json::json!({"essays": 2}),
        }
    }

    #[test]
    fn adding_a_deadline_creates_a_reminder_a_week_before() {
        let (store, user_id) = setup();
        let added = store
            .add_deadline(user_id, &deadline("Rice University", "2026-11-01"))
            .unwrap();
        assert_eq!(added.status, TimelineStatus::Pending);
        assert_eq!(added.requirements["essays"], 2);

        let reminders = store
            .upcoming_reminders(user_id, date("2026-10-20"), 30)
            .unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].reminder_date, date("2026-10-25"));
        assert_eq!(reminders[0].deadline_id, added.id);
        assert_eq!(reminders[0].college_name, "Rice University");
    }

    #[test]
    fn reminders_outside_window_or_sent_are_skipped() {
        let (store, user_id) = setup();
        store
            .add_deadline(user_id, &deadline("Near", "2026-11-01"))
            .unwrap();
        store
            .add_deadline(user_id, &deadline("Far", "2027-01-15"))
            .unwrap();

        let today = date("2026-10-20");
        let reminders = store.upcoming_reminders(user_id, today, 14).unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].college_name, "Near");

        assert!(store.mark_reminder_sent(user_id, reminders[0].id).unwrap());
        assert!(!store.mark_reminder_sent(user_id, reminders[0].id).unwrap());
        assert!(store.upcoming_reminders(user_id, today, 14).unwrap().is_empty());
    }

    #[test]
    fn deadlines_are_sorted_and_status_updates_apply() {
        let (store, user_id) = setup();
        store
            .add_deadline(user_id, &deadline("Later", "2027-01-01"))
            .unwrap();
        let sooner = store
            .add_deadline(user_id, &deadline("Sooner", "2026-11-15"))
            .unwrap();

        let listed = store.deadlines(user_id).unwrap();
        assert_eq!(listed[0].college_name, "Sooner");

        let updated = store
            .update_deadline_status(user_id, sooner.id, TimelineStatus::InProgress)
            .unwrap();
        assert_eq!(updated.status, TimelineStatus::InProgress);
    }

    #[test]
    fn other_users_cannot_update_a_deadline() {
        let (store, user_id) = setup();
        let added = store
            .add_deadline(user_id, &deadline("Rice", "2026-11-01"))
            .unwrap();
        let err = store
            .update_deadline_status(user_id + 1, added.id, TimelineStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn completing_a_milestone_stamps_and_reopening_clears() {
        let (store, user_id) = setup();
        let milestone = store
            .add_milestone(
                user_id,
                &NewMilestone {
                    title: "Finish Common App essay".into(),
                    description: String::new(),
                    category: default_category(),
                    priority: "high".into(),
                    due_date: date("2026-12-01"),
                },
            )
            .unwrap();
        assert!(milestone.completed_at.is_none());

        let done = store
            .update_milestone_status(user_id, milestone.id, TimelineStatus::Completed)
            .unwrap();
        assert!(done.completed_at.is_some());

        let reopened = store
            .update_milestone_status(user_id, milestone.id, TimelineStatus::InProgress)
            .unwrap();
        assert!(reopened.completed_at.is_none());
        assert_eq!(store.count_goals(user_id).unwrap(), 1);
    }

    #[test]
    fn status_parse_rejects_unknown_values() {
        assert_eq!(
            TimelineStatus::parse("in_progress").unwrap(),
            TimelineStatus::InProgress
        );
        assert!(matches!(
            TimelineStatus::parse("done"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn oversized_reminder_window_is_rejected() {
        let (store, user_id) = setup();
        for days in [MAX_REMINDER_WINDOW_DAYS + 1, 100_000_000, i64::MAX] {
            assert!(matches!(
                store.upcoming_reminders(user_id, date("2026-10-19"), days),
                Err(Error::Validation(_))
            ));
        }
        assert!(
            store
                .upcoming_reminders(user_id, date("2026-10-19"), MAX_REMINDER_WINDOW_DAYS)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn deadline_at_calendar_floor_is_rejected() {
        let (store, user_id) = setup();
        let mut early = deadline("Ancient College", "2026-01-01");
        early.deadline_date = NaiveDate::MIN;

        assert!(matches!(
            store.add_deadline(user_id, &early),
            Err(Error::Validation(_))
        ));
        assert!(store.deadlines(user_id).unwrap().is_empty());
    }
}
