use compass_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pool::Database;
use crate::{json_list, parse_date, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Interested,
    InProgress,
    Submitted,
    Accepted,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Interested => "interested",
            ApplicationStatus::InProgress => "in_progress",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "interested" => Ok(ApplicationStatus::Interested),
            "in_progress" => Ok(ApplicationStatus::InProgress),
            "submitted" => Ok(ApplicationStatus::Submitted),
            "accepted" => Ok(ApplicationStatus::Accepted),
            "rejected" => Ok(ApplicationStatus::Rejected),
            other => Err(Error::Validation(format!(
                "unknown application status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InternshipProgram {
    pub id: i64,
    pub name: String,
    pub organization: String,
    pub description: String,
    pub subject_areas: Vec<String>,
    pub grade_levels: Vec<String>,
    pub deadline: Option<chrono::NaiveDate>,
    pub url: Option<String>,
    pub is_paid: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProgram {
    pub name: String,
    pub organization: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subject_areas: Vec<String>,
    #[serde(default)]
    pub grade_levels: Vec<String>,
    #[serde(default)]
    pub deadline: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub is_paid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InternshipApplication {
    pub id: i64,
    pub user_id: i64,
    pub program: InternshipProgram,
    pub status: ApplicationStatus,
    pub application_date: Option<chrono::DateTime<chrono::Utc>>,
    pub notes: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct InternshipStore {
    db: Database,
}

impl InternshipStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn add_program(&self, program: &NewProgram) -> Result<i64> {
        if program.name.trim().is_empty() || program.organization.trim().is_empty() {
            return Err(Error::Validation(
                "Program name and organization are required".into(),
            ));
        }
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO internship_programs
                (name, organization, description, subject_areas, grade_levels, deadline, url, is_paid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                program.name,
                program.organization,
                program.description,
                serde_json::to_string(&program.subject_areas)?,
                serde_json::to_string(&program.grade_levels)?,
                program.deadline.map(|d| d.to_string()),
                program.url,
                program.is_paid,
            ],
        )
        .map_err(|e| Error::Database(format!("failed to add internship program: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// Programs ordered by deadline (undated last), optionally filtered to a
    /// subject area (case-insensitive).
    pub fn list_programs(&self, subject: Option<&str>) -> Result<Vec<InternshipProgram>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{PROGRAM_COLUMNS} ORDER BY deadline IS NULL, deadline ASC, name ASC"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare program query: {e}")))?;
        let rows = stmt
            .query_map([], program_from_row)
            .map_err(|e| Error::Database(format!("failed to load programs: {e}")))?;

        let subject = subject
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let mut programs = Vec::new();
        for row in rows {
            let program = row
                .map_err(|e| Error::Database(format!("failed to read program row: {e}")))?
                .into_program()?;
            let matches = match &subject {
                Some(subject) => program
                    .subject_areas
                    .iter()
                    .any(|area| area.to_lowercase() == *subject),
                None => true,
            };
            if matches {
                programs.push(program);
            }
        }
        Ok(programs)
    }

    /// Record interest in a program. Repeating the call keeps the existing application.
    pub fn mark_interested(&self, user_id: i64, program_id: i64) -> Result<InternshipApplication> {
        let conn = self.db.conn()?;
        load_program(&conn, program_id)?;

        conn.execute(
            "INSERT OR IGNORE INTO internship_applications (user_id, program_id, status, updated_at)
             VALUES (?1, ?2, 'interested', ?3)",
            params![user_id, program_id, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Database(format!("failed to record interest: {e}")))?;

        let application_id: i64 = conn
            .query_row(
                "SELECT id FROM internship_applications WHERE user_id = ?1 AND program_id = ?2",
                params![user_id, program_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to load application: {e}")))?;
        load_application(&conn, user_id, application_id)
    }

    pub fn list_applications(&self, user_id: i64) -> Result<Vec<InternshipApplication>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id FROM internship_applications WHERE user_id = ?1 ORDER BY updated_at DESC, id DESC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare application query: {e}")))?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::Database(format!("failed to list applications: {e}")))?;

        let mut application_ids = Vec::new();
        for id in ids {
            application_ids
                .push(id.map_err(|e| Error::Database(format!("failed to read application row: {e}")))?);
        }

        application_ids
            .into_iter()
            .map(|id| load_application(&conn, user_id, id))
            .collect()
    }

    /// Change status and optionally notes. Moving to `submitted` stamps the application date.
    pub fn update_application(
        &self,
        user_id: i64,
        application_id: i64,
        status: ApplicationStatus,
        notes: Option<&str>,
    ) -> Result<InternshipApplication> {
        let now = chrono::Utc::now().to_rfc3339();
        let submitted_at = (status == ApplicationStatus::Submitted).then(|| now.clone());

        let conn = self.db.conn()?;
        let updated = conn
            .execute(
                "UPDATE internship_applications SET
                    status = ?1,
                    notes = COALESCE(?2, notes),
                    application_date = COALESCE(?3, application_date),
                    updated_at = ?4
                 WHERE id = ?5 AND user_id = ?6",
                params![status.as_str(), notes, submitted_at, now, application_id, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to update application: {e}")))?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Application {application_id}")));
        }
        info!(
            "application {} for user {} moved to {}",
            application_id,
            user_id,
            status.as_str()
        );
        load_application(&conn, user_id, application_id)
    }
}

const PROGRAM_COLUMNS: &str = "SELECT id, name, organization, description, subject_areas,
        grade_levels, deadline, url, is_paid
 FROM internship_programs";

struct ProgramRow {
    id: i64,
    name: String,
    organization: String,
    description: String,
    subject_areas: String,
    grade_levels: String,
    deadline: Option<String>,
    url: Option<String>,
    is_paid: bool,
}

impl ProgramRow {
    fn into_program(self) -> Result<InternshipProgram> {
        Ok(InternshipProgram {
            id: self.id,
            name: self.name,
            organization: self.organization,
            description: self.description,
            subject_areas: json_list(&self.subject_areas),
            grade_levels: json_list(&self.grade_levels),
            deadline: self.deadline.as_deref().map(parse_date).transpose()?,
            url: self.url,
            is_paid: self.is_paid,
        })
    }
}

fn program_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProgramRow> {
    Ok(ProgramRow {
        id: row.get(0)?,
        name: row.get(1)?,
        organization: row.get(2)?,
        description: row.get(3)?,
        subject_areas: row.get(4)?,
        grade_levels: row.get(5)?,
        deadline: row.get(6)?,
        url: row.get(7)?,
        is_paid: row.get(8)?,
    })
}

fn load_program(conn: &Connection, program_id: i64) -> Result<InternshipProgram> {
    conn.query_row(
        &format!("{PROGRAM_COLUMNS} WHERE id = ?1"),
        params![program_id],
        program_from_row,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to load program: {e}")))?
    .ok_or_else(|| Error::NotFound(format!("Internship program {program_id}")))?
    .into_program()
}

fn load_application(
    conn: &Connection,
    user_id: i64,
    application_id: i64,
) -> Result<InternshipApplication> {
    let row: Option<(i64, String, Option<String>, String, String)> = conn
        .query_row(
            "SELECT program_id, status, application_date, notes, updated_at
             FROM internship_applications WHERE id = ?1 AND user_id = ?2",
            params![application_id, user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to load application: {e}")))?;
    let (program_id, status, application_date, notes, updated_at) =
        row.ok_or_else(|| Error::NotFound(format!("Application {application_id}")))?;

    Ok(InternshipApplication {
        id: application_id,
        user_id,
        program: load_program(conn, program_id)?,
        status: ApplicationStatus::parse(&status)?,
        application_date: application_date.as_deref().map(parse_timestamp),
        notes,
        updated_at: parse_timestamp(&updated_at),
    })
}
