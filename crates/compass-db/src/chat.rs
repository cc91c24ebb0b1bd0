use compass_common::{ChatMessage, Error, MessageRole, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::parse_timestamp;
use crate::pool::Database;

const TITLE_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Chat sessions and their append-only message log.
#[derive(Clone)]
pub struct ChatStore {
    db: Database,
}

impl ChatStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create_session(&self, user_id: i64, first_message: &str) -> Result<ChatSession> {
        let conn = self.db.conn()?;
        insert_session(&conn, user_id, first_message)
    }

    /// Resolve the session a message belongs to.
    ///
    /// `None` starts a new session titled from `first_message`. An existing id
    /// must belong to `user_id`; otherwise it is reported as not found.
    pub fn ensure_session(
        &self,
        user_id: i64,
        session_id: Option<i64>,
        first_message: &str,
    ) -> Result<ChatSession> {
        let conn = self.db.conn()?;
        match session_id {
            Some(id) => owned_session(&conn, id, user_id),
            None => insert_session(&conn, user_id, first_message),
        }
    }

    pub fn session(&self, session_id: i64, user_id: i64) -> Result<ChatSession> {
        let conn = self.db.conn()?;
        owned_session(&conn, session_id, user_id)
    }

    pub fn append_message(
        &self,
        session_id: i64,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage> {
        let timestamp = chrono::Utc::now();
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role.as_str(), content, timestamp.to_rfc3339()],
        )
        .map_err(|e| Error::Database(format!("failed to append message: {e}")))?;

        Ok(ChatMessage {
            id: conn.last_insert_rowid(),
            session_id,
            role,
            content: content.to_string(),
            timestamp,
        })
    }

    /// Every message in a session, oldest first.
    pub fn messages(&self, session_id: i64) -> Result<Vec<ChatMessage>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, role, content, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY id ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;
        let rows = stmt
            .query_map(params![session_id], message_from_row)
            .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

        collect_messages(rows)
    }

    /// The user's latest conversational messages across sessions, oldest first.
    pub fn recent_messages_for_user(&self, user_id: i64, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT m.id, m.session_id, m.role, m.content, m.created_at
                 FROM messages m
                 JOIN chat_sessions s ON s.id = m.session_id
                 WHERE s.user_id = ?1 AND m.role != 'debug'
                 ORDER BY m.id DESC
                 LIMIT ?2",
            )
            .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], message_from_row)
            .map_err(|e| Error::Database(format!("failed to load history: {e}")))?;

        let mut messages = collect_messages(rows)?;
        // Query is DESC for efficient tail fetch; return in chronological order.
        messages.reverse();
        Ok(messages)
    }

    /// Sessions for a user, newest first.
    pub fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, title, created_at FROM chat_sessions
                 WHERE user_id = ?1 ORDER BY id DESC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare session query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id], session_from_row)
            .map_err(|e| Error::Database(format!("failed to list sessions: {e}")))?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(
                row.map_err(|e| Error::Database(format!("failed to read session row: {e}")))?,
            );
        }
        Ok(sessions)
    }

    pub fn count_sessions(&self, user_id: i64) -> Result<i64> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM chat_sessions WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to count sessions: {e}")))
    }
}

/// First 50 characters of the opening message, followed by `...`.
pub fn session_title(first_message: &str) -> String {
    let head: String = first_message.trim().chars().take(TITLE_CHARS).collect();
    format!("{head}...")
}

fn insert_session(conn: &Connection, user_id: i64, first_message: &str) -> Result<ChatSession> {
    let created_at = chrono::Utc::now();
    let title = session_title(first_message);
    conn.execute(
        "INSERT INTO chat_sessions (user_id, title, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, title, created_at.to_rfc3339()],
    )
    .map_err(|e| Error::Database(format!("failed to create chat session: {e}")))?;

    Ok(ChatSession {
        id: conn.last_insert_rowid(),
        user_id,
        title,
        created_at,
    })
}

fn owned_session(conn: &Connection, session_id: i64, user_id: i64) -> Result<ChatSession> {
    conn.query_row(
        "SELECT id, user_id, title, created_at FROM chat_sessions WHERE id = ?1 AND user_id = ?2",
        params![session_id, user_id],
        session_from_row,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to load chat session: {e}")))?
    .ok_or_else(|| Error::NotFound(format!("Chat session {session_id}")))
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSession> {
    let created_raw: String = row.get(3)?;
    Ok(ChatSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: parse_timestamp(&created_raw),
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role_raw: String = row.get(2)?;
    let created_raw: String = row.get(4)?;
    let role = MessageRole::parse(&role_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role,
        content: row.get(3)?,
        timestamp: parse_timestamp(&created_raw),
    })
}

fn collect_messages(
    rows: impl Iterator<Item = rusqlite::Result<ChatMessage>>,
) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row.map_err(|e| Error::Database(format!("failed to read message row: {e}")))?);
    }
    Ok(messages)
}
