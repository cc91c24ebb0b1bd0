use compass_common::{Error, Result};
use rusqlite::Connection;

pub const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    gpa REAL,
    interests TEXT NOT NULL DEFAULT '[]',
    activities TEXT NOT NULL DEFAULT '[]',
    target_majors TEXT NOT NULL DEFAULT '[]',
    target_schools TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
    role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'debug')),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);

CREATE TABLE IF NOT EXISTS plan_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    activity_text TEXT NOT NULL,
    category TEXT NOT NULL,
    grade_year TEXT NOT NULL,
    url TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS college_matches (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS application_deadlines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    college_name TEXT NOT NULL,
    deadline_type TEXT NOT NULL,
    deadline_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    requirements TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS timeline_milestones (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT 'general',
    priority TEXT NOT NULL DEFAULT 'medium',
    due_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    completed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deadline_reminders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    deadline_id INTEGER NOT NULL REFERENCES application_deadlines(id) ON DELETE CASCADE,
    reminder_date TEXT NOT NULL,
    reminder_type TEXT NOT NULL DEFAULT 'one_week',
    sent INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_reminders_due ON deadline_reminders(user_id, reminder_date)
    WHERE sent = 0;

CREATE TABLE IF NOT EXISTS achievements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL,
    icon_name TEXT NOT NULL DEFAULT '',
    points INTEGER NOT NULL DEFAULT 0,
    category TEXT NOT NULL,
    requirements TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS user_achievements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    achievement_id INTEGER NOT NULL REFERENCES achievements(id) ON DELETE CASCADE,
    progress TEXT NOT NULL DEFAULT '{}',
    completed INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,
    UNIQUE (user_id, achievement_id)
);

CREATE TABLE IF NOT EXISTS institutions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    unitid INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL,
    city TEXT,
    state TEXT,
    zip TEXT,
    control TEXT,
    acceptance_rate REAL,
    tuition REAL,
    website TEXT
);

CREATE INDEX IF NOT EXISTS idx_institutions_state ON institutions(state);

CREATE TABLE IF NOT EXISTS user_favorite_institutions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    institution_id INTEGER NOT NULL REFERENCES institutions(id) ON DELETE CASCADE,
    UNIQUE (user_id, institution_id)
);

CREATE TABLE IF NOT EXISTS internship_programs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    organization TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    subject_areas TEXT NOT NULL DEFAULT '[]',
    grade_levels TEXT NOT NULL DEFAULT '[]',
    deadline TEXT,
    url TEXT,
    is_paid INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS internship_applications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    program_id INTEGER NOT NULL REFERENCES internship_programs(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'interested',
    application_date TEXT,
    notes TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL,
    UNIQUE (user_id, program_id)
);
";

/// Default achievement catalog. `INSERT OR IGNORE` keeps seeding idempotent.
pub const SEED_ACHIEVEMENTS: &str = r#"
INSERT OR IGNORE INTO achievements (name, description, icon_name, points, category, requirements)
VALUES
    ('Profile Pioneer', 'Complete your student profile with all information', 'profile', 100, 'profile',
     '{"profile_fields":["gpa","interests","activities","target_majors","target_schools"]}'),
    ('Chat Champion', 'Have 5 meaningful conversations with the AI counselor', 'chat', 150, 'engagement',
     '{"chat_sessions":5}'),
    ('Goal Getter', 'Set and track 3 college application goals', 'target', 200, 'planning',
     '{"goals_set":3}');
"#;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_V1)
        .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
    conn.execute_batch(SEED_ACHIEVEMENTS)
        .map_err(|e| Error::Database(format!("failed to seed achievements: {e}")))?;
    Ok(())
}
