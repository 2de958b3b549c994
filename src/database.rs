use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Category, ChatSession, Lno, Story, Task, Theme, UserProfile};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Failed to create database directory: {0}")]
    DirectoryError(String),
    #[error("Failed to encode column: {0}")]
    EncodeError(#[from] serde_json::Error),
    #[error("No authenticated user")]
    NotAuthenticated,
}

/// Relational store for eras, stories, tasks, profiles and chat sessions.
///
/// Every row carries the owning `user_id`; reads, upserts and deletes are
/// all scoped by it.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new database connection and initialize the schema
    pub fn new(path: &str) -> Result<Self, DatabaseError> {
        let db_path = PathBuf::from(path);

        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::DirectoryError(e.to_string()))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::from_connection(conn)
    }

    /// Fresh private database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize the database schema (tables and indexes)
    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS profiles (
                id              TEXT PRIMARY KEY,
                display_name    TEXT,
                created_at      TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS themes (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                title           TEXT NOT NULL,
                description     TEXT NOT NULL DEFAULT '',
                start_date      TEXT NOT NULL,
                end_date        TEXT NOT NULL,
                style           TEXT NOT NULL,
                completed       INTEGER DEFAULT 0,
                created_at      TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS stories (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                theme_id        TEXT REFERENCES themes(id) ON DELETE SET NULL,
                title           TEXT NOT NULL,
                description     TEXT,
                created_at      TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id                  TEXT PRIMARY KEY,
                user_id             TEXT NOT NULL,
                theme_id            TEXT NOT NULL REFERENCES themes(id) ON DELETE CASCADE,
                story_id            TEXT REFERENCES stories(id) ON DELETE SET NULL,
                title               TEXT NOT NULL,
                description         TEXT,
                category            TEXT NOT NULL,
                due_date            TEXT NOT NULL,
                estimated_minutes   INTEGER NOT NULL DEFAULT 30,
                completed           INTEGER DEFAULT 0,
                is_ai_generated     INTEGER DEFAULT 0,
                subtasks            TEXT NOT NULL DEFAULT '[]'
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS chat_sessions (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                title           TEXT NOT NULL,
                messages        TEXT NOT NULL DEFAULT '[]',
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_themes_user_id ON themes(user_id)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_stories_user_id ON stories(user_id)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_theme_id ON tasks(theme_id)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chat_sessions_user_id ON chat_sessions(user_id)",
            [],
        )?;

        self.migrate_additive_columns()?;

        Ok(())
    }

    /// Columns added after the first schema; existing rows are not backfilled
    fn migrate_additive_columns(&self) -> Result<(), DatabaseError> {
        fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
            let mut stmt = conn.prepare("SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2")?;
            let count: i64 = stmt.query_row(params![table, column], |row| row.get(0))?;
            Ok(count > 0)
        }

        let additions = [
            ("tasks", "is_important", "INTEGER DEFAULT 0"),
            ("tasks", "lno_type", "TEXT"),
            ("tasks", "remaining_minutes", "INTEGER"),
            ("stories", "is_important", "INTEGER DEFAULT 0"),
        ];
        for (table, column, decl) in additions {
            if !column_exists(&self.conn, table, column)? {
                tracing::debug!(table, column, "adding column");
                self.conn
                    .execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl), [])?;
            }
        }

        Ok(())
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // Profiles

    pub fn get_profile(&self, owner_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        if owner_id.is_empty() {
            return Ok(None);
        }
        let mut stmt = self
            .conn
            .prepare("SELECT id, display_name, created_at FROM profiles WHERE id = ?1")?;
        let result = stmt.query_row(params![owner_id], |row| {
            Ok(UserProfile {
                id: row.get(0)?,
                display_name: row.get(1)?,
                created_at: datetime_col(row, 2)?,
            })
        });
        match result {
            Ok(profile) => Ok(Some(profile)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::from(e)),
        }
    }

    pub fn save_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        require_owner(&profile.id)?;
        self.conn.execute(
            "INSERT INTO profiles (id, display_name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
            params![profile.id, profile.display_name, profile.created_at.to_rfc3339()],
        )?;
        Ok(())
    }

    // Themes

    fn row_to_theme(row: &Row) -> Result<Theme, rusqlite::Error> {
        Ok(Theme {
            id: uuid_col(row, 0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            start_date: date_col(row, 3)?,
            end_date: date_col(row, 4)?,
            style: json_col(row, 5)?,
            completed: row.get::<_, i64>(6)? != 0,
            created_at: datetime_col(row, 7)?,
        })
    }

    /// All eras of the owner, oldest first
    pub fn get_themes(&self, owner_id: &str) -> Result<Vec<Theme>, DatabaseError> {
        if owner_id.is_empty() {
            tracing::debug!("get_themes without an owner");
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, start_date, end_date, style, completed, created_at
             FROM themes WHERE user_id = ?1 ORDER BY created_at ASC",
        )?;
        let themes = stmt
            .query_map(params![owner_id], Self::row_to_theme)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(themes)
    }

    /// Upsert by id; rows owned by someone else are left untouched
    pub fn save_themes(&self, owner_id: &str, themes: &[Theme]) -> Result<(), DatabaseError> {
        require_owner(owner_id)?;
        let tx = self.conn.unchecked_transaction()?;
        for theme in themes {
            tx.execute(
                "INSERT INTO themes (id, user_id, title, description, start_date, end_date, style, completed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    start_date = excluded.start_date,
                    end_date = excluded.end_date,
                    style = excluded.style,
                    completed = excluded.completed
                 WHERE themes.user_id = excluded.user_id",
                params![
                    theme.id.to_string(),
                    owner_id,
                    theme.title,
                    theme.description,
                    format_date(theme.start_date),
                    format_date(theme.end_date),
                    serde_json::to_string(&theme.style)?,
                    theme.completed,
                    theme.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Tasks of the era go with it; stories become global
    pub fn delete_theme(&self, owner_id: &str, id: Uuid) -> Result<(), DatabaseError> {
        require_owner(owner_id)?;
        self.conn.execute(
            "DELETE FROM themes WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), owner_id],
        )?;
        Ok(())
    }

    // Stories

    fn row_to_story(row: &Row) -> Result<Story, rusqlite::Error> {
        Ok(Story {
            id: uuid_col(row, 0)?,
            theme_id: opt_uuid_col(row, 1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            is_important: row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
            created_at: datetime_col(row, 5)?,
        })
    }

    pub fn get_stories(&self, owner_id: &str) -> Result<Vec<Story>, DatabaseError> {
        if owner_id.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT id, theme_id, title, description, is_important, created_at
             FROM stories WHERE user_id = ?1 ORDER BY created_at ASC",
        )?;
        let stories = stmt
            .query_map(params![owner_id], Self::row_to_story)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stories)
    }

    pub fn save_stories(&self, owner_id: &str, stories: &[Story]) -> Result<(), DatabaseError> {
        require_owner(owner_id)?;
        let tx = self.conn.unchecked_transaction()?;
        for story in stories {
            tx.execute(
                "INSERT INTO stories (id, user_id, theme_id, title, description, is_important, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    theme_id = excluded.theme_id,
                    title = excluded.title,
                    description = excluded.description,
                    is_important = excluded.is_important
                 WHERE stories.user_id = excluded.user_id",
                params![
                    story.id.to_string(),
                    owner_id,
                    story.theme_id.map(|id| id.to_string()),
                    story.title,
                    story.description,
                    story.is_important,
                    story.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_story(&self, owner_id: &str, id: Uuid) -> Result<(), DatabaseError> {
        require_owner(owner_id)?;
        self.conn.execute(
            "DELETE FROM stories WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), owner_id],
        )?;
        Ok(())
    }

    // Tasks

    fn row_to_task(row: &Row) -> Result<Task, rusqlite::Error> {
        let category: String = row.get(6)?;
        let lno: Option<String> = row.get(12)?;
        Ok(Task {
            id: uuid_col(row, 0)?,
            theme_id: uuid_col(row, 1)?,
            story_id: opt_uuid_col(row, 2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            due_date: row.get(5)?,
            category: Category::parse_lenient(&category),
            estimated_minutes: row.get(7)?,
            completed: row.get::<_, i64>(8)? != 0,
            ai_generated: row.get::<_, i64>(9)? != 0,
            subtasks: json_col(row, 10)?,
            is_important: row.get::<_, Option<i64>>(11)?.unwrap_or(0) != 0,
            lno: lno.and_then(|raw| raw.parse::<Lno>().ok()),
            remaining_minutes: row.get(13)?,
        })
    }

    pub fn get_tasks(&self, owner_id: &str) -> Result<Vec<Task>, DatabaseError> {
        if owner_id.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT id, theme_id, story_id, title, description, due_date, category, estimated_minutes,
                    completed, is_ai_generated, subtasks, is_important, lno_type, remaining_minutes
             FROM tasks WHERE user_id = ?1 ORDER BY due_date ASC, rowid ASC",
        )?;
        let tasks = stmt
            .query_map(params![owner_id], Self::row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn save_tasks(&self, owner_id: &str, tasks: &[Task]) -> Result<(), DatabaseError> {
        require_owner(owner_id)?;
        let tx = self.conn.unchecked_transaction()?;
        for task in tasks {
            tx.execute(
                "INSERT INTO tasks (id, user_id, theme_id, story_id, title, description, category, due_date,
                                    estimated_minutes, completed, is_ai_generated, subtasks, is_important,
                                    lno_type, remaining_minutes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                    theme_id = excluded.theme_id,
                    story_id = excluded.story_id,
                    title = excluded.title,
                    description = excluded.description,
                    category = excluded.category,
                    due_date = excluded.due_date,
                    estimated_minutes = excluded.estimated_minutes,
                    completed = excluded.completed,
                    is_ai_generated = excluded.is_ai_generated,
                    subtasks = excluded.subtasks,
                    is_important = excluded.is_important,
                    lno_type = excluded.lno_type,
                    remaining_minutes = excluded.remaining_minutes
                 WHERE tasks.user_id = excluded.user_id",
                params![
                    task.id.to_string(),
                    owner_id,
                    task.theme_id.to_string(),
                    task.story_id.map(|id| id.to_string()),
                    task.title,
                    task.description,
                    task.category.as_str(),
                    task.due_date,
                    task.estimated_minutes,
                    task.completed,
                    task.ai_generated,
                    serde_json::to_string(&task.subtasks)?,
                    task.is_important,
                    task.lno.map(|lno| lno.as_str()),
                    task.remaining_minutes,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_task(&self, owner_id: &str, id: Uuid) -> Result<(), DatabaseError> {
        require_owner(owner_id)?;
        self.conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), owner_id],
        )?;
        Ok(())
    }

    // Chat sessions

    /// Most recently updated first
    pub fn get_chat_sessions(&self, owner_id: &str) -> Result<Vec<ChatSession>, DatabaseError> {
        if owner_id.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT id, title, messages, created_at, updated_at
             FROM chat_sessions WHERE user_id = ?1 ORDER BY updated_at DESC",
        )?;
        let sessions = stmt
            .query_map(params![owner_id], |row| {
                Ok(ChatSession {
                    id: uuid_col(row, 0)?,
                    title: row.get(1)?,
                    messages: json_col(row, 2)?,
                    created_at: datetime_col(row, 3)?,
                    updated_at: datetime_col(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    pub fn save_chat_session(&self, owner_id: &str, session: &ChatSession) -> Result<(), DatabaseError> {
        require_owner(owner_id)?;
        self.conn.execute(
            "INSERT INTO chat_sessions (id, user_id, title, messages, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                messages = excluded.messages,
                updated_at = excluded.updated_at
             WHERE chat_sessions.user_id = excluded.user_id",
            params![
                session.id.to_string(),
                owner_id,
                session.title,
                serde_json::to_string(&session.messages)?,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_chat_session(&self, owner_id: &str, id: Uuid) -> Result<(), DatabaseError> {
        require_owner(owner_id)?;
        self.conn.execute(
            "DELETE FROM chat_sessions WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), owner_id],
        )?;
        Ok(())
    }
}

fn require_owner(owner_id: &str) -> Result<(), DatabaseError> {
    if owner_id.trim().is_empty() {
        return Err(DatabaseError::NotAuthenticated);
    }
    Ok(())
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_col(row: &Row, idx: usize) -> Result<Uuid, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_uuid_col(row: &Row, idx: usize) -> Result<Option<Uuid>, rusqlite::Error> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn date_col(row: &Row, idx: usize) -> Result<NaiveDate, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

fn datetime_col(row: &Row, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> Result<T, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}
