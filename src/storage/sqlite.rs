//! SQLite-backed content store and user directory.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::info;

use super::{ContentStore, InsertOutcome, StatusChange, StorageError, UserDirectory};
use crate::domain::{
    ChapterNotesRecord, ContentStatus, CourseRecord, CourseStatus, PracticeTestRecord, Question,
    StudyTypeContentRecord, User,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS courses (
    course_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    chapters TEXT,
    created_for TEXT
);

CREATE TABLE IF NOT EXISTS chapter_notes (
    course_id TEXT NOT NULL,
    chapter_id INTEGER NOT NULL,
    notes TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (course_id, chapter_id)
);

CREATE TABLE IF NOT EXISTS practice_tests (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    chapter_id INTEGER,
    test_type TEXT NOT NULL,
    questions TEXT NOT NULL,
    mcq_count INTEGER NOT NULL,
    true_false_count INTEGER NOT NULL,
    descriptive_count INTEGER NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS study_type_content (
    id TEXT PRIMARY KEY,
    course_id TEXT NOT NULL,
    study_type TEXT NOT NULL,
    content TEXT,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT
);
";

const PRACTICE_TEST_COLUMNS: &str = "id, user_id, course_id, chapter_id, test_type, questions, \
     mcq_count, true_false_count, descriptive_count, status";

/// Content store on a single SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

/// Practice test row before enum and JSON decoding
struct PracticeTestRow {
    id: String,
    user_id: String,
    course_id: String,
    chapter_id: Option<u32>,
    test_type: String,
    questions: String,
    mcq_count: u32,
    true_false_count: u32,
    descriptive_count: u32,
    status: String,
}

impl PracticeTestRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            chapter_id: row.get(3)?,
            test_type: row.get(4)?,
            questions: row.get(5)?,
            mcq_count: row.get(6)?,
            true_false_count: row.get(7)?,
            descriptive_count: row.get(8)?,
            status: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<PracticeTestRecord, StorageError> {
        Ok(PracticeTestRecord {
            id: self.id,
            user_id: self.user_id,
            course_id: self.course_id,
            chapter_id: self.chapter_id,
            test_type: self.test_type.parse().map_err(StorageError::Corrupt)?,
            questions: serde_json::from_str(&self.questions)?,
            mcq_count: self.mcq_count,
            true_false_count: self.true_false_count,
            descriptive_count: self.descriptive_count,
            status: self.status.parse().map_err(StorageError::Corrupt)?,
        })
    }
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Backend(e.to_string()))?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        info!(path = %path.display(), "Opened content database");
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create or replace a course (the CRUD layer's job, used for seeding)
    pub async fn upsert_course(&self, course: &CourseRecord) -> Result<(), StorageError> {
        let chapters = course
            .chapters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO courses (course_id, status, chapters, created_for)
             VALUES (?1, ?2, ?3, ?4)",
            params![course.course_id, course.status.as_str(), chapters, course.created_for],
        )?;
        Ok(())
    }

    pub async fn course(&self, course_id: &str) -> Result<Option<CourseRecord>, StorageError> {
        let db = self.db.lock().await;
        let row: Option<(String, String, Option<String>, Option<String>)> = db
            .query_row(
                "SELECT course_id, status, chapters, created_for FROM courses WHERE course_id = ?1",
                params![course_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((course_id, status, chapters, created_for)) = row else {
            return Ok(None);
        };

        Ok(Some(CourseRecord {
            course_id,
            status: status.parse().map_err(StorageError::Corrupt)?,
            chapters: chapters.map(|c| serde_json::from_str(&c)).transpose()?,
            created_for,
        }))
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO users (id, email, name) VALUES (?1, ?2, ?3)",
            params![user.id, user.email, user.name],
        )?;
        Ok(())
    }

    /// Pre-create a study content placeholder
    pub async fn create_study_content(&self, record: &StudyTypeContentRecord) -> Result<(), StorageError> {
        let content = record.content.as_ref().map(serde_json::to_string).transpose()?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO study_type_content (id, course_id, study_type, content, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.course_id,
                record.study_type.as_str(),
                content,
                record.status.as_str()
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn course_status(&self, course_id: &str) -> Result<Option<CourseStatus>, StorageError> {
        let db = self.db.lock().await;
        let status: Option<String> = db
            .query_row(
                "SELECT status FROM courses WHERE course_id = ?1",
                params![course_id],
                |row| row.get(0),
            )
            .optional()?;

        status
            .map(|s| s.parse().map_err(StorageError::Corrupt))
            .transpose()
    }

    async fn transition_course_status(
        &self,
        course_id: &str,
        from: &[CourseStatus],
        to: CourseStatus,
    ) -> Result<StatusChange, StorageError> {
        let db = self.db.lock().await;

        for expected in from {
            let updated = db.execute(
                "UPDATE courses SET status = ?1 WHERE course_id = ?2 AND status = ?3",
                params![to.as_str(), course_id, expected.as_str()],
            )?;
            if updated == 1 {
                return Ok(StatusChange::Applied);
            }
        }

        let actual: Option<String> = db
            .query_row(
                "SELECT status FROM courses WHERE course_id = ?1",
                params![course_id],
                |row| row.get(0),
            )
            .optional()?;

        match actual {
            Some(actual) => Ok(StatusChange::Conflict {
                actual: actual.parse().map_err(StorageError::Corrupt)?,
            }),
            None => Err(StorageError::NotFound {
                table: "courses",
                key: course_id.to_string(),
            }),
        }
    }

    async fn insert_chapter_notes(&self, record: &ChapterNotesRecord) -> Result<InsertOutcome, StorageError> {
        let db = self.db.lock().await;
        let inserted = db.execute(
            "INSERT OR IGNORE INTO chapter_notes (course_id, chapter_id, notes) VALUES (?1, ?2, ?3)",
            params![record.course_id, record.chapter_id, record.notes],
        )?;

        Ok(if inserted == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    async fn chapter_notes(&self, course_id: &str) -> Result<Vec<ChapterNotesRecord>, StorageError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT course_id, chapter_id, notes FROM chapter_notes WHERE course_id = ?1 ORDER BY chapter_id",
        )?;

        let rows = stmt.query_map(params![course_id], |row| {
            Ok(ChapterNotesRecord {
                course_id: row.get(0)?,
                chapter_id: row.get(1)?,
                notes: row.get(2)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn insert_practice_test(&self, record: &PracticeTestRecord) -> Result<InsertOutcome, StorageError> {
        let questions = serde_json::to_string(&record.questions)?;

        let db = self.db.lock().await;
        let inserted = db.execute(
            &format!(
                "INSERT OR IGNORE INTO practice_tests ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                PRACTICE_TEST_COLUMNS
            ),
            params![
                record.id,
                record.user_id,
                record.course_id,
                record.chapter_id,
                record.test_type.as_str(),
                questions,
                record.mcq_count,
                record.true_false_count,
                record.descriptive_count,
                record.status.as_str()
            ],
        )?;

        Ok(if inserted == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    async fn complete_practice_test(&self, test_id: &str, questions: &[Question]) -> Result<(), StorageError> {
        let questions = serde_json::to_string(questions)?;

        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE practice_tests SET questions = ?1, status = 'ready' WHERE id = ?2",
            params![questions, test_id],
        )?;

        if updated == 0 {
            return Err(StorageError::NotFound {
                table: "practice_tests",
                key: test_id.to_string(),
            });
        }
        Ok(())
    }

    async fn practice_test(&self, test_id: &str) -> Result<Option<PracticeTestRecord>, StorageError> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                &format!("SELECT {} FROM practice_tests WHERE id = ?1", PRACTICE_TEST_COLUMNS),
                params![test_id],
                PracticeTestRow::from_row,
            )
            .optional()?;

        row.map(PracticeTestRow::into_record).transpose()
    }

    async fn practice_tests(&self, course_id: &str) -> Result<Vec<PracticeTestRecord>, StorageError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM practice_tests WHERE course_id = ?1 ORDER BY chapter_id",
            PRACTICE_TEST_COLUMNS
        ))?;

        let rows = stmt.query_map(params![course_id], PracticeTestRow::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.into_record()?);
        }
        Ok(results)
    }

    async fn complete_study_content(
        &self,
        record_id: &str,
        content: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let content = serde_json::to_string(content)?;

        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE study_type_content SET content = ?1, status = ?2 WHERE id = ?3",
            params![content, ContentStatus::Ready.as_str(), record_id],
        )?;

        if updated == 0 {
            return Err(StorageError::NotFound {
                table: "study_type_content",
                key: record_id.to_string(),
            });
        }
        Ok(())
    }

    async fn study_content(&self, record_id: &str) -> Result<Option<StudyTypeContentRecord>, StorageError> {
        let db = self.db.lock().await;
        let row: Option<(String, String, String, Option<String>, String)> = db
            .query_row(
                "SELECT id, course_id, study_type, content, status FROM study_type_content WHERE id = ?1",
                params![record_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        let Some((id, course_id, study_type, content, status)) = row else {
            return Ok(None);
        };

        Ok(Some(StudyTypeContentRecord {
            id,
            course_id,
            study_type: study_type.parse().map_err(StorageError::Corrupt)?,
            content: content.map(|c| serde_json::from_str(&c)).transpose()?,
            status: status.parse().map_err(StorageError::Corrupt)?,
        }))
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let db = self.db.lock().await;
        let user = db
            .query_row(
                "SELECT id, email, name FROM users WHERE lower(email) = lower(?1)",
                params![email],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}
