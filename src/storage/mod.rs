//! Persistence capability.
//!
//! Course rows are created by the external CRUD layer; the pipeline inserts
//! notes and practice tests, completes pre-created records, and moves course
//! status with a compare-and-set so a stale writer cannot clobber a newer
//! state.

pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    ChapterNotesRecord, CourseStatus, PracticeTestRecord, Question, StudyTypeContentRecord, User,
};

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{table} record not found: {key}")]
    NotFound { table: &'static str, key: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Stored value could not be decoded: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}

/// Result of an insert into a table with a natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same key exists; nothing was written
    AlreadyExists,
}

/// Result of a compare-and-set on course status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum StatusChange {
    Applied,
    Conflict { actual: CourseStatus },
}

/// Records written and polled by the generation pipeline
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Current status of a course
    async fn course_status(&self, course_id: &str) -> Result<Option<CourseStatus>, StorageError>;

    /// Move a course to `to` if its current status is one of `from`
    async fn transition_course_status(
        &self,
        course_id: &str,
        from: &[CourseStatus],
        to: CourseStatus,
    ) -> Result<StatusChange, StorageError>;

    /// Insert notes; at most one record per (course, chapter)
    async fn insert_chapter_notes(&self, record: &ChapterNotesRecord) -> Result<InsertOutcome, StorageError>;

    /// All notes of a course, ordered by chapter
    async fn chapter_notes(&self, course_id: &str) -> Result<Vec<ChapterNotesRecord>, StorageError>;

    /// Insert a practice test; at most one record per id
    async fn insert_practice_test(&self, record: &PracticeTestRecord) -> Result<InsertOutcome, StorageError>;

    /// Fill a pre-created practice test and mark it ready
    async fn complete_practice_test(&self, test_id: &str, questions: &[Question]) -> Result<(), StorageError>;

    async fn practice_test(&self, test_id: &str) -> Result<Option<PracticeTestRecord>, StorageError>;

    /// All practice tests of a course
    async fn practice_tests(&self, course_id: &str) -> Result<Vec<PracticeTestRecord>, StorageError>;

    /// Fill a pre-created study content record and mark it ready
    async fn complete_study_content(
        &self,
        record_id: &str,
        content: &serde_json::Value,
    ) -> Result<(), StorageError>;

    async fn study_content(&self, record_id: &str) -> Result<Option<StudyTypeContentRecord>, StorageError>;
}

/// Lookup of learners by email
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;
}
