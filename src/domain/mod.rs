//! Domain types for the generation pipeline.
//!
//! This module contains the core data structures:
//! - Course: course records, chapters and the course status state machine
//! - PracticeTest: practice tests and the question mix arithmetic
//! - StudyContent: flashcard and quiz records
//! - Events: immutable run log entries (step checkpoints)
//! - Run: workflow run state derived from events

pub mod course;
pub mod events;
pub mod run;
pub mod study_content;

// Re-export commonly used types
pub use course::{Chapter, ChapterNotesRecord, CourseRecord, CourseStatus, Topic};
pub use events::{RunEvent, RunEventType, StepStatus};
pub use practice_test::{
    chapter_test_id, PracticeTestRecord, Question, QuestionMix, TestStatus, TestType,
    CHAPTER_TEST_QUESTIONS, MAX_TEST_QUESTIONS,
};
pub use run::{Run, RunState};
pub use study_content::{
    ContentStatus, Flashcard, QuizContent, QuizQuestion, StudyType, StudyTypeContentRecord,
};

/// A learner in the user directory
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}
