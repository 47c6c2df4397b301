//! Workflow definitions.
//!
//! - Chapter generation: notes and a practice test for every chapter of a
//!   course, driving the course status state machine
//! - Single-shot generation: flashcards, quizzes and standalone practice
//!   tests written into one pre-created record
//!
//! Workflows are plain async functions over a [`WorkflowContext`]. Every
//! call into the generation or persistence capability happens inside a
//! checkpointed step, so a workflow can be re-entered from the top after a
//! crash.

pub mod chapter_notes;
pub mod prompts;
pub mod single_shot;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::adapters::GenerationClient;
use crate::core::{StepError, StepExecutor};
use crate::domain::{CourseRecord, CourseStatus, QuestionMix, StudyType, TestType, MAX_TEST_QUESTIONS};
use crate::storage::{ContentStore, UserDirectory};

pub use chapter_notes::{ChapterReport, SkippedTest};
pub use single_shot::SingleShotReport;

/// Event name routed to the chapter generation workflow
pub const NOTES_GENERATE: &str = "notes.generate";
/// Event name routed to the flashcard/quiz workflow
pub const STUDY_TYPE_CONTENT: &str = "studytype.content";
/// Event name routed to the standalone practice test workflow
pub const PRACTICE_TEST_GENERATE: &str = "practice.test.generate";

/// External capabilities shared by every workflow run
#[derive(Clone)]
pub struct Services {
    pub generator: Arc<dyn GenerationClient>,
    pub store: Arc<dyn ContentStore>,
    pub users: Arc<dyn UserDirectory>,
}

/// Everything one workflow run needs
pub struct WorkflowContext<'a> {
    pub run_id: Uuid,
    pub executor: &'a StepExecutor,
    pub services: &'a Services,
}

/// Payload of `notes.generate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesRequest {
    pub course: CourseRecord,
}

/// Payload of `studytype.content`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyContentRequest {
    pub study_type: StudyType,
    pub prompt: String,
    pub course_id: String,
    pub record_id: String,
}

/// Payload of `practice.test.generate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeTestRequest {
    pub test_id: String,
    pub prompt: String,
    #[serde(default = "default_test_type")]
    pub test_type: TestType,
    #[serde(default)]
    pub mcq_count: u32,
    #[serde(default)]
    pub true_false_count: u32,
    #[serde(default)]
    pub descriptive_count: u32,
}

impl PracticeTestRequest {
    pub fn mix(&self) -> QuestionMix {
        QuestionMix::new(self.mcq_count, self.true_false_count, self.descriptive_count)
    }

    /// Reject counts no single test can hold
    pub fn validate(&self) -> Result<(), String> {
        match self.mix().checked_total() {
            Some(total) if total <= MAX_TEST_QUESTIONS => Ok(()),
            _ => Err(format!(
                "requested question counts exceed {} questions",
                MAX_TEST_QUESTIONS
            )),
        }
    }
}

fn default_test_type() -> TestType {
    TestType::Course
}

/// A typed request for one workflow run
#[derive(Debug, Clone)]
pub enum WorkflowRequest {
    ChapterNotes(NotesRequest),
    StudyContent(StudyContentRequest),
    PracticeTest(PracticeTestRequest),
}

impl WorkflowRequest {
    /// Inbound event name this request was parsed from
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChapterNotes(_) => NOTES_GENERATE,
            Self::StudyContent(_) => STUDY_TYPE_CONTENT,
            Self::PracticeTest(_) => PRACTICE_TEST_GENERATE,
        }
    }

    /// Key identifying the record the run writes to
    pub fn natural_key(&self) -> &str {
        match self {
            Self::ChapterNotes(req) => &req.course.course_id,
            Self::StudyContent(req) => &req.record_id,
            Self::PracticeTest(req) => &req.test_id,
        }
    }
}

/// What a finished run produced
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowReport {
    Chapters(ChapterReport),
    SingleShot(SingleShotReport),
}

impl WorkflowReport {
    pub fn as_chapters(&self) -> Option<&ChapterReport> {
        match self {
            Self::Chapters(report) => Some(report),
            Self::SingleShot(_) => None,
        }
    }

    pub fn as_single_shot(&self) -> Option<&SingleShotReport> {
        match self {
            Self::SingleShot(report) => Some(report),
            Self::Chapters(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Course {course_id} has malformed input: {reason}")]
    MalformedInput { course_id: String, reason: String },

    #[error("Course {course_id} is {actual}, expected one of {expected:?}")]
    StatusConflict {
        course_id: String,
        expected: Vec<CourseStatus>,
        actual: CourseStatus,
    },

    #[error("Request for {record_id} is invalid: {reason}")]
    InvalidRequest { record_id: String, reason: String },

    #[error(transparent)]
    Step(#[from] StepError),

    #[error("Run log unavailable: {0}")]
    RunLog(String),
}

/// Run the workflow matching a request
pub async fn run_workflow(
    ctx: &WorkflowContext<'_>,
    request: &WorkflowRequest,
) -> Result<WorkflowReport, WorkflowError> {
    match request {
        WorkflowRequest::ChapterNotes(req) => {
            chapter_notes::run(ctx, &req.course).await.map(WorkflowReport::Chapters)
        }
        WorkflowRequest::StudyContent(req) => {
            single_shot::run_study_content(ctx, req).await.map(WorkflowReport::SingleShot)
        }
        WorkflowRequest::PracticeTest(req) => {
            single_shot::run_practice_test(ctx, req).await.map(WorkflowReport::SingleShot)
        }
    }
}
