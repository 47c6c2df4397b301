//! Chapter generation workflow.
//!
//! Drives `CourseRecord.status` through `Pending -> Generating -> {Ready | Error}`
//! and, for every chapter in order, generates study notes and a practice test.
//! Notes are mandatory: exhausting a notes step fails the run and leaves the
//! course `Generating`. Practice tests are best effort and every skipped test
//! is reported.

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use super::{prompts, WorkflowContext, WorkflowError};
use crate::adapters::GenerationClient;
use crate::core::{Step, StepOutcome};
use crate::domain::{
    Chapter, ChapterNotesRecord, CourseRecord, CourseStatus, PracticeTestRecord, Question,
    QuestionMix, User, CHAPTER_TEST_QUESTIONS,
};
use crate::storage::{ContentStore, InsertOutcome, StatusChange};

const MARK_ERROR_FROM: &[CourseStatus] =
    &[CourseStatus::Pending, CourseStatus::Generating, CourseStatus::Error];
const MARK_GENERATING_FROM: &[CourseStatus] = &[CourseStatus::Pending, CourseStatus::Generating];
const MARK_READY_FROM: &[CourseStatus] = &[CourseStatus::Generating, CourseStatus::Ready];

/// Outcome of a chapter generation run
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterReport {
    pub course_id: String,
    pub chapters: usize,
    pub notes_written: usize,
    pub tests_written: usize,
    pub skipped_tests: Vec<SkippedTest>,
}

/// A chapter whose practice test was not written
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTest {
    /// 1-based chapter id
    pub chapter_id: u32,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    QuestionGenerationFailed { error: String },
    NoLearnerEmail,
    UserNotFound { email: String },
    UserLookupFailed { error: String },
    InsertFailed { error: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuestionGenerationFailed { error } => write!(f, "question generation failed: {}", error),
            Self::NoLearnerEmail => write!(f, "course has no learner email"),
            Self::UserNotFound { email } => write!(f, "no user with email {}", email),
            Self::UserLookupFailed { error } => write!(f, "user lookup failed: {}", error),
            Self::InsertFailed { error } => write!(f, "insert failed: {}", error),
        }
    }
}

impl ChapterReport {
    fn new(course_id: &str, chapters: usize) -> Self {
        Self {
            course_id: course_id.to_string(),
            chapters,
            notes_written: 0,
            tests_written: 0,
            skipped_tests: Vec::new(),
        }
    }

    fn skip(&mut self, chapter_id: u32, reason: SkipReason) {
        warn!(chapter_id, reason = %reason, "Skipping chapter practice test");
        self.skipped_tests.push(SkippedTest { chapter_id, reason });
    }
}

/// Generate notes and practice tests for every chapter of a course
#[instrument(skip_all, fields(run_id = %ctx.run_id, course_id = %course.course_id))]
pub async fn run(ctx: &WorkflowContext<'_>, course: &CourseRecord) -> Result<ChapterReport, WorkflowError> {
    let course_id = course.course_id.as_str();
    let store = ctx.services.store.as_ref();

    let Some(chapters) = course.well_formed_chapters() else {
        warn!("Course has no usable chapter layout, marking as error");
        let change = ctx
            .executor
            .run(ctx.run_id, "mark-error", move || {
                transition(store, course_id, MARK_ERROR_FROM, CourseStatus::Error)
            })
            .await?;
        ensure_applied(course_id, MARK_ERROR_FROM, change)?;

        return Err(WorkflowError::MalformedInput {
            course_id: course_id.to_string(),
            reason: "chapters are missing, empty or not a list".to_string(),
        });
    };

    let change = ctx
        .executor
        .run(ctx.run_id, "mark-generating", move || {
            transition(store, course_id, MARK_GENERATING_FROM, CourseStatus::Generating)
        })
        .await?;
    ensure_applied(course_id, MARK_GENERATING_FROM, change)?;

    info!(chapters = chapters.len(), "Generating course content");
    let mut report = ChapterReport::new(course_id, chapters.len());

    for (index, chapter) in chapters.iter().enumerate() {
        let notes = generate_notes(ctx, course_id, index, chapter).await?;
        report.notes_written += 1;

        generate_practice_test(ctx, course, index, chapter, &notes, &mut report).await?;
    }

    let change = ctx
        .executor
        .run(ctx.run_id, "mark-ready", move || {
            transition(store, course_id, MARK_READY_FROM, CourseStatus::Ready)
        })
        .await?;
    ensure_applied(course_id, MARK_READY_FROM, change)?;

    info!(
        notes = report.notes_written,
        tests = report.tests_written,
        skipped = report.skipped_tests.len(),
        "Course content ready"
    );

    Ok(report)
}

/// `generate-chapter-{i}`: notes are generated and stored in the same step
async fn generate_notes(
    ctx: &WorkflowContext<'_>,
    course_id: &str,
    index: usize,
    chapter: &Chapter,
) -> Result<String, WorkflowError> {
    let chapter_id = index as u32 + 1;
    let generator = ctx.services.generator.as_ref();
    let store = ctx.services.store.as_ref();
    let prompt = prompts::chapter_notes_prompt(chapter);
    let prompt = prompt.as_str();

    let notes: String = ctx
        .executor
        .run(ctx.run_id, &format!("generate-chapter-{}", index), move || {
            store_chapter_notes(generator, store, course_id, chapter_id, prompt)
        })
        .await?;

    info!(chapter_id, bytes = notes.len(), "Chapter notes stored");
    Ok(notes)
}

async fn store_chapter_notes(
    generator: &dyn GenerationClient,
    store: &dyn ContentStore,
    course_id: &str,
    chapter_id: u32,
    prompt: &str,
) -> anyhow::Result<String> {
    let notes = generator
        .generate_notes(prompt)
        .await
        .with_context(|| format!("Failed to generate notes for chapter {}", chapter_id))?;

    let record = ChapterNotesRecord {
        course_id: course_id.to_string(),
        chapter_id,
        notes,
    };

    match store.insert_chapter_notes(&record).await? {
        InsertOutcome::Inserted => Ok(record.notes),
        InsertOutcome::AlreadyExists => {
            // An earlier attempt stored notes before its checkpoint landed
            debug!(chapter_id, "Chapter notes already stored, reusing them");
            let stored = store
                .chapter_notes(course_id)
                .await?
                .into_iter()
                .find(|n| n.chapter_id == chapter_id)
                .map(|n| n.notes)
                .unwrap_or(record.notes);
            Ok(stored)
        }
    }
}

/// Steps `generate-chapter-{i}-questions`, `resolve-user-{i}` and
/// `save-chapter-{i}-practice-test`. Exhaustion of any of them skips the test.
async fn generate_practice_test(
    ctx: &WorkflowContext<'_>,
    course: &CourseRecord,
    index: usize,
    chapter: &Chapter,
    notes: &str,
    report: &mut ChapterReport,
) -> Result<(), WorkflowError> {
    let chapter_id = index as u32 + 1;
    let course_id = course.course_id.as_str();
    let generator = ctx.services.generator.as_ref();
    let users = ctx.services.users.as_ref();
    let store = ctx.services.store.as_ref();

    let mix = QuestionMix::for_total(CHAPTER_TEST_QUESTIONS);
    let prompt = prompts::chapter_test_prompt(chapter, notes, mix);
    let prompt = prompt.as_str();

    let questions: StepOutcome<Vec<Question>> = ctx
        .executor
        .execute(
            ctx.run_id,
            &Step::recoverable(format!("generate-chapter-{}-questions", index)),
            move || async move {
                generator
                    .generate_mixed_test(prompt, mix)
                    .await
                    .with_context(|| format!("Failed to generate questions for chapter {}", chapter_id))
            },
        )
        .await?;

    let questions = match questions {
        StepOutcome::Completed(questions) => questions,
        StepOutcome::Recovered { error } => {
            report.skip(chapter_id, SkipReason::QuestionGenerationFailed { error });
            return Ok(());
        }
    };

    let Some(email) = course.created_for.as_deref() else {
        report.skip(chapter_id, SkipReason::NoLearnerEmail);
        return Ok(());
    };

    let user: StepOutcome<Option<User>> = ctx
        .executor
        .execute(ctx.run_id, &Step::recoverable(format!("resolve-user-{}", index)), move || async move {
            users.find_user_by_email(email).await.map_err(anyhow::Error::from)
        })
        .await?;

    let user = match user {
        StepOutcome::Completed(Some(user)) => user,
        StepOutcome::Completed(None) => {
            report.skip(
                chapter_id,
                SkipReason::UserNotFound {
                    email: email.to_string(),
                },
            );
            return Ok(());
        }
        StepOutcome::Recovered { error } => {
            report.skip(chapter_id, SkipReason::UserLookupFailed { error });
            return Ok(());
        }
    };

    let record = PracticeTestRecord::for_chapter(&user.id, course_id, chapter_id, mix, questions);
    let record = &record;

    let saved: StepOutcome<String> = ctx
        .executor
        .execute(
            ctx.run_id,
            &Step::recoverable(format!("save-chapter-{}-practice-test", index)),
            move || save_practice_test(store, record),
        )
        .await?;

    match saved {
        StepOutcome::Completed(test_id) => {
            info!(chapter_id, test_id = %test_id, "Chapter practice test stored");
            report.tests_written += 1;
        }
        StepOutcome::Recovered { error } => {
            report.skip(chapter_id, SkipReason::InsertFailed { error });
        }
    }

    Ok(())
}

async fn save_practice_test(store: &dyn ContentStore, record: &PracticeTestRecord) -> anyhow::Result<String> {
    let outcome = store
        .insert_practice_test(record)
        .await
        .with_context(|| format!("Failed to store practice test {}", record.id))?;

    if outcome == InsertOutcome::AlreadyExists {
        debug!(test_id = %record.id, "Practice test already stored");
    }
    Ok(record.id.clone())
}

async fn transition(
    store: &dyn ContentStore,
    course_id: &str,
    from: &[CourseStatus],
    to: CourseStatus,
) -> anyhow::Result<StatusChange> {
    store
        .transition_course_status(course_id, from, to)
        .await
        .with_context(|| format!("Failed to move course {} to {}", course_id, to))
}

fn ensure_applied(course_id: &str, from: &[CourseStatus], change: StatusChange) -> Result<(), WorkflowError> {
    match change {
        StatusChange::Applied => Ok(()),
        StatusChange::Conflict { actual } => Err(WorkflowError::StatusConflict {
            course_id: course_id.to_string(),
            expected: from.to_vec(),
            actual,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_applied() {
        assert!(ensure_applied("c1", MARK_READY_FROM, StatusChange::Applied).is_ok());

        let err = ensure_applied(
            "c1",
            MARK_GENERATING_FROM,
            StatusChange::Conflict {
                actual: CourseStatus::Ready,
            },
        )
        .unwrap_err();
        match err {
            WorkflowError::StatusConflict { actual, expected, .. } => {
                assert_eq!(actual, CourseStatus::Ready);
                assert_eq!(expected, vec![CourseStatus::Pending, CourseStatus::Generating]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::UserNotFound {
            email: "a@b.c".to_string(),
        };
        assert_eq!(reason.to_string(), "no user with email a@b.c");
    }
}
