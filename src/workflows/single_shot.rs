//! Single-shot generation: one generate step, one save step.
//!
//! The target record is pre-created by the external layer in a non-terminal
//! status. Both steps are fatal; an exhausted run leaves the record as it was.

use anyhow::Context;
use tracing::{info, instrument};

use super::{prompts, PracticeTestRequest, StudyContentRequest, WorkflowContext, WorkflowError};
use crate::domain::{Flashcard, Question, QuestionMix, QuizContent, StudyType};

/// What a single-shot run generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleShotKind {
    Flashcard,
    Quiz,
    PracticeTest,
}

impl SingleShotKind {
    /// Step name suffix (`generate-{kind}`, `save-{kind}`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flashcard => "flashcard",
            Self::Quiz => "quiz",
            Self::PracticeTest => "practice-test",
        }
    }

    fn generate_step(&self) -> String {
        format!("generate-{}", self.as_str())
    }

    fn save_step(&self) -> String {
        format!("save-{}", self.as_str())
    }
}

impl From<StudyType> for SingleShotKind {
    fn from(study_type: StudyType) -> Self {
        match study_type {
            StudyType::Flashcard => Self::Flashcard,
            StudyType::Quiz => Self::Quiz,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleShotReport {
    /// Record that now holds the generated content
    pub record_id: String,
    pub kind: SingleShotKind,
    /// Number of flashcards or questions written
    pub items: usize,
}

/// Generate flashcards or a quiz into a study content record
#[instrument(skip_all, fields(run_id = %ctx.run_id, record_id = %req.record_id, study_type = %req.study_type))]
pub async fn run_study_content(
    ctx: &WorkflowContext<'_>,
    req: &StudyContentRequest,
) -> Result<SingleShotReport, WorkflowError> {
    let kind = SingleShotKind::from(req.study_type);
    let generator = ctx.services.generator.as_ref();
    let store = ctx.services.store.as_ref();
    let record_id = req.record_id.as_str();

    let (content, items) = match req.study_type {
        StudyType::Flashcard => {
            let prompt = prompts::flashcard_prompt(&req.prompt);
            let prompt = prompt.as_str();
            let cards: Vec<Flashcard> = ctx
                .executor
                .run(ctx.run_id, &kind.generate_step(), move || async move {
                    generator
                        .generate_flashcards(prompt)
                        .await
                        .context("Failed to generate flashcards")
                })
                .await?;
            let items = cards.len();
            (serde_json::json!(cards), items)
        }
        StudyType::Quiz => {
            let prompt = prompts::quiz_prompt(&req.prompt);
            let prompt = prompt.as_str();
            let quiz: QuizContent = ctx
                .executor
                .run(ctx.run_id, &kind.generate_step(), move || async move {
                    generator.generate_quiz(prompt).await.context("Failed to generate quiz")
                })
                .await?;
            let items = quiz.questions.len();
            (serde_json::json!(quiz), items)
        }
    };

    let content = &content;
    ctx.executor
        .run(ctx.run_id, &kind.save_step(), move || async move {
            store
                .complete_study_content(record_id, content)
                .await
                .with_context(|| format!("Failed to save study content {}", record_id))
        })
        .await?;

    info!(items, "Study content ready");

    Ok(SingleShotReport {
        record_id: record_id.to_string(),
        kind,
        items,
    })
}

/// Generate a standalone practice test into a pre-created record
#[instrument(skip_all, fields(run_id = %ctx.run_id, test_id = %req.test_id))]
pub async fn run_practice_test(
    ctx: &WorkflowContext<'_>,
    req: &PracticeTestRequest,
) -> Result<SingleShotReport, WorkflowError> {
    let kind = SingleShotKind::PracticeTest;
    let generator = ctx.services.generator.as_ref();
    let store = ctx.services.store.as_ref();
    let test_id = req.test_id.as_str();

    req.validate().map_err(|reason| WorkflowError::InvalidRequest {
        record_id: test_id.to_string(),
        reason,
    })?;

    let mix = requested_mix(req);
    let prompt = prompts::course_test_prompt(&req.prompt, mix);
    let prompt = prompt.as_str();

    info!(
        test_type = %req.test_type.as_str(),
        mcq = mix.mcq,
        true_false = mix.true_false,
        descriptive = mix.descriptive,
        "Generating practice test"
    );

    let questions: Vec<Question> = ctx
        .executor
        .run(ctx.run_id, &kind.generate_step(), move || async move {
            generator
                .generate_mixed_test(prompt, mix)
                .await
                .context("Failed to generate practice test questions")
        })
        .await?;

    let questions_ref = questions.as_slice();
    ctx.executor
        .run(ctx.run_id, &kind.save_step(), move || async move {
            store
                .complete_practice_test(test_id, questions_ref)
                .await
                .with_context(|| format!("Failed to save practice test {}", test_id))
        })
        .await?;

    info!(questions = questions.len(), "Practice test ready");

    Ok(SingleShotReport {
        record_id: test_id.to_string(),
        kind,
        items: questions.len(),
    })
}

/// Counts from the request, or the default mix when none were given
fn requested_mix(req: &PracticeTestRequest) -> QuestionMix {
    let mix = req.mix();
    if mix.total() == 0 {
        QuestionMix::default()
    } else {
        mix
    }
}
