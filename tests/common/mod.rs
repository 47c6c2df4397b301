//! Shared fixtures for integration tests: a scripted generation client, a
//! store wrapper that can fail practice-test inserts, and a harness wiring
//! them into an orchestrator.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use coursegen::adapters::{GenerationClient, GenerationError};
use coursegen::core::{CheckpointStore, Dispatcher, MemoryCheckpointStore, Orchestrator, RetryPolicy, StepExecutor};
use coursegen::domain::{
    Chapter, ChapterNotesRecord, CourseRecord, CourseStatus, Flashcard, PracticeTestRecord,
    Question, QuestionMix, QuizContent, QuizQuestion, StudyTypeContentRecord, User,
};
use coursegen::storage::{
    ContentStore, InsertOutcome, SqliteStore, StatusChange, StorageError, UserDirectory,
};
use coursegen::workflows::Services;

pub const LEARNER_EMAIL: &str = "learner@example.com";
pub const LEARNER_ID: &str = "user-1";

/// Which generation call a failure script applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Notes,
    Questions,
    Flashcards,
    Quiz,
}

#[derive(Debug, Clone)]
struct FailureScript {
    /// Failures left before calls succeed again (`u32::MAX` = always)
    remaining: u32,
    /// Only prompts containing this text fail
    prompt_filter: Option<String>,
    error: GenerationError,
}

/// Generation client with call counters, scripted failures and a
/// concurrency gauge
#[derive(Default)]
pub struct ScriptedGenerator {
    calls: Mutex<HashMap<Call, u32>>,
    scripts: Mutex<HashMap<Call, FailureScript>>,
    notes_prompts: Mutex<Vec<String>>,
    mixes: Mutex<Vec<QuestionMix>>,
    call_times: Mutex<Vec<tokio::time::Instant>>,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long (virtual time under a paused clock)
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail(&self, call: Call, times: u32) {
        self.script(call, times, None, GenerationError::ModelUnavailable("scripted failure".to_string()));
    }

    pub fn fail_always(&self, call: Call) {
        self.fail(call, u32::MAX);
    }

    pub fn fail_with(&self, call: Call, times: u32, error: GenerationError) {
        self.script(call, times, None, error);
    }

    /// Fail every call whose prompt contains `needle`
    pub fn fail_prompts_containing(&self, call: Call, needle: &str) {
        self.script(
            call,
            u32::MAX,
            Some(needle.to_string()),
            GenerationError::ModelUnavailable("scripted failure".to_string()),
        );
    }

    pub fn clear_failures(&self) {
        self.scripts.lock().unwrap().clear();
    }

    fn script(&self, call: Call, remaining: u32, prompt_filter: Option<String>, error: GenerationError) {
        self.scripts.lock().unwrap().insert(
            call,
            FailureScript {
                remaining,
                prompt_filter,
                error,
            },
        );
    }

    pub fn calls(&self, call: Call) -> u32 {
        self.calls.lock().unwrap().get(&call).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    /// Number of notes prompts that mentioned `needle`
    pub fn notes_calls_mentioning(&self, needle: &str) -> usize {
        self.notes_prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }

    pub fn mixes(&self) -> Vec<QuestionMix> {
        self.mixes.lock().unwrap().clone()
    }

    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.call_times.lock().unwrap().clone()
    }

    /// Highest number of generation calls in progress at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: Call, prompt: &str) -> Result<(), GenerationError> {
        *self.calls.lock().unwrap().entry(call).or_insert(0) += 1;
        self.call_times.lock().unwrap().push(tokio::time::Instant::now());

        let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let mut scripts = self.scripts.lock().unwrap();
        if let Some(script) = scripts.get_mut(&call) {
            let matches = script
                .prompt_filter
                .as_deref()
                .map(|needle| prompt.contains(needle))
                .unwrap_or(true);

            if matches && script.remaining > 0 {
                if script.remaining != u32::MAX {
                    script.remaining -= 1;
                }
                return Err(script.error.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_notes(&self, prompt: &str) -> Result<String, GenerationError> {
        self.notes_prompts.lock().unwrap().push(prompt.to_string());
        self.enter(Call::Notes, prompt).await?;
        Ok(format!("<p>notes #{}</p>", self.calls(Call::Notes)))
    }

    async fn generate_flashcards(&self, prompt: &str) -> Result<Vec<Flashcard>, GenerationError> {
        self.enter(Call::Flashcards, prompt).await?;
        Ok((1..=3)
            .map(|i| Flashcard {
                front: format!("Term {}", i),
                back: format!("Definition {}", i),
            })
            .collect())
    }

    async fn generate_quiz(&self, prompt: &str) -> Result<QuizContent, GenerationError> {
        self.enter(Call::Quiz, prompt).await?;
        Ok(QuizContent {
            questions: vec![QuizQuestion {
                question: "What does the borrow checker enforce?".to_string(),
                options: vec!["Aliasing XOR mutation".to_string(), "Nothing".to_string()],
                answer: "Aliasing XOR mutation".to_string(),
            }],
        })
    }

    async fn generate_mixed_test(
        &self,
        prompt: &str,
        mix: QuestionMix,
    ) -> Result<Vec<Question>, GenerationError> {
        self.mixes.lock().unwrap().push(mix);
        self.enter(Call::Questions, prompt).await?;
        Ok(questions_for(mix))
    }
}

/// A question set exactly matching a mix
pub fn questions_for(mix: QuestionMix) -> Vec<Question> {
    let mcq = (0..mix.mcq).map(|i| Question::MultipleChoice {
        question: format!("Choice {}", i),
        options: vec!["a".to_string(), "b".to_string()],
        answer: "a".to_string(),
    });
    let tf = (0..mix.true_false).map(|i| Question::TrueFalse {
        question: format!("Claim {}", i),
        answer: i % 2 == 0,
    });
    let desc = (0..mix.descriptive).map(|i| Question::Descriptive {
        question: format!("Explain {}", i),
        answer: "Because".to_string(),
    });
    mcq.chain(tf).chain(desc).collect()
}

/// SQLite store that can be told to fail practice-test inserts
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: SqliteStore,
    failing_test_inserts: Arc<AtomicU32>,
    test_insert_calls: Arc<AtomicU32>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            failing_test_inserts: Arc::new(AtomicU32::new(0)),
            test_insert_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn fail_practice_test_inserts(&self, times: u32) {
        self.failing_test_inserts.store(times, Ordering::SeqCst);
    }

    pub fn practice_test_insert_calls(&self) -> u32 {
        self.test_insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for FlakyStore {
    async fn course_status(&self, course_id: &str) -> Result<Option<CourseStatus>, StorageError> {
        self.inner.course_status(course_id).await
    }

    async fn transition_course_status(
        &self,
        course_id: &str,
        from: &[CourseStatus],
        to: CourseStatus,
    ) -> Result<StatusChange, StorageError> {
        self.inner.transition_course_status(course_id, from, to).await
    }

    async fn insert_chapter_notes(&self, record: &ChapterNotesRecord) -> Result<InsertOutcome, StorageError> {
        self.inner.insert_chapter_notes(record).await
    }

    async fn chapter_notes(&self, course_id: &str) -> Result<Vec<ChapterNotesRecord>, StorageError> {
        self.inner.chapter_notes(course_id).await
    }

    async fn insert_practice_test(&self, record: &PracticeTestRecord) -> Result<InsertOutcome, StorageError> {
        self.test_insert_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failing_test_inserts.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failing_test_inserts.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(StorageError::Backend("database is locked".to_string()));
        }

        self.inner.insert_practice_test(record).await
    }

    async fn complete_practice_test(&self, test_id: &str, questions: &[Question]) -> Result<(), StorageError> {
        self.inner.complete_practice_test(test_id, questions).await
    }

    async fn practice_test(&self, test_id: &str) -> Result<Option<PracticeTestRecord>, StorageError> {
        self.inner.practice_test(test_id).await
    }

    async fn practice_tests(&self, course_id: &str) -> Result<Vec<PracticeTestRecord>, StorageError> {
        self.inner.practice_tests(course_id).await
    }

    async fn complete_study_content(&self, record_id: &str, content: &Value) -> Result<(), StorageError> {
        self.inner.complete_study_content(record_id, content).await
    }

    async fn study_content(&self, record_id: &str) -> Result<Option<StudyTypeContentRecord>, StorageError> {
        self.inner.study_content(record_id).await
    }
}

#[async_trait]
impl UserDirectory for FlakyStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        self.inner.find_user_by_email(email).await
    }
}

/// Generator, store and checkpoint log wired into an orchestrator
pub struct Harness {
    pub generator: Arc<ScriptedGenerator>,
    pub store: FlakyStore,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    /// In-memory harness whose retries do not sleep
    pub fn new() -> Self {
        Self::build(
            Arc::new(ScriptedGenerator::new()),
            FlakyStore::new(),
            Arc::new(MemoryCheckpointStore::new()),
            RetryPolicy::immediate(3),
        )
    }

    pub fn build(
        generator: Arc<ScriptedGenerator>,
        store: FlakyStore,
        checkpoints: Arc<dyn CheckpointStore>,
        policy: RetryPolicy,
    ) -> Self {
        let services = Services {
            generator: generator.clone(),
            store: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
        };
        let executor = StepExecutor::new(Arc::clone(&checkpoints), policy);

        Self {
            generator,
            store,
            checkpoints,
            orchestrator: Arc::new(Orchestrator::new(services, executor)),
        }
    }

    /// A fresh process over the same database and checkpoint log
    pub fn restart(&self) -> Self {
        Self::build(
            Arc::new(ScriptedGenerator::new()),
            self.store.clone(),
            Arc::clone(&self.checkpoints),
            RetryPolicy::immediate(3),
        )
    }

    pub fn dispatcher(&self, max_concurrent: usize) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.orchestrator), max_concurrent)
    }

    /// Store a pending course and its learner
    pub async fn seed_course(&self, course: &CourseRecord) {
        self.store.inner.upsert_course(course).await.unwrap();
        self.store
            .inner
            .insert_user(&User {
                id: LEARNER_ID.to_string(),
                email: LEARNER_EMAIL.to_string(),
                name: Some("Learner".to_string()),
            })
            .await
            .unwrap();
    }

    pub async fn course_status(&self, course_id: &str) -> CourseStatus {
        self.store.course_status(course_id).await.unwrap().unwrap()
    }
}

/// A pending course with `n` chapters created for the test learner
pub fn course_with_chapters(course_id: &str, n: usize) -> CourseRecord {
    let chapters = (1..=n)
        .map(|i| {
            Chapter::new(format!("Chapter {}", i), format!("Summary of chapter {}", i))
                .with_topic(format!("Topic {}.1", i), "First topic")
                .with_topic(format!("Topic {}.2", i), "Second topic")
        })
        .collect();

    CourseRecord::new(course_id, chapters).with_created_for(LEARNER_EMAIL)
}
