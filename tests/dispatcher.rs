//! Dispatcher Integration Tests
//!
//! Admission under the concurrency limit, routing by event name, and
//! deterministic run ids for re-delivered events.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{course_with_chapters, Call, FlakyStore, Harness, ScriptedGenerator};
use coursegen::core::{DispatchError, InboundEvent, MemoryCheckpointStore, RetryPolicy};
use coursegen::domain::{ContentStatus, CourseStatus, StudyType, StudyTypeContentRecord};
use coursegen::storage::ContentStore;
use coursegen::workflows::{NOTES_GENERATE, PRACTICE_TEST_GENERATE, STUDY_TYPE_CONTENT};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn slow_harness() -> Harness {
    Harness::build(
        Arc::new(ScriptedGenerator::with_delay(Duration::from_secs(1))),
        FlakyStore::new(),
        Arc::new(MemoryCheckpointStore::new()),
        RetryPolicy::immediate(3),
    )
}

async fn flashcard_event(h: &Harness, record_id: &str) -> InboundEvent {
    h.store
        .inner
        .create_study_content(&StudyTypeContentRecord::placeholder(record_id, "course-1", StudyType::Flashcard))
        .await
        .unwrap();

    InboundEvent::new(
        STUDY_TYPE_CONTENT,
        json!({
            "studyType": "flashcard",
            "prompt": "Rust ownership",
            "courseId": "course-1",
            "recordId": record_id,
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn test_at_most_five_runs_in_flight() {
    let h = slow_harness();
    let dispatcher = h.dispatcher(5);

    let mut handles = Vec::new();
    for i in 0..20 {
        let event = flashcard_event(&h, &format!("fc-{}", i)).await;
        handles.push(dispatcher.dispatch(event).unwrap());
    }

    for handle in handles {
        handle.join().await.unwrap();
    }

    assert_eq!(dispatcher.peak_in_flight(), 5);
    assert!(h.generator.peak_concurrency() <= 5);
    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(h.generator.calls(Call::Flashcards), 20);

    for i in 0..20 {
        let record = h.store.study_content(&format!("fc-{}", i)).await.unwrap().unwrap();
        assert_eq!(record.status, ContentStatus::Ready);
    }
}

#[tokio::test(start_paused = true)]
async fn test_at_most_five_course_runs_in_flight() {
    let h = slow_harness();
    let dispatcher = h.dispatcher(5);

    let mut handles = Vec::new();
    for i in 0..20 {
        let course = course_with_chapters(&format!("course-{}", i), 1);
        h.seed_course(&course).await;
        let event = InboundEvent::new(NOTES_GENERATE, json!({ "course": course }));
        handles.push(dispatcher.dispatch(event).unwrap());
    }

    for handle in handles {
        let report = handle.join().await.unwrap();
        assert_eq!(report.as_chapters().unwrap().tests_written, 1);
    }

    assert_eq!(dispatcher.peak_in_flight(), 5);
    assert!(h.generator.peak_concurrency() <= 5);
    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(h.generator.calls(Call::Notes), 20);

    for i in 0..20 {
        assert_eq!(h.course_status(&format!("course-{}", i)).await, CourseStatus::Ready);
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_lets_running_finish_and_drops_queued() {
    let h = slow_harness();
    let dispatcher = h.dispatcher(1);

    let mut handles = Vec::new();
    for i in 0..3 {
        let event = flashcard_event(&h, &format!("fc-close-{}", i)).await;
        handles.push(dispatcher.dispatch(event).unwrap());
    }

    while dispatcher.in_flight() == 0 {
        tokio::task::yield_now().await;
    }
    dispatcher.close();

    let late = flashcard_event(&h, "fc-late").await;
    assert!(matches!(dispatcher.dispatch(late), Err(DispatchError::Closed)));

    let mut handles = handles.into_iter();
    let first = handles.next().unwrap();
    assert_ok!(first.join().await);
    for queued in handles {
        assert!(matches!(queued.join().await, Err(DispatchError::Closed)));
    }

    assert_eq!(h.generator.calls(Call::Flashcards), 1);
    let record = h.store.study_content("fc-close-1").await.unwrap().unwrap();
    assert_ne!(record.status, ContentStatus::Ready);
}

#[tokio::test]
async fn test_oversized_question_counts_are_rejected() {
    let h = Harness::new();
    let dispatcher = h.dispatcher(5);

    let error = assert_err!(dispatcher.dispatch(InboundEvent::new(
        PRACTICE_TEST_GENERATE,
        json!({"testId": "t-big", "prompt": "Rust", "mcqCount": 4294967295u32, "trueFalseCount": 1}),
    )));

    assert!(matches!(error, DispatchError::InvalidPayload { .. }));
    assert_eq!(h.generator.total_calls(), 0);
}

#[tokio::test]
async fn test_unknown_event_is_rejected() {
    let h = Harness::new();
    let dispatcher = h.dispatcher(5);

    let result = dispatcher.dispatch(InboundEvent::new("course.archive", json!({"courseId": "c1"})));

    assert!(matches!(result, Err(DispatchError::UnknownType(name)) if name == "course.archive"));
    assert_eq!(h.generator.total_calls(), 0);
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let h = Harness::new();
    let dispatcher = h.dispatcher(5);

    let error = assert_err!(dispatcher.dispatch(InboundEvent::new(NOTES_GENERATE, json!({"courseId": "c1"}))));

    assert!(matches!(error, DispatchError::InvalidPayload { .. }));
}

#[tokio::test]
async fn test_notes_event_runs_chapter_workflow() {
    let h = Harness::new();
    let course = course_with_chapters("course-evt", 2);
    h.seed_course(&course).await;
    let dispatcher = h.dispatcher(5);

    let handle = dispatcher
        .dispatch(InboundEvent::new(NOTES_GENERATE, json!({ "course": course })))
        .unwrap();
    assert_eq!(handle.workflow(), NOTES_GENERATE);

    let report = handle.join().await.unwrap();
    assert_eq!(report.as_chapters().unwrap().notes_written, 2);
    assert_eq!(h.course_status("course-evt").await, CourseStatus::Ready);
}

#[tokio::test]
async fn test_redelivered_event_resumes_same_run() {
    let h = Harness::new();
    let dispatcher = h.dispatcher(5);

    let event = flashcard_event(&h, "fc-again").await.with_id("delivery-42");

    let first = assert_ok!(dispatcher.dispatch(event.clone()));
    let first_id = first.run_id();
    assert_ok!(first.join().await);

    let second = assert_ok!(dispatcher.dispatch(event));
    assert_eq!(second.run_id(), first_id);
    assert_ok!(second.join().await);

    assert_eq!(h.generator.calls(Call::Flashcards), 1);

    let run = h.orchestrator.get_run_status(first_id).await.unwrap();
    assert_eq!(run.attempts, 2);
}

#[tokio::test]
async fn test_workflow_failure_surfaces_through_handle() {
    let h = Harness::new();
    let course = course_with_chapters("course-broken", 1);
    h.seed_course(&course).await;
    h.generator.fail_always(Call::Notes);

    let handle = h
        .dispatcher(2)
        .dispatch(InboundEvent::new(NOTES_GENERATE, json!({ "course": course })))
        .unwrap();

    assert!(matches!(handle.join().await, Err(DispatchError::Workflow(_))));
}
