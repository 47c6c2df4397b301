//! Run state and reconstruction from events.
//!
//! A Run represents a single execution of a workflow, possibly spread over
//! several process lifetimes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{RunEvent, RunEventType, StepStatus};

/// A workflow run as derived from its event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Name of the workflow being executed (the inbound event name)
    pub workflow: String,

    /// Current state of the run
    pub state: RunState,

    /// When the run was first admitted
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal state (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of times the run has been (re)started
    pub attempts: u32,

    /// Status of each step (step_name -> status)
    pub step_statuses: BTreeMap<String, StepStatus>,
}

impl Run {
    /// Create a new run for a workflow
    pub fn new(id: Uuid, workflow: impl Into<String>) -> Self {
        Self {
            id,
            workflow: workflow.into(),
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            attempts: 1,
            step_statuses: BTreeMap::new(),
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[RunEvent]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self {
            id: first_event.run_id,
            workflow: String::new(),
            state: RunState::Running,
            started_at: first_event.timestamp,
            completed_at: None,
            attempts: 0,
            step_statuses: BTreeMap::new(),
        };

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &RunEvent) {
        match event.event_type {
            RunEventType::RunStarted => {
                if self.attempts == 0 {
                    self.started_at = event.timestamp;
                }
                if let Some(ref workflow) = event.workflow {
                    self.workflow = workflow.clone();
                }
                self.attempts += 1;
                self.state = RunState::Running;
                self.completed_at = None;
            }
            RunEventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            RunEventType::RunFailed => {
                self.state = RunState::Failed {
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            RunEventType::StepStarted | RunEventType::StepRetrying => {
                if let Some(ref step) = event.step {
                    // A success checkpoint is final
                    if !self.is_step_completed(step) {
                        self.step_statuses.insert(step.clone(), StepStatus::Running);
                    }
                }
            }
            RunEventType::StepCompleted => {
                if let Some(ref step) = event.step {
                    self.step_statuses.insert(step.clone(), StepStatus::Completed);
                }
            }
            RunEventType::StepFailed => {
                if let Some(ref step) = event.step {
                    if !self.is_step_completed(step) {
                        self.step_statuses.insert(step.clone(), event.status);
                    }
                }
            }
        }
    }

    /// Check if the run is still in progress (or was interrupted mid-flight)
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    /// Terminal runs may have their checkpoints purged
    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    /// Check if a specific step is completed
    pub fn is_step_completed(&self, step_name: &str) -> bool {
        self.step_statuses
            .get(step_name)
            .map(|s| *s == StepStatus::Completed)
            .unwrap_or(false)
    }

    /// Number of steps holding a success checkpoint
    pub fn completed_steps(&self) -> usize {
        self.step_statuses
            .values()
            .filter(|s| **s == StepStatus::Completed)
            .count()
    }
}

/// State of a workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Executing, or interrupted before reaching a terminal state
    Running,

    /// Completed successfully
    Completed,

    /// Failed with error
    Failed { error: String },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_event(run_id: Uuid, step: &str, event_type: RunEventType, status: StepStatus) -> RunEvent {
        RunEvent::new(
            run_id,
            Some(step.to_string()),
            event_type,
            format!("{}:{}", run_id, step),
            format!("{} {:?}", step, event_type),
            status,
        )
    }

    #[test]
    fn test_run_creation() {
        let run_id = Uuid::new_v4();
        let run = Run::new(run_id, "notes.generate");

        assert_eq!(run.id, run_id);
        assert_eq!(run.workflow, "notes.generate");
        assert!(run.is_running());
    }

    #[test]
    fn test_run_from_events() {
        let run_id = Uuid::new_v4();

        let events = vec![
            RunEvent::for_run(run_id, RunEventType::RunStarted, "Run started".to_string(), StepStatus::Running)
                .with_workflow("notes.generate"),
            step_event(run_id, "mark-generating", RunEventType::StepStarted, StepStatus::Running),
            step_event(run_id, "mark-generating", RunEventType::StepCompleted, StepStatus::Completed),
            RunEvent::for_run(run_id, RunEventType::RunCompleted, "Run completed".to_string(), StepStatus::Completed),
        ];

        let run = Run::from_events(&events).unwrap();

        assert_eq!(run.id, run_id);
        assert_eq!(run.workflow, "notes.generate");
        assert_eq!(run.state, RunState::Completed);
        assert!(run.is_step_completed("mark-generating"));
        assert_eq!(run.completed_steps(), 1);
    }

    #[test]
    fn test_resumed_run_counts_attempts() {
        let run_id = Uuid::new_v4();

        let events = vec![
            RunEvent::for_run(run_id, RunEventType::RunStarted, "start".to_string(), StepStatus::Running)
                .with_workflow("notes.generate"),
            step_event(run_id, "generate-chapter-0", RunEventType::StepFailed, StepStatus::Failed),
            RunEvent::for_run(run_id, RunEventType::RunFailed, "failed".to_string(), StepStatus::Failed)
                .with_error("boom".to_string()),
            RunEvent::for_run(run_id, RunEventType::RunStarted, "resume".to_string(), StepStatus::Running)
                .with_workflow("notes.generate"),
            step_event(run_id, "generate-chapter-0", RunEventType::StepCompleted, StepStatus::Completed),
        ];

        let run = Run::from_events(&events).unwrap();

        assert_eq!(run.attempts, 2);
        assert!(run.is_running());
        assert!(run.completed_at.is_none());
        assert!(run.is_step_completed("generate-chapter-0"));
    }

    #[test]
    fn test_completed_step_is_not_downgraded() {
        let run_id = Uuid::new_v4();
        let events = vec![
            step_event(run_id, "save-quiz", RunEventType::StepCompleted, StepStatus::Completed),
            step_event(run_id, "save-quiz", RunEventType::StepStarted, StepStatus::Running),
        ];

        let run = Run::from_events(&events).unwrap();
        assert!(run.is_step_completed("save-quiz"));
    }
}
