//! Run events for the checkpoint log.
//!
//! Every state change of a workflow run is recorded as an immutable event in
//! an append-only log. Step checkpoints are the `StepCompleted` (success,
//! carrying the step's encoded result) and `StepFailed` (retries exhausted)
//! entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single entry in a run's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Step name (absent for run-level events)
    pub step: Option<String>,

    /// Workflow name (run-level events only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,

    /// Type of event
    pub event_type: RunEventType,

    /// Checkpoint key format: "{run_id}:{step}"
    pub checkpoint_key: String,

    /// Human-readable summary (NO prompt or generated content)
    pub summary: String,

    /// Current status of the step/run
    pub status: StepStatus,

    /// Attempt number (step events only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    /// Time taken in milliseconds (for finished attempts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Encoded step result (success checkpoints only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        step: Option<String>,
        event_type: RunEventType,
        checkpoint_key: String,
        summary: String,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            step,
            workflow: None,
            event_type,
            checkpoint_key,
            summary,
            status,
            attempt: None,
            duration_ms: None,
            output: None,
            error: None,
        }
    }

    /// Run-level event (no step)
    pub fn for_run(run_id: Uuid, event_type: RunEventType, summary: String, status: StepStatus) -> Self {
        Self::new(run_id, None, event_type, run_id.to_string(), summary, status)
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// True for a durable success checkpoint
    pub fn is_success_checkpoint(&self) -> bool {
        self.event_type == RunEventType::StepCompleted
    }
}

/// Types of events that can occur during a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
    /// A run was admitted (also recorded on every resumption)
    RunStarted,

    /// A run reached a successful terminal state
    RunCompleted,

    /// A run stopped on a fatal error
    RunFailed,

    /// A step attempt has started
    StepStarted,

    /// A step succeeded; its result is checkpointed
    StepCompleted,

    /// A step exhausted its retries
    StepFailed,

    /// A step attempt failed and will be retried
    StepRetrying,
}

/// Status of a step or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,

    /// Failed, but the workflow carried on without it
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}
