//! coursegen - Checkpointed course content generation
//!
//! Turns "generate materials for this course" requests into many slow,
//! unreliable calls to a generative model, persisting each result durably
//! and resuming interrupted work without redoing finished steps.
//!
//! # Architecture
//!
//! Every workflow run owns an append-only event log:
//! - Each step's result is recorded as a checkpoint before the workflow moves on
//! - Re-running a run id replays checkpointed steps instead of executing them
//! - Run state is derived by replaying the log
//!
//! # Modules
//!
//! - `adapters`: Generation capability (HTTP chat-completions client)
//! - `storage`: Persistence capability (SQLite)
//! - `core`: Checkpoints, retry policy, step executor, orchestrator, dispatcher
//! - `workflows`: Chapter and single-shot generation workflows
//! - `domain`: Data structures (CourseRecord, PracticeTestRecord, RunEvent, Run)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Dispatch events (JSON, JSON array or JSONL)
//! coursegen dispatch events.jsonl
//!
//! # Check run status
//! coursegen status <run-id>
//!
//! # Resume interrupted runs by re-dispatching their events
//! coursegen resume events.jsonl
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod storage;
pub mod workflows;

// Re-export main types at crate root for convenience
pub use core::{Dispatcher, InboundEvent, Orchestrator, StepExecutor};
pub use domain::{CourseRecord, CourseStatus, Run, RunEvent, RunEventType, RunState};
pub use workflows::{Services, WorkflowError, WorkflowReport, WorkflowRequest};
