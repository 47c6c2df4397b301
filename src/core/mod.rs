//! Core orchestration logic.
//!
//! This module contains:
//! - Checkpoint: append-only run logs and step checkpoints
//! - Retry: backoff policy for failed steps
//! - Executor: checkpointed, retried step execution
//! - Orchestrator: runs a workflow and records its lifecycle
//! - Dispatcher: event routing under a concurrency limit

pub mod checkpoint;
pub mod dispatcher;
pub mod executor;
pub mod orchestrator;
pub mod retry;

// Re-export commonly used types
pub use checkpoint::{
    checkpoint_key, derive_run_id, hash_input, CheckpointStore, JsonlCheckpointStore,
    MemoryCheckpointStore,
};
pub use dispatcher::{DispatchError, Dispatcher, InboundEvent, RunHandle, DEFAULT_MAX_CONCURRENT_RUNS};
pub use executor::{FailurePolicy, Step, StepError, StepExecutor, StepOutcome};
pub use orchestrator::Orchestrator;
pub use retry::{RetryDecision, RetryPolicy};
