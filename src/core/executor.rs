//! Checkpointed step execution.
//!
//! A step is a named unit of work inside a workflow run. Once a step has a
//! success checkpoint its stored result is returned on every later call with
//! the same `(run_id, step_name)`, so re-entering a workflow from the top
//! replays finished steps without running them again.
//!
//! The only retry-unsafe window is between a step body succeeding and its
//! checkpoint being written. Step bodies must tolerate running twice across
//! that window.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::adapters::GenerationError;
use crate::domain::{RunEvent, RunEventType, StepStatus};

use super::checkpoint::{checkpoint_key, CheckpointStore};
use super::retry::RetryPolicy;

/// What exhausting a step's retries means for the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The workflow run fails
    Fatal,
    /// The workflow carries on without the step's result
    Recoverable,
}

/// A step definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Step name (unique and deterministic within a run)
    pub name: String,

    pub failure_policy: FailurePolicy,
}

impl Step {
    pub fn fatal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_policy: FailurePolicy::Fatal,
        }
    }

    pub fn recoverable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_policy: FailurePolicy::Recoverable,
        }
    }
}

/// Result of executing a step under its failure policy
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    Completed(T),
    /// A recoverable step exhausted its retries
    Recovered { error: String },
}

impl<T> StepOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Recovered { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step '{step}' failed after {attempts} attempts: {message}")]
    Exhausted {
        step: String,
        attempts: u32,
        message: String,
    },

    #[error("Checkpoint store failed for step '{step}': {message}")]
    Checkpoint { step: String, message: String },

    #[error("Result of step '{step}' could not be encoded: {source}")]
    Codec {
        step: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StepError {
    fn checkpoint(step: &str, error: anyhow::Error) -> Self {
        Self::Checkpoint {
            step: step.to_string(),
            message: format!("{:#}", error),
        }
    }
}

/// Runs steps against a checkpoint store under a retry policy
#[derive(Clone)]
pub struct StepExecutor {
    store: Arc<dyn CheckpointStore>,
    policy: RetryPolicy,
}

impl StepExecutor {
    pub fn new(store: Arc<dyn CheckpointStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a fatal step: exhaustion is returned as an error
    pub async fn run<T, F, Fut>(&self, run_id: Uuid, step_name: &str, f: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        self.run_step(run_id, step_name, StepStatus::Failed, f).await
    }

    /// Run a step under its failure policy
    pub async fn execute<T, F, Fut>(
        &self,
        run_id: Uuid,
        step: &Step,
        f: F,
    ) -> Result<StepOutcome<T>, StepError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        let exhausted_status = match step.failure_policy {
            FailurePolicy::Fatal => StepStatus::Failed,
            FailurePolicy::Recoverable => StepStatus::Skipped,
        };

        match self.run_step(run_id, &step.name, exhausted_status, f).await {
            Ok(value) => Ok(StepOutcome::Completed(value)),
            Err(StepError::Exhausted { message, .. })
                if step.failure_policy == FailurePolicy::Recoverable =>
            {
                Ok(StepOutcome::Recovered { error: message })
            }
            Err(e) => Err(e),
        }
    }

    async fn run_step<T, F, Fut>(
        &self,
        run_id: Uuid,
        step_name: &str,
        exhausted_status: StepStatus,
        mut f: F,
    ) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        let key = checkpoint_key(run_id, step_name);

        let cached = self
            .store
            .checkpoint(run_id, step_name)
            .await
            .map_err(|e| StepError::checkpoint(step_name, e))?;

        if let Some(output) = cached {
            debug!(step = %step_name, "Step already completed, replaying checkpoint");
            return serde_json::from_value(output).map_err(|source| StepError::Codec {
                step: step_name.to_string(),
                source,
            });
        }

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let step_start = Instant::now();

            let start_event = RunEvent::new(
                run_id,
                Some(step_name.to_string()),
                RunEventType::StepStarted,
                key.clone(),
                format!("Step '{}' attempt {}", step_name, attempt),
                StepStatus::Running,
            )
            .with_attempt(attempt);
            self.append(step_name, &start_event).await?;

            let result = f().await;
            let duration_ms = step_start.elapsed().as_millis() as u64;

            match result {
                Ok(value) => {
                    let output = serde_json::to_value(&value).map_err(|source| StepError::Codec {
                        step: step_name.to_string(),
                        source,
                    })?;

                    // Durable before control returns to the workflow
                    let complete_event = RunEvent::new(
                        run_id,
                        Some(step_name.to_string()),
                        RunEventType::StepCompleted,
                        key,
                        format!("Step '{}' completed in {}ms", step_name, duration_ms),
                        StepStatus::Completed,
                    )
                    .with_attempt(attempt)
                    .with_duration(duration_ms)
                    .with_output(output);
                    self.append(step_name, &complete_event).await?;

                    return Ok(value);
                }
                Err(e) => {
                    let decision = self.policy.should_retry(attempt, &e);

                    if decision.retry {
                        let retry_event = RunEvent::new(
                            run_id,
                            Some(step_name.to_string()),
                            RunEventType::StepRetrying,
                            key.clone(),
                            format!("Step '{}' failed, retrying in {:?}", step_name, decision.delay),
                            StepStatus::Running,
                        )
                        .with_attempt(attempt)
                        .with_duration(duration_ms)
                        .with_error(format!("{:#}", e));
                        self.append(step_name, &retry_event).await?;

                        warn!(
                            step = %step_name,
                            attempt,
                            delay_ms = decision.delay.as_millis() as u64,
                            transient = is_transient(&e),
                            error = %e,
                            "Step failed, retrying"
                        );

                        tokio::time::sleep(decision.delay).await;
                        continue;
                    }

                    let message = format!("{:#}", e);
                    let fail_event = RunEvent::new(
                        run_id,
                        Some(step_name.to_string()),
                        RunEventType::StepFailed,
                        key,
                        format!("Step '{}' failed after {} attempts", step_name, attempt),
                        exhausted_status,
                    )
                    .with_attempt(attempt)
                    .with_duration(duration_ms)
                    .with_error(message.clone());
                    self.append(step_name, &fail_event).await?;

                    error!(
                        step = %step_name,
                        attempt,
                        error = %message,
                        "Step failed permanently"
                    );

                    return Err(StepError::Exhausted {
                        step: step_name.to_string(),
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }

    async fn append(&self, step_name: &str, event: &RunEvent) -> Result<(), StepError> {
        self.store
            .append(event)
            .await
            .map_err(|e| StepError::checkpoint(step_name, e))
    }
}

/// Best-effort classification for logs; the retry policy ignores it
fn is_transient(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<GenerationError>()
        .map(GenerationError::is_transient)
        .unwrap_or(true)
}
