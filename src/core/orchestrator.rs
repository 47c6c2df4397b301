//! Run orchestration.
//!
//! Opens the run log, runs the workflow matching a request through the step
//! executor, and records the run's terminal event. Re-running a run id
//! replays its checkpoints, so the same entry point starts and resumes runs.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::domain::{Run, RunEvent, RunEventType, StepStatus};
use crate::workflows::{self, Services, WorkflowContext, WorkflowError, WorkflowReport, WorkflowRequest};

use super::checkpoint::CheckpointStore;
use super::executor::StepExecutor;

/// Runs workflows against shared capabilities
pub struct Orchestrator {
    services: Services,
    executor: StepExecutor,
}

impl Orchestrator {
    pub fn new(services: Services, executor: StepExecutor) -> Self {
        Self { services, executor }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        self.executor.store()
    }

    /// Start or resume a run
    #[instrument(skip(self, request), fields(workflow = %request.name()))]
    pub async fn run(&self, run_id: Uuid, request: &WorkflowRequest) -> Result<WorkflowReport, WorkflowError> {
        let previous = self
            .checkpoints()
            .replay(run_id)
            .await
            .map_err(run_log_error)?;

        if previous.is_empty() {
            info!(%run_id, key = %request.natural_key(), "Starting run");
        } else {
            let completed = previous.iter().filter(|e| e.is_success_checkpoint()).count();
            info!(%run_id, completed_steps = completed, "Resuming run from checkpoints");
        }

        let start_event = RunEvent::for_run(
            run_id,
            RunEventType::RunStarted,
            format!("Workflow '{}' started", request.name()),
            StepStatus::Running,
        )
        .with_workflow(request.name());
        self.append(&start_event).await?;

        let ctx = WorkflowContext {
            run_id,
            executor: &self.executor,
            services: &self.services,
        };
        let result = workflows::run_workflow(&ctx, request).await;

        let end_event = match &result {
            Ok(_) => {
                info!(%run_id, "Run completed");
                RunEvent::for_run(
                    run_id,
                    RunEventType::RunCompleted,
                    format!("Workflow '{}' completed", request.name()),
                    StepStatus::Completed,
                )
            }
            Err(e) => {
                error!(%run_id, error = %e, "Run failed");
                RunEvent::for_run(
                    run_id,
                    RunEventType::RunFailed,
                    format!("Workflow '{}' failed", request.name()),
                    StepStatus::Failed,
                )
                .with_error(e.to_string())
            }
        };
        self.append(&end_event).await?;

        result
    }

    async fn append(&self, event: &RunEvent) -> Result<(), WorkflowError> {
        self.checkpoints().append(event).await.map_err(run_log_error)
    }

    /// Get status of a run by ID
    pub async fn get_run_status(&self, run_id: Uuid) -> Result<Run> {
        let events = self.checkpoints().replay(run_id).await?;

        if events.is_empty() {
            anyhow::bail!("Run {} not found", run_id);
        }

        Run::from_events(&events).context("Failed to reconstruct run state")
    }

    /// List recent runs, most recent first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let run_ids = self.checkpoints().list_runs().await?;
        let mut runs = Vec::new();

        for run_id in run_ids {
            if let Ok(run) = self.get_run_status(run_id).await {
                runs.push(run);
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);

        Ok(runs)
    }

    /// Drop the checkpoints of every terminal run; returns how many were purged
    pub async fn purge_finished(&self) -> Result<usize> {
        let mut purged = 0;

        for run_id in self.checkpoints().list_runs().await? {
            let run = match self.get_run_status(run_id).await {
                Ok(run) => run,
                Err(_) => continue,
            };

            if run.is_finished() {
                self.checkpoints()
                    .purge(run_id)
                    .await
                    .with_context(|| format!("Failed to purge run {}", run_id))?;
                purged += 1;
            }
        }

        info!(purged, "Purged finished runs");
        Ok(purged)
    }
}

fn run_log_error(e: anyhow::Error) -> WorkflowError {
    WorkflowError::RunLog(format!("{:#}", e))
}
