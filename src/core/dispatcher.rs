//! Event dispatch under a global concurrency limit.
//!
//! Each admitted event becomes a spawned run. A semaphore bounds how many
//! runs execute at once; events beyond the limit wait in FIFO order for a
//! permit. In-flight and peak counters are kept for observation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::workflows::{
    PracticeTestRequest, WorkflowError, WorkflowReport, WorkflowRequest, NOTES_GENERATE,
    PRACTICE_TEST_GENERATE, STUDY_TYPE_CONTENT,
};

use super::checkpoint::derive_run_id;
use super::orchestrator::Orchestrator;

/// Default number of runs allowed to execute at once
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 5;

/// An inbound typed event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Delivery id; re-delivering the same id resumes the same run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub data: Value,
}

impl InboundEvent {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            data,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Decode the payload into the request of the workflow it routes to
    pub fn parse(&self) -> Result<WorkflowRequest, DispatchError> {
        let invalid = |source| DispatchError::InvalidPayload {
            name: self.name.clone(),
            source,
        };

        match self.name.as_str() {
            NOTES_GENERATE => serde_json::from_value(self.data.clone())
                .map(WorkflowRequest::ChapterNotes)
                .map_err(invalid),
            STUDY_TYPE_CONTENT => serde_json::from_value(self.data.clone())
                .map(WorkflowRequest::StudyContent)
                .map_err(invalid),
            PRACTICE_TEST_GENERATE => serde_json::from_value::<PracticeTestRequest>(self.data.clone())
                .and_then(|req| req.validate().map(|()| req).map_err(serde_json::Error::custom))
                .map(WorkflowRequest::PracticeTest)
                .map_err(invalid),
            other => Err(DispatchError::UnknownType(other.to_string())),
        }
    }

    /// Deterministic run id for this event
    pub fn run_id(&self, request: &WorkflowRequest) -> Uuid {
        let key = self.id.as_deref().unwrap_or_else(|| request.natural_key());
        derive_run_id(&self.name, key)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Invalid payload for '{name}': {source}")]
    InvalidPayload {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Dispatcher is shut down")]
    Closed,

    #[error("Run task aborted: {0}")]
    Join(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// A dispatched run
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    workflow: &'static str,
    handle: JoinHandle<Result<WorkflowReport, DispatchError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn workflow(&self) -> &'static str {
        self.workflow
    }

    /// Wait for the run to finish
    pub async fn join(self) -> Result<WorkflowReport, DispatchError> {
        self.handle
            .await
            .map_err(|e| DispatchError::Join(e.to_string()))?
    }
}

/// Admits events and runs their workflows
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);

        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Runs currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of runs that ever held a permit at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Route an event and spawn its run. The run starts once a permit is free.
    pub fn dispatch(&self, event: InboundEvent) -> Result<RunHandle, DispatchError> {
        if self.permits.is_closed() {
            return Err(DispatchError::Closed);
        }

        let request = match event.parse() {
            Ok(request) => request,
            Err(e) => {
                warn!(event = %event.name, error = %e, "Rejecting event");
                return Err(e);
            }
        };

        let run_id = event.run_id(&request);
        let workflow = request.name();
        debug!(%run_id, workflow, "Event accepted, waiting for a permit");

        let orchestrator = Arc::clone(&self.orchestrator);
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        let peak = Arc::clone(&self.peak);

        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|_| DispatchError::Closed)?;
            let _guard = InFlightGuard::enter(in_flight, &peak);

            orchestrator.run(run_id, &request).await.map_err(DispatchError::from)
        });

        info!(%run_id, workflow, "Event dispatched");

        Ok(RunHandle {
            run_id,
            workflow,
            handle,
        })
    }

    /// Stop admitting new runs. Runs already holding a permit finish
    /// normally; queued runs resolve to `DispatchError::Closed`.
    pub fn close(&self) {
        self.permits.close();
    }

}

/// Keeps the in-flight counter accurate even if a run panics
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(in_flight: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(current, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
