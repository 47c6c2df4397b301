//! Append-only checkpoint log.
//!
//! Each workflow run owns one log of [`RunEvent`]s. A step's success
//! checkpoint is the first `step_completed` event recorded for it; later
//! entries for the same step never replace it.
//!
//! The file-backed store keeps one newline-delimited JSON (JSONL) file per
//! run, so concurrent runs never contend on the same file.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{RunEvent, RunEventType};

/// Durable storage for run events and step checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append an event; returns once the event is durable
    async fn append(&self, event: &RunEvent) -> Result<()>;

    /// Replay all events of a run in order
    async fn replay(&self, run_id: Uuid) -> Result<Vec<RunEvent>>;

    /// List all known run ids
    async fn list_runs(&self) -> Result<Vec<Uuid>>;

    /// Drop every event of a run
    async fn purge(&self, run_id: Uuid) -> Result<()>;

    /// Look up the success checkpoint of a step
    async fn checkpoint(&self, run_id: Uuid, step: &str) -> Result<Option<serde_json::Value>> {
        let key = checkpoint_key(run_id, step);
        let events = self.replay(run_id).await?;

        Ok(events
            .into_iter()
            .find(|e| e.checkpoint_key == key && e.event_type == RunEventType::StepCompleted)
            .map(|e| e.output.unwrap_or(serde_json::Value::Null)))
    }

    /// Check if a step already holds a success checkpoint
    async fn is_step_completed(&self, run_id: Uuid, step: &str) -> Result<bool> {
        Ok(self.checkpoint(run_id, step).await?.is_some())
    }
}

/// File-based checkpoint store using JSONL format
pub struct JsonlCheckpointStore {
    /// Directory holding one sub-directory per run
    base_dir: PathBuf,
}

impl JsonlCheckpointStore {
    /// Open a store rooted at the given directory
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();

        fs::create_dir_all(&base_dir)
            .await
            .with_context(|| format!("Failed to create runs directory: {}", base_dir.display()))?;

        Ok(Self { base_dir })
    }

    /// Open the store in the configured runs directory ($COURSEGEN_HOME/runs)
    pub async fn open_default() -> Result<Self> {
        Self::open(crate::config::runs_dir()?).await
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the path to a run's events file
    pub fn events_path(&self, run_id: Uuid) -> PathBuf {
        self.base_dir.join(run_id.to_string()).join("events.jsonl")
    }
}

/// Append one line under an exclusive file lock and sync it to disk
fn append_locked(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create run directory: {}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open events file: {}", path.display()))?;

    file.lock_exclusive()
        .with_context(|| format!("Failed to lock events file: {}", path.display()))?;

    let written = writeln!(file, "{}", line).and_then(|_| file.sync_data());
    let unlocked = FileExt::unlock(&file);

    written.context("Failed to write event")?;
    unlocked.context("Failed to unlock events file")?;

    Ok(())
}

#[async_trait]
impl CheckpointStore for JsonlCheckpointStore {
    async fn append(&self, event: &RunEvent) -> Result<()> {
        let path = self.events_path(event.run_id);
        let line = serde_json::to_string(event).context("Failed to serialize event")?;

        tokio::task::spawn_blocking(move || append_locked(&path, &line))
            .await
            .context("Event writer task panicked")?
    }

    async fn replay(&self, run_id: Uuid) -> Result<Vec<RunEvent>> {
        let path = self.events_path(run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open events file: {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: RunEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    async fn list_runs(&self) -> Result<Vec<Uuid>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }

    async fn purge(&self, run_id: Uuid) -> Result<()> {
        let run_dir = self.base_dir.join(run_id.to_string());
        if run_dir.exists() {
            fs::remove_dir_all(&run_dir)
                .await
                .with_context(|| format!("Failed to remove run directory: {}", run_dir.display()))?;
        }
        Ok(())
    }
}

/// In-process checkpoint store; nothing survives a restart
#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<Uuid, Vec<RunEvent>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn append(&self, event: &RunEvent) -> Result<()> {
        let mut runs = self.runs.lock().await;
        runs.entry(event.run_id).or_default().push(event.clone());
        Ok(())
    }

    async fn replay(&self, run_id: Uuid) -> Result<Vec<RunEvent>> {
        let runs = self.runs.lock().await;
        Ok(runs.get(&run_id).cloned().unwrap_or_default())
    }

    async fn list_runs(&self) -> Result<Vec<Uuid>> {
        let runs = self.runs.lock().await;
        Ok(runs.keys().copied().collect())
    }

    async fn purge(&self, run_id: Uuid) -> Result<()> {
        self.runs.lock().await.remove(&run_id);
        Ok(())
    }
}

/// Checkpoint key for a step: "{run_id}:{step}"
pub fn checkpoint_key(run_id: Uuid, step_name: &str) -> String {
    format!("{}:{}", run_id, step_name)
}

/// Deterministic run id for a workflow and its natural key.
///
/// The same event delivered twice maps to the same run, so the second
/// delivery resumes from the first one's checkpoints.
pub fn derive_run_id(workflow: &str, key: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(workflow.as_bytes());
    hasher.update(b":");
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

/// Hash input content (first 16 chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
