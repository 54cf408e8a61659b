//! Task data model for render jobs.
//!
//! A task is one render of a content image in the style of a style image.
//! It tracks its lifecycle state, its progress in iterations, and the GPU
//! slot it holds while running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::settings::RenderSettings;
use crate::error::{Error, Result};
use crate::storage::DataStore;

/// Identifier of a task: a non-negative integer in decimal form.
///
/// Ids are chosen by the client (they also name the uploaded images), so
/// the only thing enforced here is the shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Parse and validate a task id.
    pub fn parse(s: &str) -> Result<Self> {
        if Self::is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidTaskId(s.to_string()))
        }
    }

    /// A valid id is a non-empty run of ASCII digits.
    pub fn is_valid(s: &str) -> bool {
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Task lifecycle state.
///
/// `Queued -> Running -> {Done | Failed | Cancelled}`, with `Cancelled`
/// also reachable straight from `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Queued or running.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Queued | TaskState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Running => write!(f, "running"),
            TaskState::Done => write!(f, "done"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single render job.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub content_path: PathBuf,
    pub style_path: PathBuf,
    pub settings: RenderSettings,
    /// Latest reported iteration. Never decreases, never exceeds
    /// `settings.num_iterations`.
    pub iter: u32,
    /// GPU slot held while running.
    pub assigned_slot: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a freshly submitted task in `Queued` state.
    pub fn new(
        id: TaskId,
        content_path: PathBuf,
        style_path: PathBuf,
        settings: RenderSettings,
    ) -> Self {
        Self {
            id,
            state: TaskState::Queued,
            content_path,
            style_path,
            settings,
            iter: 0,
            assigned_slot: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Rebuild a task found on disk at startup.
    ///
    /// Recovered tasks are always terminal: a render that was in flight
    /// when the process died cannot be resumed.
    pub fn recovered(
        id: TaskId,
        content_path: PathBuf,
        style_path: PathBuf,
        settings: RenderSettings,
        done: bool,
        last_checkpoint: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let (state, iter) = if done {
            (TaskState::Done, settings.num_iterations)
        } else {
            (
                TaskState::Failed,
                last_checkpoint.min(settings.num_iterations),
            )
        };
        Self {
            id,
            state,
            content_path,
            style_path,
            settings,
            iter,
            assigned_slot: None,
            created_at,
            started_at: None,
            finished_at: None,
        }
    }

    /// Transition to `Running` on the given slot.
    pub fn start(&mut self, slot: usize) {
        self.state = TaskState::Running;
        self.assigned_slot = Some(slot);
        self.started_at = Some(Utc::now());
    }

    /// Record a reported iteration.
    ///
    /// Returns true if `iter` advanced. Values beyond `num_iterations`
    /// are clamped.
    pub fn record_progress(&mut self, reported: u32) -> bool {
        let reported = reported.min(self.settings.num_iterations);
        if reported > self.iter {
            self.iter = reported;
            true
        } else {
            false
        }
    }

    /// Request cancellation.
    ///
    /// Returns true if the state changed (the task was queued or running).
    pub fn cancel(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        if self.state == TaskState::Queued {
            self.finished_at = Some(Utc::now());
        }
        self.state = TaskState::Cancelled;
        true
    }

    /// Apply the renderer's exit and release the slot.
    ///
    /// A prior cancellation request always wins over the exit status.
    pub fn finish(&mut self, success: bool) -> TaskState {
        self.assigned_slot = None;
        self.finished_at = Some(Utc::now());
        if self.state != TaskState::Cancelled {
            self.state = if success {
                TaskState::Done
            } else {
                TaskState::Failed
            };
        }
        self.state
    }

    /// Build the subscriber-facing status record.
    pub fn status(&self, store: &DataStore) -> TaskStatus {
        // A render that has stopped has written every checkpoint it reached.
        let checkpoints = match self.state {
            TaskState::Failed | TaskState::Cancelled => {
                self.settings.checkpoints_through(self.iter)
            }
            _ => self.settings.checkpoints_before(self.iter),
        };
        let mut output_urls: Vec<String> = checkpoints
            .into_iter()
            .map(|i| DataStore::path_to_url(&store.checkpoint_path(&self.id, i)))
            .collect();
        if self.state == TaskState::Done {
            output_urls.push(DataStore::path_to_url(&store.output_path(&self.id)));
        }

        TaskStatus {
            id: self.id.clone(),
            content_url: DataStore::path_to_url(&self.content_path),
            style_url: DataStore::path_to_url(&self.style_path),
            settings: self.settings.clone(),
            state: self.state,
            iter: self.iter,
            output_urls,
        }
    }
}

/// Snapshot of a task as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub id: TaskId,
    pub content_url: String,
    pub style_url: String,
    pub settings: RenderSettings,
    pub state: TaskState,
    pub iter: u32,
    pub output_urls: Vec<String>,
}
