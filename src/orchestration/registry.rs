//! Task registry and crash recovery.
//!
//! The registry is the in-memory list of every task known to this process,
//! newest first. It never shrinks while the process runs.
//!
//! At startup [`TaskRegistry::recover`] rebuilds it from the data directory
//! alone. There is no journal: a task's state is inferred from which of its
//! artifacts exist.
//!
//! | On disk                                  | Recovered as            |
//! |------------------------------------------|-------------------------|
//! | settings + content + style + output      | `done`, iter = total    |
//! | settings + content + style               | `failed`, iter = newest checkpoint |
//! | anything less                            | ignored                 |

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::core::{Task, TaskId, TaskState, TaskStatus};
use crate::error::{Error, Result};
use crate::storage::{Artifact, DataStore, Purpose};

/// Artifacts found on disk for one task id.
#[derive(Debug, Default)]
struct ArtifactGroup {
    settings: Option<PathBuf>,
    content: Option<PathBuf>,
    style: Option<PathBuf>,
    has_final_output: bool,
    last_checkpoint: u32,
}

impl ArtifactGroup {
    fn add(&mut self, artifact: Artifact) {
        let name = &artifact.name;
        if name.is_settings() {
            self.settings = Some(artifact.path);
        } else if name.is_input_image(Purpose::Content) {
            prefer_jpg(&mut self.content, artifact.path);
        } else if name.is_input_image(Purpose::Style) {
            prefer_jpg(&mut self.style, artifact.path);
        } else if name.is_final_output() {
            self.has_final_output = true;
        } else if let Some(iteration) = name.checkpoint_iteration() {
            self.last_checkpoint = self.last_checkpoint.max(iteration);
        }
    }
}

/// Keep the `.jpg` when both extensions exist, matching upload lookup.
fn prefer_jpg(slot: &mut Option<PathBuf>, candidate: PathBuf) {
    let is_jpg = |p: &PathBuf| {
        p.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jpg"))
    };
    match slot {
        Some(existing) if is_jpg(existing) => {}
        _ => *slot = Some(candidate),
    }
}

/// Ordered collection of tasks, newest first.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the registry from the data directory.
    ///
    /// Incomplete groups are ignored. A task whose settings record cannot
    /// be read is skipped with a warning; the rest of the scan continues.
    /// Only a failure to enumerate the directory itself is an error.
    pub async fn recover(store: &DataStore) -> Result<Self> {
        let mut groups: BTreeMap<TaskId, ArtifactGroup> = BTreeMap::new();
        for artifact in store.list().await? {
            groups
                .entry(artifact.name.id.clone())
                .or_default()
                .add(artifact);
        }

        let mut tasks = Vec::new();
        for (id, group) in groups {
            let (Some(settings_path), Some(content), Some(style)) =
                (group.settings, group.content, group.style)
            else {
                debug!(task_id = %id, "Skipping incomplete artifact group");
                continue;
            };

            let settings = match store.load_settings(&settings_path).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(task_id = %id, path = %settings_path.display(), error = %e, "Skipping task with unreadable settings");
                    continue;
                }
            };
            if let Err(e) = settings.validate() {
                warn!(task_id = %id, path = %settings_path.display(), error = %e, "Skipping task with invalid settings");
                continue;
            }
            let created_at = match store.modified_at(&settings_path).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(task_id = %id, path = %settings_path.display(), error = %e, "Skipping task without settings timestamp");
                    continue;
                }
            };

            tasks.push(Task::recovered(
                id,
                content,
                style,
                settings,
                group.has_final_output,
                group.last_checkpoint,
                created_at,
            ));
        }

        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        info!(recovered = tasks.len(), root = %store.root().display(), "Recovered tasks from disk");
        Ok(Self { tasks })
    }

    /// Add a freshly submitted task at the front.
    ///
    /// An id that is still queued, running, or holding a slot is rejected.
    /// A finished task with the same id is replaced.
    pub fn insert(&mut self, task: Task) -> Result<()> {
        if let Some(pos) = self.position(&task.id) {
            let existing = &self.tasks[pos];
            if existing.state.is_active() || existing.assigned_slot.is_some() {
                return Err(Error::TaskActive(task.id.to_string()));
            }
            self.tasks.remove(pos);
        }
        self.tasks.insert(0, task);
        Ok(())
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.id == id)
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    /// Tasks newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Running)
            .count()
    }

    /// Status records for every task, newest first.
    pub fn statuses(&self, store: &DataStore) -> Vec<TaskStatus> {
        self.tasks.iter().map(|t| t.status(store)).collect()
    }
}
