//! The render engine.
//!
//! All bookkeeping (registry, scheduler, GPU pool) is owned by one tokio
//! task, the engine loop. Everything else talks to it by message:
//!
//! ```text
//!  EngineHandle ──Command──▶ ┌─────────────┐ ──spawn──▶ RenderSupervisor
//!                            │ engine loop │                 │
//!  status ticker ─Command──▶ └─────────────┘ ◀─Progress/Exited─┘
//!                                   │
//!                              Publisher ──Event──▶ subscribers
//! ```
//!
//! Because the loop handles one message at a time, a mutation always
//! completes before the next one starts and no locks are needed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::{RenderSettings, Task, TaskId, TaskState, TaskStatus};
use crate::error::{Error, Result};
use crate::gpu::{GpuInventory, GpuPool};
use crate::orchestration::events::{EngineStatus, Event, Publisher};
use crate::orchestration::registry::TaskRegistry;
use crate::orchestration::scheduler::{Dispatch, Scheduler};
use crate::orchestration::supervisor::{
    RenderInvocation, RenderSupervisor, RendererConfig, SupervisorMessage,
};
use crate::storage::{DataStore, Purpose};

/// Queue figures reported by the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueSnapshot {
    queue_depth: usize,
    capacity: usize,
    degraded: bool,
}

enum Command {
    Submit {
        id: TaskId,
        settings: RenderSettings,
        reply: oneshot::Sender<Result<TaskStatus>>,
    },
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<()>,
    },
    Queue {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    TaskStatuses {
        reply: oneshot::Sender<Vec<TaskStatus>>,
    },
}

/// A prepared engine that has not started running yet.
///
/// Created by [`Engine::new`], which queries the GPUs and recovers tasks
/// from disk. Subscribe before calling [`Engine::start`] to receive the
/// render events of recovered tasks.
pub struct Engine {
    store: DataStore,
    inventory: GpuInventory,
    registry: TaskRegistry,
    scheduler: Scheduler,
    renderer: RendererConfig,
    publisher: Publisher,
    status_interval: Duration,
}

impl Engine {
    pub async fn new(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;
        let store = DataStore::new(config.data_dir()?);
        let inventory = GpuInventory::from_config(config);

        let pool = GpuPool::from_inventory(&inventory.query().await);
        info!(gpus = pool.size(), "GPU pool sized");
        let registry = TaskRegistry::recover(&store).await?;

        Ok(Self {
            store,
            inventory,
            registry,
            scheduler: Scheduler::new(pool),
            renderer: RendererConfig::from_config(config),
            publisher: Publisher::default(),
            status_interval: config.status_interval(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.publisher.subscribe()
    }

    /// Publish recovered tasks and spawn the engine loop and status ticker.
    pub fn start(self) -> EngineHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let nudge = Arc::new(Notify::new());

        for task in self.registry.iter().rev() {
            self.publisher.render(task.status(&self.store));
        }

        let handle = EngineHandle {
            cmd_tx,
            publisher: self.publisher.clone(),
            inventory: self.inventory.clone(),
            store: self.store.clone(),
            shutdown: shutdown.clone(),
        };

        let core = EngineCore {
            store: self.store,
            registry: self.registry,
            scheduler: self.scheduler,
            renderer: self.renderer,
            publisher: self.publisher,
            tokens: HashMap::new(),
            msg_tx,
            shutdown: shutdown.clone(),
            nudge: nudge.clone(),
        };
        tokio::spawn(core.run(cmd_rx, msg_rx));
        tokio::spawn(status_loop(handle.clone(), self.status_interval, nudge));

        info!("Render engine started");
        handle
    }
}

/// State owned by the engine loop.
struct EngineCore {
    store: DataStore,
    registry: TaskRegistry,
    scheduler: Scheduler,
    renderer: RendererConfig,
    publisher: Publisher,
    /// Cancellation tokens of running renders.
    tokens: HashMap<TaskId, CancellationToken>,
    msg_tx: mpsc::UnboundedSender<SupervisorMessage>,
    shutdown: CancellationToken,
    nudge: Arc<Notify>,
}

impl EngineCore {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut msg_rx: mpsc::UnboundedReceiver<SupervisorMessage>,
    ) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(msg) = msg_rx.recv() => self.handle_message(msg),
            }
        }
        // Child tokens kill every running render.
        self.shutdown.cancel();
        info!(running = self.tokens.len(), "Render engine stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit {
                id,
                settings,
                reply,
            } => {
                let result = self.submit(id, settings).await;
                let _ = reply.send(result);
            }
            Command::Cancel { id, reply } => {
                self.cancel(&id);
                let _ = reply.send(());
            }
            Command::Queue { reply } => {
                let _ = reply.send(QueueSnapshot {
                    queue_depth: self.scheduler.queue_depth(&self.registry),
                    capacity: self.scheduler.capacity(),
                    degraded: self.scheduler.is_degraded(),
                });
            }
            Command::TaskStatuses { reply } => {
                let _ = reply.send(self.registry.statuses(&self.store));
            }
        }
    }

    async fn submit(&mut self, id: TaskId, settings: RenderSettings) -> Result<TaskStatus> {
        if let Some(existing) = self.registry.get(&id) {
            if existing.state.is_active() || existing.assigned_slot.is_some() {
                return Err(Error::TaskActive(id.to_string()));
            }
        }

        self.store.save_settings(&id, &settings).await?;
        let content = self.store.find_image(&id, Purpose::Content).await?;
        let style = self.store.find_image(&id, Purpose::Style).await?;

        let task = Task::new(id.clone(), content, style, settings);
        let status = task.status(&self.store);
        self.registry.insert(task)?;
        self.publisher.render(status.clone());
        info!(task_id = %id, "Task submitted");

        if self.scheduler.is_degraded() {
            warn!(task_id = %id, "No GPUs available, task will stay queued");
        }
        self.scheduler.enqueue(id);
        self.dispatch();
        self.nudge.notify_one();
        Ok(status)
    }

    fn cancel(&mut self, id: &TaskId) {
        let Some(task) = self.registry.get_mut(id) else {
            debug!(task_id = %id, "Cancel for unknown task ignored");
            return;
        };
        if !task.cancel() {
            debug!(task_id = %id, state = %task.state, "Cancel for finished task ignored");
            return;
        }
        info!(task_id = %id, "Task cancelled");
        self.publisher.render(task.status(&self.store));
        if let Some(token) = self.tokens.get(id) {
            token.cancel();
        }
    }

    fn handle_message(&mut self, msg: SupervisorMessage) {
        match msg {
            SupervisorMessage::Progress { task_id, iter } => {
                let Some(task) = self.registry.get_mut(&task_id) else {
                    return;
                };
                if task.state == TaskState::Running && task.record_progress(iter) {
                    debug!(task_id = %task_id, iter = task.iter, "Progress");
                    self.publisher.render(task.status(&self.store));
                }
            }
            SupervisorMessage::Exited {
                task_id,
                slot,
                success,
            } => {
                self.tokens.remove(&task_id);
                self.scheduler.complete(slot);
                match self.registry.get_mut(&task_id) {
                    Some(task) if task.assigned_slot == Some(slot) => {
                        let state = task.finish(success);
                        info!(task_id = %task_id, slot, state = %state, iter = task.iter, "Render finished");
                        self.publisher.render(task.status(&self.store));
                    }
                    _ => warn!(task_id = %task_id, slot, "Exit for unknown render ignored"),
                }
                self.dispatch();
                self.nudge.notify_one();
            }
        }
    }

    /// Start supervisors for every task that can take a free slot.
    fn dispatch(&mut self) {
        for Dispatch { task_id, slot } in self.scheduler.drain_ready(&mut self.registry) {
            let Some(task) = self.registry.get(&task_id) else {
                continue;
            };
            self.publisher.render(task.status(&self.store));

            let invocation =
                RenderInvocation::new(&self.renderer, task, slot, &self.store.output_path(&task_id));
            let token = self.shutdown.child_token();
            self.tokens.insert(task_id.clone(), token.clone());
            RenderSupervisor::new(invocation, task_id, slot, token, self.msg_tx.clone()).spawn();
        }
    }
}

/// Publish a status event on every tick and whenever nudged.
async fn status_loop(handle: EngineHandle, period: Duration, nudge: Arc<Notify>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = handle.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
            _ = nudge.notified() => {}
        }
        match handle.current_status().await {
            Ok(status) => handle.publisher.status(status),
            Err(_) => break,
        }
    }
    debug!("Status ticker stopped");
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    publisher: Publisher,
    inventory: GpuInventory,
    store: DataStore,
    shutdown: CancellationToken,
}

impl EngineHandle {
    /// Submit a render.
    ///
    /// `raw_settings` is merged over the defaults. The returned status is
    /// `queued` with `iter == 0`; its render event has already been
    /// published when this returns.
    pub async fn submit(&self, id: &str, raw_settings: serde_json::Value) -> Result<TaskStatus> {
        let id = TaskId::parse(id)?;
        let settings = RenderSettings::merged(raw_settings)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            id,
            settings,
            reply,
        })?;
        rx.await.map_err(|_| Error::EngineStopped)?
    }

    /// Cancel a queued or running task. Unknown and finished ids are
    /// ignored.
    pub async fn cancel(&self, id: &str) {
        let Ok(id) = TaskId::parse(id) else {
            debug!(id, "Cancel with invalid id ignored");
            return;
        };
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Cancel { id, reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Queue figures plus a fresh telemetry query.
    pub async fn current_status(&self) -> Result<EngineStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Queue { reply })?;
        let queue = rx.await.map_err(|_| Error::EngineStopped)?;
        let inventory = self.inventory.query().await;
        Ok(EngineStatus {
            queue_depth: queue.queue_depth,
            capacity: queue.capacity,
            degraded: queue.degraded,
            gpus: inventory.devices,
        })
    }

    /// Every task's status, newest first.
    pub async fn all_task_statuses(&self) -> Result<Vec<TaskStatus>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::TaskStatuses { reply })?;
        rx.await.map_err(|_| Error::EngineStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.publisher.subscribe()
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// Stop the engine and kill every running render.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the engine has been shut down.
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await;
    }

    fn send(&self, cmd: Command) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::EngineStopped);
        }
        self.cmd_tx.send(cmd).map_err(|_| Error::EngineStopped)
    }
}
