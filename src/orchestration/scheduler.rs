//! Bounded FIFO scheduler.
//!
//! The Scheduler owns the wait queue and the [`GpuPool`]. Tasks are admitted
//! in arrival order; a task is dispatched only when a GPU slot is free, so
//! the number of running tasks never exceeds the pool size.
//!
//! Cancelled tasks are not removed from the queue eagerly. They are
//! discarded when they reach the front, without ever taking a slot, or
//! dropped when the same id is enqueued again.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::core::{TaskId, TaskState};
use crate::gpu::GpuPool;
use crate::orchestration::registry::TaskRegistry;

/// A task that has been given a slot and must now be supervised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub task_id: TaskId,
    pub slot: usize,
}

/// FIFO queue bounded by GPU capacity.
///
/// # Example
///
/// ```
/// use stylize::gpu::GpuPool;
/// use stylize::orchestration::Scheduler;
///
/// let scheduler = Scheduler::new(GpuPool::new(2));
/// assert_eq!(scheduler.capacity(), 2);
/// assert!(!scheduler.is_degraded());
/// ```
#[derive(Debug)]
pub struct Scheduler {
    queue: VecDeque<TaskId>,
    pool: GpuPool,
}

impl Scheduler {
    pub fn new(pool: GpuPool) -> Self {
        if pool.is_degraded() {
            warn!("No GPUs available: tasks will be accepted but never run");
        }
        Self {
            queue: VecDeque::new(),
            pool,
        }
    }

    /// Append a task to the back of the queue.
    ///
    /// Any earlier entry for the same id belongs to a finished task and is
    /// dropped, so a resubmitted task waits behind everything queued before
    /// it.
    pub fn enqueue(&mut self, id: TaskId) {
        self.queue.retain(|queued| queued != &id);
        debug!(task_id = %id, position = self.queue.len(), "Task enqueued");
        self.queue.push_back(id);
    }

    /// Dispatch the next runnable task, if a slot is free.
    ///
    /// Skips queue entries whose task is no longer `queued`. On success the
    /// task is moved to `running` on the acquired slot.
    pub fn next_dispatch(&mut self, registry: &mut TaskRegistry) -> Option<Dispatch> {
        while self.pool.has_capacity() {
            let id = self.queue.pop_front()?;
            let Some(task) = registry.get_mut(&id) else {
                warn!(task_id = %id, "Queued task missing from registry");
                continue;
            };
            if task.state != TaskState::Queued {
                debug!(task_id = %id, state = %task.state, "Discarding task at dequeue");
                continue;
            }
            let slot = self.pool.acquire()?;
            task.start(slot);
            debug!(task_id = %id, slot, "Task dispatched");
            return Some(Dispatch { task_id: id, slot });
        }
        None
    }

    /// Dispatch as many tasks as there are free slots.
    pub fn drain_ready(&mut self, registry: &mut TaskRegistry) -> Vec<Dispatch> {
        std::iter::from_fn(|| self.next_dispatch(registry)).collect()
    }

    /// Return a finished task's slot.
    pub fn complete(&mut self, slot: usize) {
        self.pool.release(slot);
    }

    /// Tasks waiting for a slot that have not been cancelled.
    pub fn queue_depth(&self, registry: &TaskRegistry) -> usize {
        self.queue
            .iter()
            .filter(|id| {
                registry
                    .get(id)
                    .is_some_and(|t| t.state == TaskState::Queued)
            })
            .count()
    }

    pub fn running_count(&self) -> usize {
        self.pool.occupied_count()
    }

    pub fn capacity(&self) -> usize {
        self.pool.size()
    }

    pub fn is_degraded(&self) -> bool {
        self.pool.is_degraded()
    }
}
