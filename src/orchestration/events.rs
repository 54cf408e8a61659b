//! Status and render events.
//!
//! Two kinds of event fan out to every subscriber:
//!
//! - `status`: queue depth, capacity and a fresh GPU telemetry snapshot,
//!   published on an interval and after submissions and render exits.
//! - `render`: a task's full status, published on every state or
//!   progress change.
//!
//! Nothing is retained. A subscriber that attaches late pulls a snapshot
//! through the engine handle instead.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::core::TaskStatus;
use crate::gpu::GpuTelemetry;

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Engine-wide status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    /// Tasks waiting for a slot.
    pub queue_depth: usize,
    /// GPU pool size, fixed at startup.
    pub capacity: usize,
    /// True when there are no GPUs and queued tasks can never run.
    pub degraded: bool,
    pub gpus: Vec<GpuTelemetry>,
}

/// An event delivered to subscribers.
///
/// Serialized as `{"type": "status" | "render", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Event {
    Status(EngineStatus),
    Render(TaskStatus),
}

/// Fan-out publisher over a broadcast channel.
///
/// Slow subscribers that fall more than the channel capacity behind see a
/// `RecvError::Lagged` and skip ahead.
#[derive(Debug, Clone)]
pub struct Publisher {
    sender: broadcast::Sender<Event>,
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: Event) {
        // Ignore the SendError, it only means there are zero receivers.
        let receivers = self.sender.send(event).unwrap_or(0);
        trace!(receivers, "Event published");
    }

    pub fn render(&self, status: TaskStatus) {
        self.publish(Event::Render(status));
    }

    pub fn status(&self, status: EngineStatus) {
        self.publish(Event::Status(status));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
