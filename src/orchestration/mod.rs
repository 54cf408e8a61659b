//! Orchestration layer for the render engine.
//!
//! This module provides the task registry with crash recovery, the
//! GPU-bounded FIFO scheduler, render process supervision, and the event
//! publisher, tied together by the single-writer [`Engine`] loop.

mod engine;
mod events;
mod progress;
mod registry;
mod scheduler;
mod supervisor;

pub use engine::{Engine, EngineHandle};
pub use events::{EngineStatus, Event, Publisher, DEFAULT_CAPACITY};
pub use progress::{latest_iteration, ProgressTracker};
pub use registry::TaskRegistry;
pub use scheduler::{Dispatch, Scheduler};
pub use supervisor::{RenderInvocation, RenderSupervisor, RendererConfig, SupervisorMessage};
