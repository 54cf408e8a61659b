//! Core domain types for render jobs.

pub mod settings;
pub mod task;

pub use settings::{InitMode, Optimizer, Pooling, RenderSettings};
pub use task::{Task, TaskId, TaskState, TaskStatus};
