//! GPU discovery and slot accounting.

mod inventory;
mod pool;

pub use inventory::{GpuInventory, GpuTelemetry, Inventory};
pub use pool::GpuPool;
