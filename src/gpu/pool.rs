//! GPU slot pool.
//!
//! The `GpuPool` hands out device indices `0..size` to running renders,
//! one render per device. Its size is fixed at startup from the inventory;
//! a pool of size zero is valid and simply never has capacity.

use std::collections::VecDeque;

use tracing::warn;

use crate::gpu::inventory::Inventory;

/// Tracks which GPU slots are free.
///
/// Slots are identified by device index. A slot is either free (in the
/// queue) or held by exactly one running task; `free_count() +
/// occupied_count() == size()` always holds.
///
/// # Example
///
/// ```
/// use stylize::gpu::GpuPool;
///
/// let mut pool = GpuPool::new(2);
/// let slot = pool.acquire().unwrap();
/// assert_eq!(pool.occupied_count(), 1);
/// assert!(pool.release(slot));
/// ```
#[derive(Debug, Clone)]
pub struct GpuPool {
    size: usize,
    free: VecDeque<usize>,
}

impl GpuPool {
    /// Create a pool with slots `0..size`, all free.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            free: (0..size).collect(),
        }
    }

    /// Size the pool from the number of attached devices.
    pub fn from_inventory(inventory: &Inventory) -> Self {
        Self::new(inventory.attached)
    }

    /// Take the free slot that has been free the longest.
    ///
    /// Returns `None` when every slot is held.
    pub fn acquire(&mut self) -> Option<usize> {
        self.free.pop_front()
    }

    /// Return a slot to the pool.
    ///
    /// Releasing a slot that is out of range or already free is ignored
    /// and returns false.
    pub fn release(&mut self, slot: usize) -> bool {
        if slot >= self.size {
            warn!(slot, size = self.size, "Release of unknown GPU slot ignored");
            return false;
        }
        if self.free.contains(&slot) {
            warn!(slot, "Double release of GPU slot ignored");
            return false;
        }
        self.free.push_back(slot);
        true
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn occupied_count(&self) -> usize {
        self.size - self.free.len()
    }

    /// Check if the pool has a free slot.
    pub fn has_capacity(&self) -> bool {
        !self.free.is_empty()
    }

    /// A pool with no devices at all.
    pub fn is_degraded(&self) -> bool {
        self.size == 0
    }
}
