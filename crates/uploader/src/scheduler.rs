//! Fair-share concurrency scheduler.
//!
//! A fixed global ceiling is split evenly across every task that is
//! processing or uploading: `ceil(ceiling / active)` each. The share is
//! recomputed before every dispatch burst, so survivors pick up the headroom
//! of finished tasks. Capacity is handed out as [`ConcurrencySlot`] permits.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out at most `ceiling` concurrent chunk slots.
#[derive(Debug)]
pub struct ConcurrencyScheduler {
    ceiling: usize,
    in_flight: Arc<AtomicUsize>,
}

impl ConcurrencyScheduler {
    /// Creates a scheduler with the given global ceiling.
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Per-task share of the ceiling with `active_tasks` competing.
    pub fn per_task_limit(&self, active_tasks: usize) -> usize {
        if active_tasks == 0 {
            return self.ceiling;
        }
        self.ceiling.div_ceil(active_tasks)
    }

    /// How many more chunks a task holding `task_in_flight` slots may start
    /// right now.
    ///
    /// Bounded by both the task's share and the global free capacity.
    pub fn grant(&self, task_in_flight: usize, active_tasks: usize) -> usize {
        let share = self
            .per_task_limit(active_tasks)
            .saturating_sub(task_in_flight);
        let free = self.ceiling.saturating_sub(self.in_flight());
        share.min(free)
    }

    /// Takes one slot, or `None` if the ceiling is reached.
    pub fn acquire(&self) -> Option<ConcurrencySlot> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.ceiling).then_some(n + 1)
            })
            .ok()
            .map(|_| ConcurrencySlot {
                in_flight: Arc::clone(&self.in_flight),
            })
    }
}

/// Permit for one in-flight chunk request. Released on drop.
#[derive(Debug)]
pub struct ConcurrencySlot {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
