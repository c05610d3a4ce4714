//! Task Pool
//!
//! Counting semaphore bounding how many external commands run at once.
//! Process threads block in [`TaskPool::acquire`] until a slot frees up; the
//! returned [`Slot`] gives it back when dropped.
//!
//! Aborting the pool wakes every waiter and makes all further acquisitions
//! fail, which is how a failing process stops the rest of the run from
//! starting new work.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use log::debug;

#[derive(Debug)]
struct PoolState {
    available: usize,
    in_use: usize,
    aborted: bool,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    state: Mutex<PoolState>,
    freed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A panicking holder cannot leave the counters half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounded pool of command slots, shared between process threads.
#[derive(Debug, Clone)]
pub struct TaskPool {
    shared: Arc<Shared>,
}

impl TaskPool {
    /// Creates a pool with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                capacity,
                state: Mutex::new(PoolState {
                    available: capacity,
                    in_use: 0,
                    aborted: false,
                }),
                freed: Condvar::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Blocks until a slot is free. Returns `None` once the pool is aborted.
    pub fn acquire(&self) -> Option<Slot> {
        let mut state = self.shared.lock();
        while state.available == 0 && !state.aborted {
            state = self
                .shared
                .freed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if state.aborted {
            return None;
        }
        state.available -= 1;
        state.in_use += 1;
        Some(Slot {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Stops handing out slots and wakes every waiter.
    pub fn abort(&self) {
        let mut state = self.shared.lock();
        if !state.aborted {
            debug!("Task pool aborted ({} commands in flight)", state.in_use);
            state.aborted = true;
        }
        self.shared.freed.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.lock().aborted
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.shared.lock().in_use
    }
}

/// A held command slot. Released on drop.
#[derive(Debug)]
pub struct Slot {
    shared: Arc<Shared>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.available += 1;
        state.in_use -= 1;
        self.shared.freed.notify_one();
    }
}
