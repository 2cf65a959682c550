use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Bounded FIFO handing packets from the ingest thread to the frame thread.
///
/// `push` blocks while the queue is full, `pop` blocks while it is empty.
/// After [`PacketQueue::shutdown`] pushes are refused, while pops keep
/// returning the items that were already accepted until the queue is drained.
pub struct PacketQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> PacketQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY)),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // a panicking holder cannot leave the deque half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends `item`, waiting for room. Hands the item back once the queue
    /// has been shut down.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.lock();
        while state.items.len() >= self.capacity && !state.shutdown {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        if state.shutdown {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the oldest item, waiting until one is available. Returns `None`
    /// only when the queue is shut down and empty.
    pub fn pop(&self) -> Option<T> {
        let mut state = self
            .not_empty
            .wait_while(self.lock(), |s| s.items.is_empty() && !s.shutdown)
            .unwrap_or_else(|e| e.into_inner());
        let item = state.items.pop_front();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Refuses further pushes and wakes every waiter.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for PacketQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
