//! Bounded timed queue
//!
//! Blocking ring buffer shared by the read loop, the decode loops and the
//! render pulls. Packets travel through expanding queues; decoded frames
//! travel through bounded ones, optionally kept in position order.
//!
//! ```text
//!   producer ── push() ──►  [head ........ tail)  ── pop()/pop_if() ──► consumer
//!                 ▲ blocks when full (bounded)          ▲ blocks when empty (wait)
//!                 └── woken at count == capacity/2      └── woken at count == 1
//! ```
//!
//! `head` and `tail` are monotonically increasing logical indices; the slot of
//! index `i` is `i & mask`. A single `parking_lot` mutex guards the ring and
//! one condition variable carries every wakeup.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Default queue capacity
pub const DEFAULT_CAPACITY: usize = 256;

/// Items that carry a presentation position
pub trait Timed {
    fn position(&self) -> i64;
}

/// Construction options for a `TimedQueue`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Requested capacity (rounded up to a power of two)
    pub capacity: usize,

    /// Keep items ordered by position (insertion pass on push)
    pub sorted: bool,

    /// Grow instead of blocking the producer when full
    pub expanding: bool,
}

impl QueueOptions {
    /// Fixed-size queue that blocks producers when full
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity,
            sorted: false,
            expanding: false,
        }
    }

    /// Fixed-size queue kept in position order
    pub fn sorted_bounded(capacity: usize) -> Self {
        Self {
            capacity,
            sorted: true,
            expanding: false,
        }
    }

    /// Queue that doubles its storage instead of blocking
    pub fn expanding(capacity: usize) -> Self {
        Self {
            capacity,
            sorted: false,
            expanding: true,
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::expanding(DEFAULT_CAPACITY)
    }
}

struct Ring<T> {
    slots: Vec<Option<T>>,
    head: u64,
    tail: u64,
    mask: u64,

    /// Bumped on every flush so blocked producers can tell they were released
    flushes: u64,

    /// Bumped by `wake_waiters` so blocked consumers re-examine their state
    wakeups: u64,

    destroyed: bool,
}

impl<T: Timed> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            tail: 0,
            mask: capacity as u64 - 1,
            flushes: 0,
            wakeups: 0,
            destroyed: false,
        }
    }

    fn count(&self) -> usize {
        (self.tail - self.head) as usize
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, index: u64) -> usize {
        (index & self.mask) as usize
    }

    /// Double the storage, re-laying items out from slot 0
    fn grow(&mut self) {
        let capacity = self.capacity() * 2;
        let mut slots: Vec<Option<T>> = Vec::with_capacity(capacity);
        for index in self.head..self.tail {
            let slot = self.slot(index);
            slots.push(self.slots[slot].take());
        }
        slots.resize_with(capacity, || None);
        self.tail -= self.head;
        self.head = 0;
        self.mask = capacity as u64 - 1;
        self.slots = slots;
    }

    fn insert(&mut self, item: T, sorted: bool) {
        let mut index = self.tail;
        let slot = self.slot(index);
        self.slots[slot] = Some(item);
        self.tail += 1;

        if !sorted {
            return;
        }
        while index > self.head {
            let current = self.slot(index);
            let previous = self.slot(index - 1);
            let out_of_order = match (&self.slots[previous], &self.slots[current]) {
                (Some(prev), Some(cur)) => prev.position() > cur.position(),
                _ => false,
            };
            if !out_of_order {
                break;
            }
            self.slots.swap(previous, current);
            index -= 1;
        }
    }

    fn drain(&mut self) -> VecDeque<T> {
        let mut items = VecDeque::with_capacity(self.count());
        for index in self.head..self.tail {
            let slot = self.slot(index);
            if let Some(item) = self.slots[slot].take() {
                items.push_back(item);
            }
        }
        self.head = 0;
        self.tail = 0;
        items
    }
}

/// Blocking ring buffer of positioned items
pub struct TimedQueue<T: Timed> {
    ring: Mutex<Ring<T>>,
    condvar: Condvar,
    sorted: bool,
    expanding: bool,
}

impl<T: Timed> TimedQueue<T> {
    pub fn new(options: QueueOptions) -> Self {
        let capacity = options.capacity.max(1).next_power_of_two();
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            condvar: Condvar::new(),
            sorted: options.sorted,
            expanding: options.expanding,
        }
    }

    /// Insert an item at the tail
    ///
    /// Returns `false` when the item was dropped: the queue is shut down, or
    /// the producer was blocked on a full bounded queue and a flush released
    /// it.
    pub fn push(&self, item: T) -> bool {
        let mut ring = self.ring.lock();
        if ring.destroyed {
            return false;
        }

        if ring.count() >= ring.capacity() {
            if self.expanding {
                ring.grow();
            } else {
                let flushes = ring.flushes;
                while ring.count() >= ring.capacity() && !ring.destroyed && ring.flushes == flushes {
                    self.condvar.wait(&mut ring);
                }
                if ring.destroyed || ring.flushes != flushes {
                    return false;
                }
            }
        }

        ring.insert(item, self.sorted);
        if ring.count() == 1 {
            self.condvar.notify_all();
        }
        true
    }

    /// Remove the head item
    ///
    /// With `wait`, an empty queue blocks until an item arrives, a flush, a
    /// `wake_waiters` call or shutdown, then returns whatever is there (which
    /// may still be nothing).
    pub fn pop(&self, wait: bool) -> Option<T> {
        self.pop_if(wait, |_| true)
    }

    /// Remove the head item only if `accept` approves it
    ///
    /// A rejected head stays in place and the queue is left unchanged.
    pub fn pop_if<F>(&self, wait: bool, accept: F) -> Option<T>
    where
        F: FnOnce(&T) -> bool,
    {
        self.pop_inner(wait, || false, accept)
    }

    /// Blocking pop that gives up instead of waiting once `stop` holds
    ///
    /// `stop` is evaluated under the queue lock before every wait, so a
    /// condition set before `wake_waiters` is never missed.
    pub fn pop_wait_unless<S>(&self, stop: S) -> Option<T>
    where
        S: Fn() -> bool,
    {
        self.pop_inner(true, stop, |_| true)
    }

    fn pop_inner<S, F>(&self, wait: bool, stop: S, accept: F) -> Option<T>
    where
        S: Fn() -> bool,
        F: FnOnce(&T) -> bool,
    {
        let mut ring = self.ring.lock();
        if ring.destroyed {
            return None;
        }

        if ring.count() == 0 {
            if !wait || stop() {
                return None;
            }
            let flushes = ring.flushes;
            let wakeups = ring.wakeups;
            while ring.count() == 0
                && !ring.destroyed
                && ring.flushes == flushes
                && ring.wakeups == wakeups
                && !stop()
            {
                self.condvar.wait(&mut ring);
            }
            if ring.destroyed || ring.count() == 0 {
                return None;
            }
        }

        let slot = ring.slot(ring.head);
        let accepted = match &ring.slots[slot] {
            Some(item) => accept(item),
            None => false,
        };
        if !accepted {
            return None;
        }

        let item = ring.slots[slot].take();
        ring.head += 1;
        if ring.count() == ring.capacity() >> 1 {
            self.condvar.notify_all();
        }
        item
    }

    /// Drop every item and wake all waiters
    pub fn flush(&self) {
        let dropped = {
            let mut ring = self.ring.lock();
            let items = ring.drain();
            ring.flushes += 1;
            self.condvar.notify_all();
            items
        };
        // Payloads return to their pools outside the lock
        drop(dropped);
    }

    /// Terminal: flush and refuse every later push and pop
    pub fn shutdown(&self) {
        self.ring.lock().destroyed = true;
        self.flush();
    }

    /// Release consumers blocked on an empty queue without adding anything
    pub fn wake_waiters(&self) {
        let mut ring = self.ring.lock();
        ring.wakeups += 1;
        self.condvar.notify_all();
    }

    pub fn count(&self) -> usize {
        self.ring.lock().count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Current storage capacity (grows for expanding queues)
    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    pub fn is_shutdown(&self) -> bool {
        self.ring.lock().destroyed
    }

    /// Positions from head to tail
    pub fn positions(&self) -> Vec<i64> {
        let ring = self.ring.lock();
        (ring.head..ring.tail)
            .filter_map(|index| ring.slots[ring.slot(index)].as_ref())
            .map(Timed::position)
            .collect()
    }
}

impl<T: Timed> Default for TimedQueue<T> {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

impl<T: Timed> std::fmt::Debug for TimedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("TimedQueue")
            .field("count", &ring.count())
            .field("capacity", &ring.capacity())
            .field("sorted", &self.sorted)
            .field("expanding", &self.expanding)
            .field("destroyed", &ring.destroyed)
            .finish()
    }
}
