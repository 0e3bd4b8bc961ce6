use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies which head item a consumer declined.
///
/// The generation advances every time the head is removed, so a consumer that
/// saw a foreign head can park until that item has been claimed by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadTicket(u64);

/// Outcome of a role-filtered dequeue
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeue<T> {
    /// The head matched the caller's predicate and was removed
    Claimed(T),
    /// The head belongs to another role and was left in place
    NotOwned(HeadTicket),
    /// The buffer is empty and no more items arrive in this phase
    Drained,
    /// The buffer is tearing down
    Closed,
}

/// Fixed-size circular storage. Every field is guarded by the buffer mutex.
struct Slots<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
    /// Producer finished emitting items for the current phase
    exhausted: bool,
    closed: bool,
    generation: u64,
    peak: usize,
}

impl<T> Slots<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            count: 0,
            exhausted: false,
            closed: false,
            generation: 0,
            peak: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    fn push(&mut self, item: T) {
        debug_assert!(!self.is_full());
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.count += 1;
        self.peak = self.peak.max(self.count);
    }

    fn peek(&self) -> Option<&T> {
        if self.count == 0 {
            None
        } else {
            self.slots[self.head].as_ref()
        }
    }

    fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.count -= 1;
        self.generation = self.generation.wrapping_add(1);
        item
    }
}

struct Shared<T> {
    state: Mutex<Slots<T>>,
    space_available: Condvar,
    item_available: Condvar,
    block_count: AtomicU64,
}

/// A bounded ring buffer guarded by one mutex and two condition variables.
///
/// Producers block while the buffer is full. Consumers block while it is empty
/// and the current phase is not yet exhausted. Consumers only remove the head
/// when their predicate accepts it, so several roles can share one queue
/// without stealing each other's items.
pub struct RingBuffer<T> {
    shared: Arc<Shared<T>>,
    capacity: usize,
}

impl<T> Clone for RingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            capacity: self.capacity,
        }
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the specified capacity
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Slots::with_capacity(capacity)),
                space_available: Condvar::new(),
                item_available: Condvar::new(),
                block_count: AtomicU64::new(0),
            }),
            capacity,
        }
    }

    /// Insert an item at the tail, blocking while the buffer is full.
    ///
    /// Returns the item back if the buffer is closed, either before the call
    /// or while the caller was waiting for space.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(item);
        }
        if state.is_full() {
            self.shared.block_count.fetch_add(1, Ordering::Relaxed);
        }
        while state.is_full() {
            self.shared.space_available.wait(&mut state);
            if state.closed {
                return Err(item);
            }
        }
        state.push(item);
        drop(state);

        // Every role re-checks the head against its own predicate
        self.shared.item_available.notify_all();
        Ok(())
    }

    /// Remove the head item if `owns` accepts it.
    ///
    /// Blocks while the buffer is empty and the phase is not exhausted. A
    /// declined head stays in place for whichever role owns it.
    pub fn dequeue_if<F>(&self, owns: F) -> Dequeue<T>
    where
        F: FnOnce(&T) -> bool,
    {
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Dequeue::Closed;
            }
            if state.count > 0 {
                break;
            }
            if state.exhausted {
                return Dequeue::Drained;
            }
            self.shared.item_available.wait(&mut state);
        }

        if !state.peek().is_some_and(owns) {
            return Dequeue::NotOwned(HeadTicket(state.generation));
        }

        let item = match state.pop() {
            Some(item) => item,
            None => return Dequeue::NotOwned(HeadTicket(state.generation)),
        };
        drop(state);

        self.shared.space_available.notify_one();
        // The head changed, so roles parked on a foreign head must look again
        self.shared.item_available.notify_all();
        Dequeue::Claimed(item)
    }

    /// Park until the head identified by `ticket` has been removed.
    ///
    /// Also returns once the buffer is empty or closed so the caller can
    /// observe drain or teardown through [`RingBuffer::dequeue_if`].
    pub fn wait_for_head_change(&self, ticket: HeadTicket) {
        let mut state = self.shared.state.lock();
        while !state.closed && state.count > 0 && state.generation == ticket.0 {
            self.shared.item_available.wait(&mut state);
        }
    }

    /// Flag the current phase as exhausted and wake every waiting consumer
    pub fn mark_exhausted(&self) {
        let mut state = self.shared.state.lock();
        state.exhausted = true;
        drop(state);
        self.shared.item_available.notify_all();
    }

    /// Clear the exhausted flag ahead of the next phase
    pub fn reopen(&self) {
        self.shared.state.lock().exhausted = false;
    }

    /// Tear the buffer down. Blocked producers and consumers return at once.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        drop(state);
        self.shared.space_available.notify_all();
        self.shared.item_available.notify_all();
    }

    /// Whether the buffer has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Whether the producer has flagged the current phase as exhausted
    pub fn is_exhausted(&self) -> bool {
        self.shared.state.lock().exhausted
    }

    /// Get the current number of buffered items
    pub fn len(&self) -> usize {
        self.shared.state.lock().count
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the capacity of the buffer
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest item count observed since creation
    pub fn peak(&self) -> usize {
        self.shared.state.lock().peak
    }

    /// Get the utilization of the buffer as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.capacity).min(100) as u32
    }

    /// Number of enqueue calls that found the buffer full
    pub fn block_count(&self) -> u64 {
        self.shared.block_count.load(Ordering::Relaxed)
    }
}
