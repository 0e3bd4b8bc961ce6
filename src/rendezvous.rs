use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Counts {
    /// Consumers whose threads are alive
    registered: usize,
    /// Consumers currently participating in the phase
    active: usize,
    /// Consumers that observed drain in the phase
    left: usize,
    cancelled: bool,
}

impl Counts {
    fn phase_drained(&self) -> bool {
        self.active == 0 && self.left >= self.registered
    }
}

/// Phase barrier between the producer and a pool of consumers.
///
/// Consumers `enter` when they start a phase and `leave` when they observe the
/// buffer empty and exhausted. The producer's wait returns once no consumer is
/// active and every registered consumer has left, so a consumer that has not
/// yet re-entered after a phase change cannot make the phase look drained.
#[derive(Debug, Default)]
pub struct CompletionRendezvous {
    counts: Mutex<Counts>,
    all_left: Condvar,
}

impl CompletionRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a consumer in. Call before its thread starts.
    pub fn register(&self) {
        self.counts.lock().registered += 1;
    }

    /// A consumer begins participating in the current phase
    pub fn enter(&self) {
        self.counts.lock().active += 1;
    }

    /// A consumer observed drain for the current phase
    pub fn leave(&self) {
        let mut counts = self.counts.lock();
        debug_assert!(counts.active > 0, "leave() without matching enter()");
        counts.active = counts.active.saturating_sub(1);
        counts.left += 1;
        let drained = counts.phase_drained();
        drop(counts);
        if drained {
            self.all_left.notify_all();
        }
    }

    /// A consumer thread is exiting. Returns how many consumers remain alive.
    pub fn retire(&self, was_active: bool) -> usize {
        let mut counts = self.counts.lock();
        counts.registered = counts.registered.saturating_sub(1);
        if was_active {
            counts.active = counts.active.saturating_sub(1);
        }
        let remaining = counts.registered;
        drop(counts);
        self.all_left.notify_all();
        remaining
    }

    /// Producer only: block until every consumer has left the current phase
    pub fn wait_all_left(&self) -> Result<()> {
        let mut counts = self.counts.lock();
        while !counts.cancelled && !counts.phase_drained() {
            self.all_left.wait(&mut counts);
        }
        if counts.cancelled {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Producer only: forget the departures of the phase that just drained
    pub fn reset_phase(&self) {
        self.counts.lock().left = 0;
    }

    /// Number of consumers still alive
    pub fn alive(&self) -> usize {
        self.counts.lock().registered
    }

    /// Number of consumers active in the current phase
    pub fn active(&self) -> usize {
        self.counts.lock().active
    }

    pub fn cancel(&self) {
        self.counts.lock().cancelled = true;
        self.all_left.notify_all();
    }
}
