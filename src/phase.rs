//! Phase sequencing for the two-phase pipeline.
//!
//! The phase order is fixed at compile time: [`Phase::Football`] is fully
//! drained and reported before [`Phase::Tennis`] starts, and the run ends in
//! [`Phase::Done`]. Only the producer moves the controller forward.

use crate::buffer::RingBuffer;
use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;

/// A named processing stage. Transitions are linear and never skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// First dataset class
    Football,
    /// Second dataset class
    Tennis,
    /// Terminal state, no more records will be produced
    Done,
}

impl Phase {
    /// Phases that carry records, in processing order
    pub const ACTIVE: [Phase; 2] = [Phase::Football, Phase::Tennis];

    /// The phase that follows this one
    pub fn next(self) -> Phase {
        match self {
            Phase::Football => Phase::Tennis,
            Phase::Tennis | Phase::Done => Phase::Done,
        }
    }

    /// Lowercase name, also used as the data subdirectory
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Football => "football",
            Phase::Tennis => "tennis",
            Phase::Done => "done",
        }
    }

    /// Title-case name for reports
    pub fn title(self) -> &'static str {
        match self {
            Phase::Football => "Football",
            Phase::Tennis => "Tennis",
            Phase::Done => "Done",
        }
    }

    /// Whether this is the terminal phase
    pub fn is_done(self) -> bool {
        self == Phase::Done
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSnapshot {
    pub current: Phase,
    pub exhausted: bool,
}

#[derive(Debug)]
struct PhaseState {
    current: Phase,
    exhausted: bool,
    cancelled: bool,
}

/// Tracks the current phase and wakes consumers when it changes.
///
/// The exhausted flag is mirrored into the ring buffer, whose consumers
/// evaluate "empty and exhausted" under the buffer lock.
#[derive(Debug)]
pub struct PhaseController {
    state: Mutex<PhaseState>,
    phase_change: Condvar,
}

impl PhaseController {
    /// Create a controller positioned at the first phase
    pub fn new() -> Self {
        Self::starting_at(Phase::Football)
    }

    /// Create a controller positioned at `phase`
    pub fn starting_at(phase: Phase) -> Self {
        Self {
            state: Mutex::new(PhaseState {
                current: phase,
                exhausted: false,
                cancelled: false,
            }),
            phase_change: Condvar::new(),
        }
    }

    /// The phase currently in progress
    pub fn current(&self) -> Phase {
        self.state.lock().current
    }

    pub fn snapshot(&self) -> PhaseSnapshot {
        let state = self.state.lock();
        PhaseSnapshot {
            current: state.current,
            exhausted: state.exhausted,
        }
    }

    /// Producer only: no more records will be pushed for the current phase.
    pub fn mark_exhausted<T>(&self, buffer: &RingBuffer<T>) {
        self.state.lock().exhausted = true;
        buffer.mark_exhausted();
    }

    /// Producer only: move to the next phase and wake every consumer.
    ///
    /// Must only be called once the completion rendezvous has confirmed that
    /// no consumer is active. `reset` runs before the new phase is published
    /// and clears any phase-scoped aggregation state.
    pub fn advance_phase<T, F>(&self, buffer: &RingBuffer<T>, reset: F) -> Phase
    where
        F: FnOnce(Phase),
    {
        let mut state = self.state.lock();
        debug_assert!(state.exhausted, "advancing a phase that was never exhausted");
        debug_assert!(buffer.is_empty(), "advancing with records still queued");

        let next = state.current.next();
        reset(next);
        buffer.reopen();
        state.exhausted = false;
        state.current = next;
        drop(state);

        self.phase_change.notify_all();
        next
    }

    /// Consumer only: block until the phase differs from `not_this_phase`.
    pub fn wait_for_phase_change(&self, not_this_phase: Phase) -> Result<Phase> {
        let mut state = self.state.lock();
        while state.current == not_this_phase && !state.cancelled {
            self.phase_change.wait(&mut state);
        }
        if state.cancelled {
            return Err(PipelineError::Cancelled);
        }
        Ok(state.current)
    }

    /// Wake every waiter with a cancellation error
    pub fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.phase_change.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}
