//! Single-slot, latest-wins frame hand-off between sources and the detection worker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crossbeam::utils::CachePadded;

use crate::capture::frame::{Fill, Frame, FrameView};
use crate::error::FrameError;
use crate::utils::lock;

/// One reusable frame buffer shared by a producer and the detection worker.
///
/// A new frame unconditionally replaces an unconsumed one. The consumer
/// copies the frame out under the lock, so a producer never writes into a
/// buffer that is being read.
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,

    /// Statistics
    stats: CachePadded<Stats>,
}

struct SlotState {
    frame: Frame,
    fresh: bool,
    sequence: u64,
    epoch: u64,
    closed: bool,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_overwritten: AtomicUsize,
}

/// Counters since the slot was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub written: usize,
    pub read: usize,
    pub overwritten: usize,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                frame: Frame::default(),
                fresh: false,
                sequence: 0,
                epoch: 0,
                closed: false,
            }),
            ready: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: copy `view` into the slot, replacing any unconsumed frame.
    pub fn write(&self, view: &FrameView<'_>) -> Result<Fill, FrameError> {
        let mut state = lock(&self.state);
        let fill = state.frame.fill(view)?;
        if state.fresh {
            self.stats.frames_overwritten.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("slot_frames_overwritten").increment(1);
        }
        state.sequence += 1;
        let sequence = state.sequence;
        state.frame.set_sequence(sequence);
        state.fresh = true;
        drop(state);

        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();
        Ok(fill)
    }

    /// Consumer: wait up to `timeout` for a fresh frame and copy it into `into`.
    ///
    /// Returns the epoch the frame was written in, or `None` on timeout or close.
    pub fn take_into(&self, into: &mut Frame, timeout: Duration) -> Option<u64> {
        let state = lock(&self.state);
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| !s.fresh && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if !state.fresh || state.closed {
            return None;
        }
        into.copy_from(&state.frame);
        state.fresh = false;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(state.epoch)
    }

    /// Drop any unconsumed frame and start a new epoch, which is returned.
    pub fn reset(&self) -> u64 {
        let mut state = lock(&self.state);
        state.fresh = false;
        state.frame.clear();
        state.epoch += 1;
        state.epoch
    }

    /// Wake the consumer for good.
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    /// Capacity of the slot's buffer
    pub fn capacity(&self) -> usize {
        lock(&self.state).frame.capacity()
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            overwritten: self.stats.frames_overwritten.load(Ordering::Relaxed),
        }
    }
}
