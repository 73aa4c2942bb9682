//! Coalesced update primitives for hardware backends
//!
//! [`OutputStage`] keeps the local copy of an output universe together with
//! the [`DirtyRange`] written since the last flush. Both live under one lock:
//! a writer updates bytes and range in one step, and the flusher takes the
//! range and its bytes in one step, so no concurrent write can be lost between
//! reading the range and resetting it.
//!
//! [`InputMirror`] does the opposite job for input universes: it compares a
//! fresh hardware sample against the last one and reports only the span that
//! actually changed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::signal::ChangeSignal;
use crate::SLOTS_PER_UNIVERSE;

/// Half-open byte span `[start, end)` written since the last flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirtyRange {
    #[default]
    Clean,
    Dirty { start: usize, end: usize },
}

impl DirtyRange {
    /// Grow the range to cover `[offset, offset+len)`
    pub fn extend(&mut self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let end = offset + len;
        *self = match *self {
            DirtyRange::Clean => DirtyRange::Dirty { start: offset, end },
            DirtyRange::Dirty { start: s, end: e } => DirtyRange::Dirty {
                start: s.min(offset),
                end: e.max(end),
            },
        };
    }

    /// Reset to clean, returning what was pending
    pub fn take(&mut self) -> Option<Range<usize>> {
        std::mem::take(self).range()
    }

    pub fn range(&self) -> Option<Range<usize>> {
        match *self {
            DirtyRange::Clean => None,
            DirtyRange::Dirty { start, end } => Some(start..end),
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, DirtyRange::Clean)
    }

    pub fn len(&self) -> usize {
        self.range().map_or(0, |r| r.len())
    }

    pub fn is_empty(&self) -> bool {
        self.is_clean()
    }
}

/// Bytes taken from an [`OutputStage`] for one hardware transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFlush {
    /// Slot offset of `data[0]`
    pub offset: usize,
    pub data: Vec<u8>,
}

impl PendingFlush {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.data.len()
    }
}

struct StageState {
    slots: [u8; SLOTS_PER_UNIVERSE],
    dirty: DirtyRange,
}

/// Local buffer plus dirty range of one output universe
pub struct OutputStage {
    state: Mutex<StageState>,
}

impl Default for OutputStage {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StageState {
                slots: [0; SLOTS_PER_UNIVERSE],
                dirty: DirtyRange::Clean,
            }),
        }
    }

    /// Merge `data` at `offset` and mark it dirty. Bytes past the last slot
    /// are dropped; returns the number of bytes accepted.
    pub fn write(&self, offset: usize, data: &[u8]) -> usize {
        if offset >= SLOTS_PER_UNIVERSE {
            return 0;
        }
        let len = data.len().min(SLOTS_PER_UNIVERSE - offset);
        let mut state = self.state.lock();
        state.slots[offset..offset + len].copy_from_slice(&data[..len]);
        state.dirty.extend(offset, len);
        len
    }

    /// Copy the latest written values into `buf`
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        if offset >= SLOTS_PER_UNIVERSE {
            return 0;
        }
        let len = buf.len().min(SLOTS_PER_UNIVERSE - offset);
        let state = self.state.lock();
        buf[..len].copy_from_slice(&state.slots[offset..offset + len]);
        len
    }

    /// Current dirty range without resetting it
    pub fn dirty(&self) -> DirtyRange {
        self.state.lock().dirty
    }

    /// Atomically take the dirty range and a copy of its bytes
    pub fn take_dirty(&self) -> Option<PendingFlush> {
        let mut state = self.state.lock();
        let range = state.dirty.take()?;
        Some(PendingFlush {
            offset: range.start,
            data: state.slots[range].to_vec(),
        })
    }

    /// Put a failed transfer's range back so the next flush retries it.
    ///
    /// The bytes are not restored: the local buffer already holds the
    /// newest values for that span.
    pub fn requeue(&self, flush: &PendingFlush) {
        self.state.lock().dirty.extend(flush.offset, flush.data.len());
    }

    /// Mark the whole universe dirty, e.g. after a device reset
    pub fn mark_all_dirty(&self) {
        self.state.lock().dirty.extend(0, SLOTS_PER_UNIVERSE);
    }
}

struct MirrorState {
    slots: [u8; SLOTS_PER_UNIVERSE],
    available: bool,
}

/// Last-seen copy of an input universe
pub struct InputMirror {
    state: Mutex<MirrorState>,
}

impl Default for InputMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl InputMirror {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MirrorState {
                slots: [0; SLOTS_PER_UNIVERSE],
                available: false,
            }),
        }
    }

    /// Compare a hardware sample with the local copy.
    ///
    /// On any difference the copy is updated, data is marked available and
    /// the span from the first to the last differing byte is returned.
    pub fn sample(&self, hardware: &[u8]) -> Option<Range<usize>> {
        let len = hardware.len().min(SLOTS_PER_UNIVERSE);
        let mut state = self.state.lock();

        let first = (0..len).find(|&i| state.slots[i] != hardware[i])?;
        let last = (first..len)
            .rev()
            .find(|&i| state.slots[i] != hardware[i])
            .unwrap_or(first);

        state.slots[first..=last].copy_from_slice(&hardware[first..=last]);
        state.available = true;
        Some(first..last + 1)
    }

    /// [`sample`](Self::sample) and report the changed span on `signal`
    pub fn sample_and_signal(&self, hardware: &[u8], signal: &ChangeSignal) -> Option<Range<usize>> {
        let changed = self.sample(hardware)?;
        signal.signal_changed(changed.start, changed.len());
        Some(changed)
    }

    /// Whether unread data is present; does not clear the flag
    pub fn data_available(&self) -> bool {
        self.state.lock().available
    }

    /// Copy values into `buf` without touching the available flag
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        if offset >= SLOTS_PER_UNIVERSE {
            return 0;
        }
        let len = buf.len().min(SLOTS_PER_UNIVERSE - offset);
        let state = self.state.lock();
        buf[..len].copy_from_slice(&state.slots[offset..offset + len]);
        len
    }

    /// Read and clear the available flag
    pub fn consume(&self, offset: usize, buf: &mut [u8]) -> usize {
        if offset >= SLOTS_PER_UNIVERSE {
            return 0;
        }
        let len = buf.len().min(SLOTS_PER_UNIVERSE - offset);
        let mut state = self.state.lock();
        buf[..len].copy_from_slice(&state.slots[offset..offset + len]);
        state.available = false;
        len
    }
}
