//! Sessions on the output and input endpoints
//!
//! A [`Session`] is one consumer's view of an endpoint: a position in the flat
//! address space, a blocking flag, and the `changed`/`polling`/pending-request
//! state the multiplexer uses to decide whom to wake.

use crossbeam_channel::{Sender, TrySendError};
use dmxbus_core::{Direction, DmxError, UniverseId};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::io::SeekFrom;
use std::ops::Range;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::error::{IoError, Result};
use crate::mux::MuxShared;

/// How a session treats reads with no new data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenMode {
    /// Reads wait until a matching change arrives
    #[default]
    Blocking,
    /// Reads return the current state immediately
    NonBlocking,
}

/// Asynchronous change notification delivered to a session's channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub universe: UniverseId,
    /// Universe-local start slot
    pub start: usize,
    /// Number of slots, 0 for "whole universe"
    pub size: usize,
}

#[derive(Default)]
pub(crate) struct SessionInner {
    pub(crate) position: usize,
    pub(crate) changed: bool,
    pub(crate) polling: bool,
    /// Flat byte range a blocked read is waiting for
    pub(crate) request: Option<Range<usize>>,
    pub(crate) woken: bool,
    pub(crate) interrupted: bool,
    pub(crate) notify: Option<Sender<ChangeEvent>>,
}

pub(crate) struct SessionState {
    pub(crate) direction: Direction,
    pub(crate) blocking: bool,
    pub(crate) inner: Mutex<SessionInner>,
    pub(crate) wakeup: Condvar,
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

impl SessionState {
    pub(crate) fn new(direction: Direction, mode: OpenMode) -> Self {
        Self {
            direction,
            blocking: mode == OpenMode::Blocking,
            inner: Mutex::new(SessionInner {
                // the first read never waits
                changed: true,
                ..SessionInner::default()
            }),
            wakeup: Condvar::new(),
        }
    }

    fn wake(&self, inner: &mut SessionInner) {
        inner.woken = true;
        self.wakeup.notify_all();
    }

    fn wake_pending(&self, inner: &mut SessionInner, range: Option<&Range<usize>>) {
        if inner.polling {
            inner.polling = false;
            self.wake(inner);
        }
        let matches = match (&inner.request, range) {
            (Some(_), None) => true,
            (Some(request), Some(range)) => overlaps(request, range),
            (None, _) => false,
        };
        if matches {
            self.wake(inner);
        }
    }

    /// Apply a universe change signal from `source`'s address space.
    ///
    /// Every session is marked changed. Input sessions are woken when
    /// polling or when an input change overlaps their pending read; output
    /// sessions are only woken by writes on their own endpoint (see
    /// [`on_output_write`](Self::on_output_write)).
    pub(crate) fn on_change(
        &self,
        source: Direction,
        range: Option<Range<usize>>,
        event: ChangeEvent,
    ) {
        let mut inner = self.inner.lock();
        if self.direction == Direction::Input {
            if source == Direction::Input {
                self.wake_pending(&mut inner, range.as_ref());
            } else if inner.polling {
                inner.polling = false;
                self.wake(&mut inner);
            }
        }
        inner.changed = true;

        let sent = inner.notify.as_ref().map(|tx| tx.try_send(event));
        match sent {
            Some(Err(TrySendError::Full(_))) => {
                tracing::trace!("notification channel full, dropping {:?}", event);
            }
            Some(Err(TrySendError::Disconnected(_))) => {
                tracing::debug!("notification receiver gone, unregistering");
                inner.notify = None;
            }
            _ => {}
        }
    }

    /// A write on the output endpoint covered `range` (flat)
    pub(crate) fn on_output_write(&self, range: &Range<usize>) {
        let mut inner = self.inner.lock();
        self.wake_pending(&mut inner, Some(range));
        inner.changed = true;
    }

    pub(crate) fn interrupt(&self) {
        let mut inner = self.inner.lock();
        inner.interrupted = true;
        self.wakeup.notify_all();
    }

    /// Wake a waiter without marking a change; used on shutdown
    pub(crate) fn kick(&self) {
        let _inner = self.inner.lock();
        self.wakeup.notify_all();
    }
}

/// Cancels the blocking wait of one session from another thread
#[derive(Clone)]
pub struct Interrupter {
    state: Weak<SessionState>,
}

impl Interrupter {
    /// Wake the session's blocked read with [`IoError::Interrupted`].
    ///
    /// If no read is waiting, the next blocking wait is cancelled instead.
    pub fn interrupt(&self) {
        if let Some(state) = self.state.upgrade() {
            state.interrupt();
        }
    }
}

/// One open handle on an endpoint
pub struct Session {
    shared: Arc<MuxShared>,
    state: Arc<SessionState>,
}

impl Session {
    pub(crate) fn new(shared: Arc<MuxShared>, state: Arc<SessionState>) -> Self {
        Self { shared, state }
    }

    /// Endpoint this session is open on
    pub fn direction(&self) -> Direction {
        self.state.direction
    }

    pub fn is_blocking(&self) -> bool {
        self.state.blocking
    }

    /// Current byte position
    pub fn position(&self) -> usize {
        self.state.inner.lock().position
    }

    /// Whether a change arrived since the last read
    pub fn is_changed(&self) -> bool {
        self.state.inner.lock().changed
    }

    /// Move the position. Only `Start` and `Current` are supported.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut inner = self.state.inner.lock();
        let target = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset).unwrap_or(i64::MAX),
            SeekFrom::Current(delta) => (inner.position as i64).saturating_add(delta),
            SeekFrom::End(_) => return Err(IoError::UnsupportedSeek("end")),
        };
        if target < 0 {
            return Err(IoError::InvalidSeek(target));
        }
        inner.position = usize::try_from(target).unwrap_or(usize::MAX);
        Ok(target as u64)
    }

    /// Read from the current position.
    ///
    /// The request is clamped to the end of the address space. In blocking
    /// mode the call waits until a change overlapping the requested range
    /// arrives, unless data is already available.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let limit = self.shared.address_space();
        let position = self.position();
        if buf.is_empty() {
            return Ok(0);
        }
        if position >= limit {
            return Err(DmxError::OffsetOutOfRange {
                offset: position,
                limit,
            }
            .into());
        }
        let len = buf.len().min(limit - position);

        if self.state.blocking {
            self.wait_for_data(position..position + len)?;
        }
        // Cleared up front so a change racing with the read stays visible
        self.state.inner.lock().changed = false;

        let n = match self.state.direction {
            Direction::Output => self.shared.read_staging(position, &mut buf[..len]),
            Direction::Input => match self.shared.read_inputs(position, &mut buf[..len]) {
                Ok(n) => n,
                Err(e) => {
                    self.state.inner.lock().changed = true;
                    return Err(e);
                }
            },
        };
        self.state.inner.lock().position = position + n;
        Ok(n)
    }

    fn wait_for_data(&self, range: Range<usize>) -> Result<()> {
        {
            let mut inner = self.state.inner.lock();
            if inner.changed {
                return Ok(());
            }
            inner.request = Some(range.clone());
            inner.woken = false;
        }

        // Registered before asking the backends, so a change racing with
        // this check still wakes us.
        if self.state.direction == Direction::Input && self.shared.inputs_available(range.clone())? {
            self.state.inner.lock().request = None;
            return Ok(());
        }

        let mut inner = self.state.inner.lock();
        tracing::trace!("{} session waiting for {:?}", self.state.direction, range);
        while !inner.woken && !inner.interrupted && !self.shared.is_shut_down() {
            self.state.wakeup.wait(&mut inner);
        }
        self.finish_wait(&mut inner)
    }

    fn finish_wait(&self, inner: &mut MutexGuard<'_, SessionInner>) -> Result<()> {
        inner.request = None;
        inner.woken = false;
        if inner.interrupted || self.shared.is_shut_down() {
            inner.interrupted = false;
            return Err(IoError::Interrupted(self.state.direction));
        }
        Ok(())
    }

    /// Write at the current position.
    ///
    /// On the output endpoint the bytes are merged into the staging buffer
    /// and handed to every covered universe. On the input endpoint they are
    /// discarded and only the position advances.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let position = self.position();
        match self.state.direction {
            Direction::Input => {
                tracing::debug!("discarding {} bytes written to the input endpoint", data.len());
                self.state.inner.lock().position = position + data.len();
                Ok(data.len())
            }
            Direction::Output => {
                let limit = self.shared.address_space();
                if position >= limit {
                    return Err(DmxError::OffsetOutOfRange {
                        offset: position,
                        limit,
                    }
                    .into());
                }
                let len = data.len().min(limit - position);
                self.shared.write_outputs(position, &data[..len])?;
                self.state.inner.lock().position = position + len;
                Ok(len)
            }
        }
    }

    /// Readiness check: true if a read would not block.
    ///
    /// When nothing is available the session is marked as polling and the
    /// next change wakes [`poll_wait`](Self::poll_wait).
    pub fn poll(&self) -> Result<bool> {
        {
            let mut inner = self.state.inner.lock();
            if inner.changed {
                return Ok(true);
            }
            inner.polling = true;
            inner.woken = false;
        }

        if self.state.direction == Direction::Input {
            let limit = self.shared.address_space();
            if self.shared.inputs_available(0..limit)? {
                self.state.inner.lock().polling = false;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Poll and wait up to `timeout` (forever if `None`) for readiness.
    pub fn poll_wait(&self, timeout: Option<Duration>) -> Result<bool> {
        self.state.inner.lock().woken = false;
        if self.poll()? {
            return Ok(true);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.state.inner.lock();
        while !inner.woken && !inner.interrupted && !self.shared.is_shut_down() {
            match deadline {
                Some(deadline) => {
                    if self.state.wakeup.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                }
                None => self.state.wakeup.wait(&mut inner),
            }
        }
        inner.polling = false;
        let ready = inner.changed;
        self.finish_wait(&mut inner)?;
        Ok(ready)
    }

    /// Register (or clear) the asynchronous notification channel
    pub fn set_async(&self, sender: Option<Sender<ChangeEvent>>) {
        self.state.inner.lock().notify = sender;
    }

    /// Handle that cancels this session's blocking waits
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            state: Arc::downgrade(&self.state),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.remove_session(&self.state);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("direction", &self.state.direction)
            .field("blocking", &self.state.blocking)
            .field("position", &self.position())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_is_half_open() {
        assert!(overlaps(&(0..10), &(9..12)));
        assert!(!overlaps(&(0..10), &(10..12)));
        assert!(overlaps(&(5..6), &(0..512)));
    }

    #[test]
    fn test_new_session_starts_changed() {
        let state = SessionState::new(Direction::Input, OpenMode::Blocking);
        assert!(state.inner.lock().changed);
        assert!(state.blocking);
    }

    fn event(direction: Direction) -> ChangeEvent {
        ChangeEvent {
            universe: UniverseId::new(direction, 0),
            start: 0,
            size: 1,
        }
    }

    #[test]
    fn test_on_change_wakes_matching_request_only() {
        let state = SessionState::new(Direction::Input, OpenMode::Blocking);
        state.inner.lock().request = Some(100..110);

        state.on_change(Direction::Input, Some(0..50), event(Direction::Input));
        assert!(!state.inner.lock().woken);
        assert!(state.inner.lock().changed);

        state.on_change(Direction::Input, Some(105..106), event(Direction::Input));
        assert!(state.inner.lock().woken);
    }

    #[test]
    fn test_on_change_without_range_wakes_all() {
        let state = SessionState::new(Direction::Input, OpenMode::Blocking);
        state.inner.lock().request = Some(1000..1001);
        state.on_change(Direction::Input, None, event(Direction::Input));
        assert!(state.inner.lock().woken);
    }

    #[test]
    fn test_output_signal_only_wakes_polling_input() {
        let state = SessionState::new(Direction::Input, OpenMode::Blocking);
        {
            let mut inner = state.inner.lock();
            inner.changed = false;
            inner.request = Some(0..512);
        }
        state.on_change(Direction::Output, Some(0..512), event(Direction::Output));
        assert!(!state.inner.lock().woken);
        assert!(state.inner.lock().changed);

        state.inner.lock().polling = true;
        state.on_change(Direction::Output, Some(0..1), event(Direction::Output));
        let inner = state.inner.lock();
        assert!(inner.woken);
        assert!(!inner.polling);
    }

    #[test]
    fn test_input_signal_marks_output_session_without_waking() {
        let state = SessionState::new(Direction::Output, OpenMode::Blocking);
        let (tx, rx) = crossbeam_channel::bounded(1);
        {
            let mut inner = state.inner.lock();
            inner.changed = false;
            inner.polling = true;
            inner.request = Some(0..1);
            inner.notify = Some(tx);
        }
        state.on_change(Direction::Input, Some(0..1), event(Direction::Input));

        assert_eq!(rx.try_recv().unwrap(), event(Direction::Input));
        let inner = state.inner.lock();
        assert!(inner.changed);
        assert!(!inner.woken);
    }

    #[test]
    fn test_output_write_wakes_overlapping_monitor() {
        let state = SessionState::new(Direction::Output, OpenMode::Blocking);
        state.inner.lock().request = Some(10..20);
        state.on_output_write(&(0..10));
        assert!(!state.inner.lock().woken);
        state.on_output_write(&(19..21));
        assert!(state.inner.lock().woken);
    }

    #[test]
    fn test_disconnected_channel_is_dropped() {
        let state = SessionState::new(Direction::Output, OpenMode::NonBlocking);
        let (tx, rx) = crossbeam_channel::bounded(1);
        state.inner.lock().notify = Some(tx);
        drop(rx);

        state.on_change(Direction::Output, Some(0..1), event(Direction::Output));
        assert!(state.inner.lock().notify.is_none());
    }
}
