//! The multiplexer: all universes of a direction as one flat address space
//!
//! Byte `n` of the output endpoint is slot `n % 512` of output universe
//! `n / 512`; likewise for inputs. Output writes are mirrored in a staging
//! buffer so that reads of the output endpoint see the merged state of all
//! output universes without touching the backends.

use dmxbus_core::{ChangeListener, Direction, Registry, UniverseId, MAX_UNIVERSES, SLOTS_PER_UNIVERSE};
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::session::{ChangeEvent, OpenMode, Session, SessionState};

/// Size of each endpoint's address space in bytes
pub const ADDRESS_SPACE: usize = MAX_UNIVERSES * SLOTS_PER_UNIVERSE;

/// Split `[start, start+len)` into per-universe `(index, local offset, chunk
/// start, chunk len)` pieces.
fn chunks(start: usize, len: usize) -> impl Iterator<Item = (usize, usize, usize, usize)> {
    let end = start + len;
    let mut flat = start;
    std::iter::from_fn(move || {
        if flat >= end {
            return None;
        }
        let index = flat / SLOTS_PER_UNIVERSE;
        let local = flat % SLOTS_PER_UNIVERSE;
        let n = (SLOTS_PER_UNIVERSE - local).min(end - flat);
        let piece = (index, local, flat - start, n);
        flat += n;
        Some(piece)
    })
}

pub(crate) struct MuxShared {
    registry: Arc<Registry>,
    staging: Mutex<Vec<u8>>,
    sessions: Mutex<Vec<Weak<SessionState>>>,
    shut_down: AtomicBool,
}

impl MuxShared {
    pub(crate) fn address_space(&self) -> usize {
        ADDRESS_SPACE
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn sessions(&self) -> Vec<Arc<SessionState>> {
        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.strong_count() > 0);
        sessions.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn remove_session(&self, state: &Arc<SessionState>) {
        let target = Arc::as_ptr(state);
        self.sessions
            .lock()
            .retain(|s| s.strong_count() > 0 && s.as_ptr() != target);
    }

    pub(crate) fn read_staging(&self, position: usize, buf: &mut [u8]) -> usize {
        let staging = self.staging.lock();
        let len = buf.len().min(staging.len().saturating_sub(position));
        buf[..len].copy_from_slice(&staging[position..position + len]);
        len
    }

    /// Assemble input bytes universe by universe; missing universes read as 0.
    pub(crate) fn read_inputs(&self, position: usize, buf: &mut [u8]) -> Result<usize> {
        for (index, local, at, n) in chunks(position, buf.len()) {
            let chunk = &mut buf[at..at + n];
            match self.registry.universe(Direction::Input, index) {
                Some(universe) => {
                    let read = universe.read_slots(local, chunk)?;
                    chunk[read.min(n)..].fill(0);
                }
                None => chunk.fill(0),
            }
        }
        Ok(buf.len())
    }

    /// Whether any input universe covering `range` reports new data
    pub(crate) fn inputs_available(&self, range: Range<usize>) -> Result<bool> {
        for (index, local, _, n) in chunks(range.start, range.len()) {
            if let Some(universe) = self.registry.universe(Direction::Input, index) {
                if universe.data_available(local, n)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Hand `data` to the covered universes chunk by chunk, then wake
    /// monitoring output sessions.
    ///
    /// A chunk reaches the staging buffer only once its universe accepted
    /// it, so on a backend error staging holds exactly the chunks written
    /// before the failure.
    pub(crate) fn write_outputs(&self, position: usize, data: &[u8]) -> Result<()> {
        let mut staged = 0;
        let mut outcome = Ok(());
        {
            // Held across the backend calls so concurrent writers reach the
            // universes in the same order they hit the staging buffer.
            let mut staging = self.staging.lock();
            for (index, local, at, n) in chunks(position, data.len()) {
                let piece = &data[at..at + n];
                if let Some(universe) = self.registry.universe(Direction::Output, index) {
                    if let Err(e) = universe.write_slots(local, piece) {
                        tracing::warn!("write to output universe {} failed: {}", index, e);
                        outcome = Err(e.into());
                        break;
                    }
                }
                staging[position + at..position + at + n].copy_from_slice(piece);
                staged = at + n;
            }
        }

        if staged > 0 {
            let range = position..position + staged;
            for session in self.sessions() {
                if session.direction == Direction::Output {
                    session.on_output_write(&range);
                }
            }
        }
        outcome
    }
}

impl ChangeListener for MuxShared {
    fn universe_changed(&self, universe: UniverseId, start: usize, size: usize) {
        let range = (size > 0).then(|| {
            let base = universe.base_offset();
            base + start..base + start + size
        });
        let event = ChangeEvent {
            universe,
            start,
            size,
        };
        for session in self.sessions() {
            session.on_change(universe.direction, range.clone(), event);
        }
    }
}

/// Entry point of the multiplexed I/O layer
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<MuxShared>,
}

impl Multiplexer {
    /// Create a multiplexer over `registry` and subscribe to its change signals
    pub fn new(registry: Arc<Registry>) -> Self {
        let shared = Arc::new(MuxShared {
            registry: Arc::clone(&registry),
            staging: Mutex::new(vec![0; ADDRESS_SPACE]),
            sessions: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        });
        let listener: Arc<dyn ChangeListener> = shared.clone();
        registry.subscribe(&listener);
        tracing::debug!("Multiplexer attached, {} bytes per endpoint", ADDRESS_SPACE);
        Self { shared }
    }

    /// Open a session on the output or input endpoint
    pub fn open(&self, direction: Direction, mode: OpenMode) -> Session {
        let state = Arc::new(SessionState::new(direction, mode));
        self.shared.sessions.lock().push(Arc::downgrade(&state));
        tracing::debug!("{} endpoint opened ({:?})", direction, mode);
        Session::new(Arc::clone(&self.shared), state)
    }

    /// The registry this multiplexer routes to
    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    /// Number of open sessions on both endpoints
    pub fn session_count(&self) -> usize {
        let mut sessions = self.shared.sessions.lock();
        sessions.retain(|s| s.strong_count() > 0);
        sessions.len()
    }

    /// Wake every blocked reader with `Interrupted`; later waits fail at once.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions: Vec<_> = self
            .shared
            .sessions
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for session in &sessions {
            session.kick();
        }
        tracing::info!("Multiplexer shut down, {} sessions woken", sessions.len());
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_split_at_universe_boundary() {
        let pieces: Vec<_> = chunks(510, 516).collect();
        assert_eq!(pieces, vec![(0, 510, 0, 2), (1, 0, 2, 512), (2, 0, 514, 2)]);
    }

    #[test]
    fn test_chunks_within_one_universe() {
        let pieces: Vec<_> = chunks(1030, 4).collect();
        assert_eq!(pieces, vec![(2, 6, 0, 4)]);
        assert_eq!(chunks(0, 0).count(), 0);
    }

    #[test]
    fn test_open_and_drop_sessions() {
        let mux = Multiplexer::new(Arc::new(Registry::new()));
        let a = mux.open(Direction::Output, OpenMode::Blocking);
        let b = mux.open(Direction::Input, OpenMode::NonBlocking);
        assert_eq!(mux.session_count(), 2);
        drop(a);
        assert_eq!(mux.session_count(), 1);
        drop(b);
        assert_eq!(mux.session_count(), 0);
    }
}
