//! Change notification from backends to consumers
//!
//! Backends hold a [`ChangeSignal`] for each of their universes and call
//! [`ChangeSignal::signal_changed`] when slot values move. Consumers such as
//! the multiplexed I/O layer register a [`ChangeListener`] on the hub.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};

use crate::universe::UniverseId;

/// Receiver of universe change notifications
pub trait ChangeListener: Send + Sync {
    /// `size == 0` means the whole universe, unconditionally.
    fn universe_changed(&self, universe: UniverseId, start: usize, size: usize);
}

/// Fan-out point for change notifications
#[derive(Default)]
pub struct SignalHub {
    listeners: RwLock<Vec<Weak<dyn ChangeListener>>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. The hub only keeps a weak reference.
    pub fn subscribe(&self, listener: &Arc<dyn ChangeListener>) {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(Arc::downgrade(listener));
    }

    /// Deliver a notification to every live listener
    pub fn notify(&self, universe: UniverseId, start: usize, size: usize) {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        tracing::trace!(
            "{} changed {}+{} ({} listeners)",
            universe,
            start,
            size,
            listeners.len()
        );
        for listener in listeners {
            listener.universe_changed(universe, start, size);
        }
    }

    /// Number of registered listeners still alive
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }
}

/// Per-universe handle a backend uses to report changes
#[derive(Clone)]
pub struct ChangeSignal {
    hub: Arc<SignalHub>,
    universe: UniverseId,
}

impl ChangeSignal {
    pub(crate) fn new(hub: Arc<SignalHub>, universe: UniverseId) -> Self {
        Self { hub, universe }
    }

    /// The universe this signal reports for
    pub fn universe(&self) -> UniverseId {
        self.universe
    }

    /// Report that `[start, start+size)` changed; `size == 0` wakes everyone.
    pub fn signal_changed(&self, start: usize, size: usize) {
        self.hub.notify(self.universe, start, size);
    }
}

impl std::fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("universe", &self.universe)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::Direction;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(UniverseId, usize, usize)>>,
    }

    impl ChangeListener for Recorder {
        fn universe_changed(&self, universe: UniverseId, start: usize, size: usize) {
            self.seen.lock().push((universe, start, size));
        }
    }

    #[test]
    fn test_signal_reaches_listener() {
        let hub = Arc::new(SignalHub::new());
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn ChangeListener> = recorder.clone();
        hub.subscribe(&listener);

        let id = UniverseId::new(Direction::Input, 1);
        ChangeSignal::new(hub.clone(), id).signal_changed(4, 2);

        assert_eq!(recorder.seen.lock().as_slice(), &[(id, 4, 2)]);
    }

    #[test]
    fn test_dropped_listener_is_skipped() {
        let hub = Arc::new(SignalHub::new());
        {
            let listener: Arc<dyn ChangeListener> = Arc::new(Recorder::default());
            hub.subscribe(&listener);
            assert_eq!(hub.listener_count(), 1);
        }
        assert_eq!(hub.listener_count(), 0);
        hub.notify(UniverseId::new(Direction::Output, 0), 0, 0);
    }
}
