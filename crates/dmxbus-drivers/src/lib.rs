//! dmxbus Drivers - Reference Backends
//!
//! Backends that plug into the [`dmxbus_core::Registry`]:
//! - **dummy**: in-memory universes with optional output→input loopback
//! - **membus**: coalescing backend flushing dirty spans to a [`SlotTransport`]
//!   ([`MemoryTransport`] or [`ArtNetTransport`])
//! - **scheduler**: tokio runner for the periodic flush/sample ticks
//!
//! ## Quick Start
//!
//! ```rust
//! use dmxbus_core::{Direction, PropertyList, Registry};
//! use dmxbus_drivers::DummyDriver;
//!
//! # fn main() -> dmxbus_core::Result<()> {
//! let registry = Registry::new();
//! let dummy = DummyDriver::register(&registry)?;
//! let interface = registry.create_interface(dummy.driver, PropertyList::new())?;
//! let output = registry.create_universe(interface, Direction::Output, PropertyList::new())?;
//! output.write_slots(0, &[255, 128])?;
//! assert_eq!(output.connector(), "none");
//! # Ok(())
//! # }
//! ```

pub mod dummy;
mod live;
pub mod membus;
pub mod scheduler;
pub mod transport;

use dmxbus_core::{DriverId, FamilyId};
use std::sync::Arc;

pub use dummy::{DummyDriver, DummyInterface, DummyUniverse};
pub use membus::{MembusDriver, MembusInterface};
pub use scheduler::{Backoff, PeriodicTask, Scheduler, SchedulerConfig};
pub use transport::{ArtNetTransport, MemoryTransport, SlotTransport, Transfer};

/// Handles of a driver after registration
pub struct Registered<T> {
    pub family: FamilyId,
    pub driver: DriverId,
    pub backend: Arc<T>,
}

impl<T> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            family: self.family,
            driver: self.driver,
            backend: Arc::clone(&self.backend),
        }
    }
}
