//! dmxbus Core - Driver Registry and Universe Model
//!
//! This crate contains the hardware-independent heart of dmxbus:
//! - **Properties**: named integer/string values, optionally bound to live accessors
//! - **Registry**: family → driver → interface → universe lifecycle
//! - **Universes**: 512-slot buffers behind a backend trait
//! - **Change signals**: backend → consumer notification fan-out
//! - **Coalescing**: dirty-range staging for output flushes, change detection for inputs
//! - **Introspection**: capabilities, listings and parameter access
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use dmxbus_core::{
//!     Direction, DriverSpec, FactoryDriver, OutputStage, PropertyList, Registry, UniverseBackend,
//! };
//!
//! struct Staged(OutputStage);
//!
//! impl UniverseBackend for Staged {
//!     fn write_slots(&self, offset: usize, data: &[u8]) -> dmxbus_core::Result<usize> {
//!         Ok(self.0.write(offset, data))
//!     }
//!     fn read_slots(&self, offset: usize, buf: &mut [u8]) -> dmxbus_core::Result<usize> {
//!         Ok(self.0.read(offset, buf))
//!     }
//! }
//!
//! # fn main() -> dmxbus_core::Result<()> {
//! let registry = Registry::new();
//! let family = registry.create_family("test")?;
//! let driver = registry.create_driver(
//!     family,
//!     DriverSpec::new(
//!         "staged",
//!         Arc::new(FactoryDriver::new(|_| {
//!             Ok(Arc::new(Staged(OutputStage::new())) as Arc<dyn UniverseBackend>)
//!         })),
//!     ),
//! )?;
//! let interface = registry.create_interface(driver, PropertyList::new())?;
//! let universe = registry.create_universe(interface, Direction::Output, PropertyList::new())?;
//!
//! universe.write_slots(0, &[1, 2, 3])?;
//! let mut buf = [0u8; 3];
//! universe.read_slots(0, &mut buf)?;
//! assert_eq!(buf, [1, 2, 3]);
//! # Ok(())
//! # }
//! ```

pub mod coalesce;
pub mod driver;
pub mod error;
pub mod info;
pub mod property;
pub mod registry;
pub mod signal;
pub mod universe;

pub use coalesce::{DirtyRange, InputMirror, OutputStage, PendingFlush};
pub use driver::{
    DriverBackend, DriverSpec, FactoryDriver, InterfaceBackend, InterfaceSetup, ProbeFn, Timing,
    UniverseBackend, UniverseSetup,
};
pub use error::{DmxError, Result};
pub use info::{Capabilities, DriverPage, FamilyNode, FrameworkInfo, UniverseRow};
pub use property::{Property, PropertyKind, PropertyList};
pub use registry::{DriverId, DriverInfo, FamilyId, InterfaceId, Registry};
pub use signal::{ChangeListener, ChangeSignal, SignalHub};
pub use universe::{Direction, Universe, UniverseId};

/// Addressable slots per universe
pub const SLOTS_PER_UNIVERSE: usize = 512;

/// Universe indices available per direction
pub const MAX_UNIVERSES: usize = 32;
