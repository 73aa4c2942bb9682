//! Contract between the framework and hardware backends
//!
//! A hardware family plugs in at three levels:
//!
//! - [`DriverBackend`] creates one [`InterfaceBackend`] per physical device.
//! - [`InterfaceBackend`] creates one [`UniverseBackend`] per universe the
//!   device exposes, in either direction.
//! - [`UniverseBackend`] moves slot values to and from hardware.
//!
//! Drivers that need no per-device state can use [`FactoryDriver`], which only
//! takes a universe factory.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::DmxError;
use crate::property::PropertyList;
use crate::signal::ChangeSignal;
use crate::universe::Direction;
use crate::Result;

/// Probe function of a family: given the family's driver names and a probe
/// property list, pick the matching driver.
pub type ProbeFn = Arc<dyn Fn(&[String], &PropertyList) -> Option<String> + Send + Sync>;

/// DMX line timing, `None` where the backend does not define it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Break length in microseconds
    pub break_size: Option<u32>,
    /// Mark-after-break length in microseconds
    pub mab_size: Option<u32>,
}

/// Per-universe hardware hooks.
///
/// The framework has already clamped every request: `offset < 512` and
/// `offset + len <= 512` hold on entry.
pub trait UniverseBackend: Send + Sync {
    /// Accept slot values for an output universe
    fn write_slots(&self, _offset: usize, _data: &[u8]) -> Result<usize> {
        Err(DmxError::Unsupported("write_slots"))
    }

    /// Fill `buf` with slot values starting at `offset`
    fn read_slots(&self, offset: usize, buf: &mut [u8]) -> Result<usize>;

    /// Whether `[start, start+size)` holds data the consumer has not read yet.
    /// Must not clear any state.
    fn data_available(&self, _start: usize, _size: usize) -> Result<bool> {
        Ok(true)
    }

    fn enable(&self, _on: bool) -> Result<()> {
        Ok(())
    }

    fn timing(&self) -> Timing {
        Timing::default()
    }

    /// Called once, before the universe index is released
    fn destroy(&self) {}
}

/// Context handed to a universe factory
pub struct UniverseSetup<'a> {
    direction: Direction,
    index: usize,
    pub(crate) connector: String,
    pub(crate) conn_id: i64,
    properties: &'a mut PropertyList,
    interface_properties: &'a PropertyList,
    signal: ChangeSignal,
}

impl<'a> UniverseSetup<'a> {
    pub(crate) fn new(
        direction: Direction,
        index: usize,
        properties: &'a mut PropertyList,
        interface_properties: &'a PropertyList,
        signal: ChangeSignal,
    ) -> Self {
        Self {
            direction,
            index,
            connector: String::from("unknown"),
            conn_id: -1,
            properties,
            interface_properties,
            signal,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Index reserved for the universe being created
    pub fn index(&self) -> usize {
        self.index
    }

    /// Universe properties; the backend may add live properties here
    pub fn properties(&mut self) -> &mut PropertyList {
        self.properties
    }

    pub fn interface_properties(&self) -> &PropertyList {
        self.interface_properties
    }

    /// Label the physical connector of this universe
    pub fn set_connector(&mut self, label: impl Into<String>, conn_id: i64) {
        self.connector = label.into();
        self.conn_id = conn_id;
    }

    /// Handle for reporting slot changes of this universe
    pub fn signal(&self) -> ChangeSignal {
        self.signal.clone()
    }
}

/// Per-device hooks
pub trait InterfaceBackend: Send + Sync {
    /// Create the backend of a new universe
    fn create_universe(&self, setup: &mut UniverseSetup<'_>) -> Result<Arc<dyn UniverseBackend>>;

    /// Called once after all universes of the interface are gone
    fn destroy(&self) {}
}

/// Context handed to [`DriverBackend::create_interface`]
pub struct InterfaceSetup<'a> {
    family: &'a str,
    driver: &'a str,
    pub(crate) number: u32,
    properties: &'a mut PropertyList,
}

impl<'a> InterfaceSetup<'a> {
    pub(crate) fn new(
        family: &'a str,
        driver: &'a str,
        number: u32,
        properties: &'a mut PropertyList,
    ) -> Self {
        Self {
            family,
            driver,
            number,
            properties,
        }
    }

    pub fn family(&self) -> &str {
        self.family
    }

    pub fn driver(&self) -> &str {
        self.driver
    }

    /// Interface number within the driver
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Override the sequentially allocated interface number
    pub fn set_number(&mut self, number: u32) {
        self.number = number;
    }

    /// Interface configuration; the backend may add live properties here
    pub fn properties(&mut self) -> &mut PropertyList {
        self.properties
    }
}

/// Per-driver hook: turns a configuration into a device instance
pub trait DriverBackend: Send + Sync {
    fn create_interface(&self, setup: &mut InterfaceSetup<'_>) -> Result<Arc<dyn InterfaceBackend>>;
}

/// Universe factory closure used by [`FactoryDriver`]
pub type UniverseFactory =
    dyn Fn(&mut UniverseSetup<'_>) -> Result<Arc<dyn UniverseBackend>> + Send + Sync;

/// Driver with no interface hook of its own
#[derive(Clone)]
pub struct FactoryDriver {
    factory: Arc<UniverseFactory>,
}

impl FactoryDriver {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&mut UniverseSetup<'_>) -> Result<Arc<dyn UniverseBackend>> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }
}

struct FactoryInterface {
    factory: Arc<UniverseFactory>,
}

impl InterfaceBackend for FactoryInterface {
    fn create_universe(&self, setup: &mut UniverseSetup<'_>) -> Result<Arc<dyn UniverseBackend>> {
        (self.factory)(setup)
    }
}

impl DriverBackend for FactoryDriver {
    fn create_interface(&self, _setup: &mut InterfaceSetup<'_>) -> Result<Arc<dyn InterfaceBackend>> {
        Ok(Arc::new(FactoryInterface {
            factory: Arc::clone(&self.factory),
        }))
    }
}

/// Everything needed to register a driver
pub struct DriverSpec {
    pub name: String,
    pub backend: Arc<dyn DriverBackend>,
    /// Defaults copied into every interface configuration
    pub properties: PropertyList,
    pub declared_outputs: usize,
    pub declared_inputs: usize,
}

impl DriverSpec {
    pub fn new(name: impl Into<String>, backend: Arc<dyn DriverBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
            properties: PropertyList::new(),
            declared_outputs: 0,
            declared_inputs: 0,
        }
    }

    pub fn with_properties(mut self, properties: PropertyList) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_outputs(mut self, count: usize) -> Self {
        self.declared_outputs = count;
        self
    }

    pub fn with_inputs(mut self, count: usize) -> Self {
        self.declared_inputs = count;
        self
    }
}
