//! Universes: fixed-size slot buffers owned by an interface
//!
//! The framework side of a universe only enforces the 512-slot bound and
//! routes calls to the [`UniverseBackend`] supplied by the hardware driver.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::driver::{Timing, UniverseBackend};
use crate::error::DmxError;
use crate::property::{Property, PropertyList};
use crate::registry::InterfaceId;
use crate::{Result, SLOTS_PER_UNIVERSE};

/// Data direction of a universe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// Application to hardware
    Output,
    /// Hardware to application
    Input,
}

impl Direction {
    /// Both directions, output first
    pub const ALL: [Direction; 2] = [Direction::Output, Direction::Input];

    /// Short label used in listings
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Output => "OUT",
            Direction::Input => "IN",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Output => write!(f, "output"),
            Direction::Input => write!(f, "input"),
        }
    }
}

/// Identity of a universe: its index within its direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniverseId {
    pub direction: Direction,
    pub index: usize,
}

impl UniverseId {
    pub fn new(direction: Direction, index: usize) -> Self {
        Self { direction, index }
    }

    /// First byte of this universe in its direction's flat address space
    pub fn base_offset(&self) -> usize {
        self.index * SLOTS_PER_UNIVERSE
    }
}

impl fmt::Display for UniverseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.direction.label(), self.index)
    }
}

/// Clamp a `(offset, len)` request to the universe bounds.
///
/// Returns the number of bytes that fit, or an error if `offset` itself is
/// outside the buffer.
pub fn clamp_to_universe(offset: usize, len: usize) -> Result<usize> {
    if offset >= SLOTS_PER_UNIVERSE {
        return Err(DmxError::OffsetOutOfRange {
            offset,
            limit: SLOTS_PER_UNIVERSE,
        });
    }
    Ok(len.min(SLOTS_PER_UNIVERSE - offset))
}

/// A live universe
pub struct Universe {
    id: UniverseId,
    interface: InterfaceId,
    family: String,
    driver: String,
    connector: String,
    conn_id: i64,
    properties: RwLock<PropertyList>,
    interface_properties: Arc<RwLock<PropertyList>>,
    backend: Arc<dyn UniverseBackend>,
}

impl Universe {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: UniverseId,
        interface: InterfaceId,
        family: String,
        driver: String,
        connector: String,
        conn_id: i64,
        properties: PropertyList,
        interface_properties: Arc<RwLock<PropertyList>>,
        backend: Arc<dyn UniverseBackend>,
    ) -> Self {
        Self {
            id,
            interface,
            family,
            driver,
            connector,
            conn_id,
            properties: RwLock::new(properties),
            interface_properties,
            backend,
        }
    }

    pub fn id(&self) -> UniverseId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.id.direction
    }

    pub fn index(&self) -> usize {
        self.id.index
    }

    /// Owning interface
    pub fn interface(&self) -> InterfaceId {
        self.interface
    }

    pub fn family_name(&self) -> &str {
        &self.family
    }

    pub fn driver_name(&self) -> &str {
        &self.driver
    }

    /// Connector label assigned by the driver
    pub fn connector(&self) -> &str {
        &self.connector
    }

    /// Per-interface connector id, -1 when the driver assigned none
    pub fn conn_id(&self) -> i64 {
        self.conn_id
    }

    /// Break/mark-after-break timing reported by the backend
    pub fn timing(&self) -> Timing {
        self.backend.timing()
    }

    /// Write slot values starting at `offset`.
    ///
    /// Bytes that would run past the last slot are dropped. Returns the number
    /// of bytes handed to the backend.
    pub fn write_slots(&self, offset: usize, data: &[u8]) -> Result<usize> {
        let len = clamp_to_universe(offset, data.len())?;
        if len == 0 {
            return Ok(0);
        }
        tracing::trace!("{}: write_slots {}+{}", self.id, offset, len);
        self.backend.write_slots(offset, &data[..len])
    }

    /// Read slot values starting at `offset` into `buf`.
    ///
    /// The read is clamped to the end of the universe; the return value is the
    /// number of bytes filled.
    pub fn read_slots(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let len = clamp_to_universe(offset, buf.len())?;
        if len == 0 {
            return Ok(0);
        }
        tracing::trace!("{}: read_slots {}+{}", self.id, offset, len);
        self.backend.read_slots(offset, &mut buf[..len])
    }

    /// Whether new data is available in `[start, start+size)`
    pub fn data_available(&self, start: usize, size: usize) -> Result<bool> {
        let size = clamp_to_universe(start, size)?;
        self.backend.data_available(start, size)
    }

    /// Switch the universe on or off at the hardware level
    pub fn enable(&self, on: bool) -> Result<()> {
        self.backend.enable(on)
    }

    /// Universe properties
    pub fn properties(&self) -> &RwLock<PropertyList> {
        &self.properties
    }

    /// Properties of the owning interface
    pub fn interface_properties(&self) -> &Arc<RwLock<PropertyList>> {
        &self.interface_properties
    }

    /// Find a property on the universe, falling back to the interface.
    pub fn find_property(&self, name: &str) -> Option<Arc<Property>> {
        self.properties
            .read()
            .find(name)
            .or_else(|| self.interface_properties.read().find(name))
    }

    /// Names of universe properties followed by interface-only properties
    pub fn property_names(&self) -> Vec<String> {
        let mut names = self.properties.read().names();
        for name in self.interface_properties.read().names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub(crate) fn destroy(&self) {
        self.backend.destroy();
    }
}

impl fmt::Debug for Universe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Universe")
            .field("id", &self.id)
            .field("interface", &self.interface)
            .field("driver", &format_args!("{}/{}", self.family, self.driver))
            .field("connector", &self.connector)
            .field("conn_id", &self.conn_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_to_universe() {
        assert_eq!(clamp_to_universe(0, 3).unwrap(), 3);
        assert_eq!(clamp_to_universe(510, 10).unwrap(), 2);
        assert_eq!(clamp_to_universe(511, 0).unwrap(), 0);
        assert!(matches!(
            clamp_to_universe(512, 1),
            Err(DmxError::OffsetOutOfRange { offset: 512, .. })
        ));
    }

    #[test]
    fn test_universe_id_display() {
        assert_eq!(UniverseId::new(Direction::Output, 3).to_string(), "OUT3");
        assert_eq!(UniverseId::new(Direction::Input, 0).to_string(), "IN0");
        assert_eq!(UniverseId::new(Direction::Input, 2).base_offset(), 1024);
    }
}
