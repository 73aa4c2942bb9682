//! Dummy family: in-memory universes for testing applications without hardware
//!
//! Every universe reports connector `"none"` and a `conn_id` that is
//! sequential per direction within its interface. Output universes carry a
//! live `loopback` property; when set, written bytes are mirrored into the
//! input universe with the same `conn_id`, which then signals the change.

use dmxbus_core::{
    ChangeSignal, Direction, DmxError, DriverBackend, DriverSpec, InterfaceBackend, InterfaceSetup,
    Property, PropertyList, Registry, Result, UniverseBackend, UniverseSetup, SLOTS_PER_UNIVERSE,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::live::take_initial_long;
use crate::Registered;

pub const FAMILY: &str = "dummy";
pub const DRIVER: &str = "dummy";
pub const CONNECTOR: &str = "none";

struct DummySlots {
    slots: [u8; SLOTS_PER_UNIVERSE],
    data_avail: bool,
}

/// One in-memory universe
pub struct DummyUniverse {
    direction: Direction,
    conn_id: i64,
    state: Mutex<DummySlots>,
    loopback: AtomicBool,
    signal: ChangeSignal,
    interface: Weak<DummyInterface>,
}

impl DummyUniverse {
    pub fn conn_id(&self) -> i64 {
        self.conn_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn loopback(&self) -> bool {
        self.loopback.load(Ordering::Acquire)
    }

    pub fn set_loopback(&self, on: bool) {
        self.loopback.store(on, Ordering::Release);
    }

    /// Store bytes as received data and signal the change
    fn receive(&self, offset: usize, data: &[u8]) -> usize {
        let len = {
            let mut state = self.state.lock();
            let len = data.len().min(SLOTS_PER_UNIVERSE.saturating_sub(offset));
            state.slots[offset..offset + len].copy_from_slice(&data[..len]);
            state.data_avail = true;
            len
        };
        self.signal.signal_changed(offset, len);
        len
    }
}

impl UniverseBackend for DummyUniverse {
    fn write_slots(&self, offset: usize, data: &[u8]) -> Result<usize> {
        let len = self.receive(offset, data);

        if self.direction == Direction::Output && self.loopback() {
            let input = self
                .interface
                .upgrade()
                .and_then(|iface| iface.universe(Direction::Input, self.conn_id));
            match input {
                Some(input) => {
                    input.receive(offset, &data[..len]);
                    tracing::trace!("dummy loopback {} -> input {}", self.conn_id, self.conn_id);
                }
                None => tracing::trace!("dummy loopback {}: no input universe", self.conn_id),
            }
        }
        Ok(len)
    }

    fn read_slots(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let len = buf.len().min(SLOTS_PER_UNIVERSE.saturating_sub(offset));
        buf[..len].copy_from_slice(&state.slots[offset..offset + len]);
        state.data_avail = false;
        Ok(len)
    }

    fn data_available(&self, _start: usize, _size: usize) -> Result<bool> {
        match self.direction {
            Direction::Input => Ok(self.state.lock().data_avail),
            Direction::Output => Ok(true),
        }
    }

    fn destroy(&self) {
        if let Some(iface) = self.interface.upgrade() {
            iface.forget(self);
        }
        tracing::debug!("dummy {} universe {} destroyed", self.direction, self.conn_id);
    }
}

/// One dummy device holding any number of universes
pub struct DummyInterface {
    number: u32,
    universes: Mutex<Vec<Arc<DummyUniverse>>>,
    me: Weak<DummyInterface>,
}

impl DummyInterface {
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Universe of `direction` with connector id `conn_id`
    pub fn universe(&self, direction: Direction, conn_id: i64) -> Option<Arc<DummyUniverse>> {
        self.universes
            .lock()
            .iter()
            .find(|u| u.direction == direction && u.conn_id == conn_id)
            .cloned()
    }

    /// Simulate data arriving on input universe `conn_id`
    pub fn inject(&self, conn_id: i64, offset: usize, data: &[u8]) -> Result<usize> {
        if offset >= SLOTS_PER_UNIVERSE {
            return Err(DmxError::OffsetOutOfRange {
                offset,
                limit: SLOTS_PER_UNIVERSE,
            });
        }
        let universe = self
            .universe(Direction::Input, conn_id)
            .ok_or_else(|| DmxError::Backend(format!("no dummy input with conn_id {}", conn_id)))?;
        Ok(universe.receive(offset, data))
    }

    /// Lowest conn_id one past the highest in use, per direction
    fn next_conn_id(&self, direction: Direction) -> i64 {
        self.universes
            .lock()
            .iter()
            .filter(|u| u.direction == direction)
            .map(|u| u.conn_id + 1)
            .max()
            .unwrap_or(0)
    }

    fn forget(&self, universe: &DummyUniverse) {
        let target: *const DummyUniverse = universe;
        self.universes
            .lock()
            .retain(|u| !std::ptr::eq(Arc::as_ptr(u), target));
    }
}

impl InterfaceBackend for DummyInterface {
    fn create_universe(&self, setup: &mut UniverseSetup<'_>) -> Result<Arc<dyn UniverseBackend>> {
        let direction = setup.direction();
        let conn_id = self.next_conn_id(direction);
        setup.set_connector(CONNECTOR, conn_id);

        let universe = Arc::new(DummyUniverse {
            direction,
            conn_id,
            state: Mutex::new(DummySlots {
                slots: [0; SLOTS_PER_UNIVERSE],
                data_avail: false,
            }),
            loopback: AtomicBool::new(false),
            signal: setup.signal(),
            interface: self.me.clone(),
        });

        if direction == Direction::Output {
            let initial = take_initial_long(setup.properties(), "loopback", 0)?;
            universe.set_loopback(initial != 0);

            let property = Property::create_long("loopback", 0);
            property.bind_live_long(
                Arc::clone(&universe),
                |u: &DummyUniverse| Ok(i64::from(u.loopback())),
                Some(|u: &DummyUniverse, value: i64| {
                    u.set_loopback(value != 0);
                    Ok(())
                }),
            )?;
            setup.properties().add(property)?;
        }

        self.universes.lock().push(Arc::clone(&universe));
        tracing::debug!("dummy {} universe conn_id {} created", direction, conn_id);
        Ok(universe)
    }

    fn destroy(&self) {
        self.universes.lock().clear();
    }
}

/// Driver creating [`DummyInterface`]s
#[derive(Default)]
pub struct DummyDriver {
    interfaces: Mutex<Vec<Weak<DummyInterface>>>,
}

impl DummyDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `dummy` family and driver on `registry`
    pub fn register(registry: &Registry) -> Result<Registered<DummyDriver>> {
        let family = registry.create_family(FAMILY)?;
        let backend = Arc::new(DummyDriver::new());
        let defaults = PropertyList::parse("outputs=1,inputs=1")?;
        let driver = registry.create_driver(
            family,
            DriverSpec::new(DRIVER, backend.clone())
                .with_properties(defaults)
                .with_outputs(1)
                .with_inputs(1),
        )?;
        Ok(Registered {
            family,
            driver,
            backend,
        })
    }

    /// Live interface with the given number
    pub fn interface(&self, number: u32) -> Option<Arc<DummyInterface>> {
        let mut interfaces = self.interfaces.lock();
        interfaces.retain(|i| i.strong_count() > 0);
        interfaces
            .iter()
            .filter_map(Weak::upgrade)
            .find(|i| i.number == number)
    }
}

impl DriverBackend for DummyDriver {
    fn create_interface(&self, setup: &mut InterfaceSetup<'_>) -> Result<Arc<dyn InterfaceBackend>> {
        let number = setup.number();
        let interface = Arc::new_cyclic(|me| DummyInterface {
            number,
            universes: Mutex::new(Vec::new()),
            me: me.clone(),
        });
        self.interfaces.lock().push(Arc::downgrade(&interface));
        tracing::info!("dummy interface {} created", number);
        Ok(interface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_rig() -> (Registry, Registered<DummyDriver>, u64) {
        let registry = Registry::new();
        let dummy = DummyDriver::register(&registry).unwrap();
        let interface = registry
            .create_interface(dummy.driver, PropertyList::new())
            .unwrap();
        (registry, dummy, interface)
    }

    #[test]
    fn test_conn_ids_sequential_per_direction() {
        let (registry, _dummy, interface) = dummy_rig();
        let o0 = registry
            .create_universe(interface, Direction::Output, PropertyList::new())
            .unwrap();
        let i0 = registry
            .create_universe(interface, Direction::Input, PropertyList::new())
            .unwrap();
        let o1 = registry
            .create_universe(interface, Direction::Output, PropertyList::new())
            .unwrap();

        assert_eq!((o0.connector(), o0.conn_id()), ("none", 0));
        assert_eq!(i0.conn_id(), 0);
        assert_eq!(o1.conn_id(), 1);
    }

    #[test]
    fn test_read_clears_data_available() {
        let (registry, dummy, interface) = dummy_rig();
        let input = registry
            .create_universe(interface, Direction::Input, PropertyList::new())
            .unwrap();
        assert!(!input.data_available(0, 512).unwrap());

        let iface = dummy.backend.interface(0).unwrap();
        assert_eq!(iface.inject(0, 10, &[1, 2]).unwrap(), 2);
        assert!(input.data_available(0, 512).unwrap());
        assert!(input.data_available(0, 512).unwrap());

        let mut buf = [0u8; 2];
        input.read_slots(10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        assert!(!input.data_available(0, 512).unwrap());
    }

    #[test]
    fn test_loopback_property_is_live() {
        let (registry, dummy, interface) = dummy_rig();
        let output = registry
            .create_universe(interface, Direction::Output, PropertyList::new())
            .unwrap();
        let input = registry
            .create_universe(interface, Direction::Input, PropertyList::new())
            .unwrap();

        output.write_slots(0, &[9]).unwrap();
        let mut buf = [0u8; 1];
        input.read_slots(0, &mut buf).unwrap();
        assert_eq!(buf, [0]);

        let loopback = output.find_property("loopback").unwrap();
        assert!(loopback.is_live());
        loopback.set_long(1).unwrap();
        assert!(dummy
            .backend
            .interface(0)
            .unwrap()
            .universe(Direction::Output, 0)
            .unwrap()
            .loopback());

        output.write_slots(0, &[9]).unwrap();
        input.read_slots(0, &mut buf).unwrap();
        assert_eq!(buf, [9]);
    }

    #[test]
    fn test_loopback_initial_value_from_properties() {
        let (registry, _dummy, interface) = dummy_rig();
        let output = registry
            .create_universe(
                interface,
                Direction::Output,
                PropertyList::parse("loopback=1").unwrap(),
            )
            .unwrap();
        assert_eq!(output.find_property("loopback").unwrap().get_long().unwrap(), 1);
    }

    #[test]
    fn test_destroy_forgets_universe() {
        let (registry, dummy, interface) = dummy_rig();
        let input = registry
            .create_universe(interface, Direction::Input, PropertyList::new())
            .unwrap();
        let iface = dummy.backend.interface(0).unwrap();
        assert!(iface.universe(Direction::Input, 0).is_some());

        registry.delete_universe(input.id()).unwrap();
        assert!(iface.universe(Direction::Input, 0).is_none());
        assert!(iface.inject(0, 0, &[1]).is_err());
    }

    #[test]
    fn test_output_always_available() {
        let (registry, _dummy, interface) = dummy_rig();
        let output = registry
            .create_universe(interface, Direction::Output, PropertyList::new())
            .unwrap();
        assert!(output.data_available(0, 1).unwrap());
    }
}
