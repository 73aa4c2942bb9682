//! Family / driver / interface / universe registry
//!
//! The [`Registry`] is the root object of the framework. Families, drivers and
//! interfaces live in one tree guarded by a single coarse lock. Universes are
//! additionally indexed per direction in tables with their own locks so that
//! slot I/O never contends with registration.
//!
//! Hardware hooks (interface creation, universe factories, destroy hooks) run
//! outside the coarse lock. A failing hook leaves the registry unchanged.

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::{DriverBackend, DriverSpec, InterfaceBackend, InterfaceSetup, UniverseSetup};
use crate::error::DmxError;
use crate::property::{Property, PropertyList};
use crate::signal::{ChangeListener, ChangeSignal, SignalHub};
use crate::universe::{Direction, Universe, UniverseId};
use crate::{ProbeFn, Result, MAX_UNIVERSES, SLOTS_PER_UNIVERSE};

/// Unique identifier for a family
pub type FamilyId = u64;

/// Unique identifier for a driver
pub type DriverId = u64;

/// Unique identifier for an interface
pub type InterfaceId = u64;

/// Separator between family and driver in a qualified driver name
pub const FAMILY_DRIVER_SEPARATOR: char = '/';

/// Public description of a registered driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub id: DriverId,
    pub family: String,
    pub name: String,
    pub declared_outputs: usize,
    pub declared_inputs: usize,
}

pub(crate) struct FamilyEntry {
    pub(crate) id: FamilyId,
    pub(crate) name: String,
    pub(crate) probe: Option<ProbeFn>,
    pub(crate) drivers: Vec<DriverId>,
}

pub(crate) struct DriverEntry {
    pub(crate) family: FamilyId,
    pub(crate) name: String,
    pub(crate) backend: Arc<dyn DriverBackend>,
    pub(crate) properties: PropertyList,
    pub(crate) declared_outputs: usize,
    pub(crate) declared_inputs: usize,
    pub(crate) interfaces: Vec<InterfaceId>,
    next_number: u32,
}

pub(crate) struct InterfaceEntry {
    pub(crate) driver: DriverId,
    pub(crate) number: u32,
    pub(crate) properties: Arc<RwLock<PropertyList>>,
    pub(crate) backend: Arc<dyn InterfaceBackend>,
    pub(crate) universes: Vec<UniverseId>,
}

#[derive(Default)]
pub(crate) struct Tree {
    pub(crate) families: Vec<FamilyEntry>,
    pub(crate) drivers: HashMap<DriverId, DriverEntry>,
    pub(crate) interfaces: HashMap<InterfaceId, InterfaceEntry>,
    next_id: u64,
}

impl Tree {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn family(&self, id: FamilyId) -> Option<&FamilyEntry> {
        self.families.iter().find(|f| f.id == id)
    }

    fn family_by_name(&self, name: &str) -> Option<&FamilyEntry> {
        self.families.iter().find(|f| f.name == name)
    }

    fn driver_by_name(&self, family: FamilyId, name: &str) -> Option<DriverId> {
        self.family(family)?
            .drivers
            .iter()
            .copied()
            .find(|id| self.drivers.get(id).is_some_and(|d| d.name == name))
    }

    /// `(family name, driver name)` of a driver
    pub(crate) fn qualified_name(&self, driver: DriverId) -> Option<(String, String)> {
        let entry = self.drivers.get(&driver)?;
        let family = self.family(entry.family)?;
        Some((family.name.clone(), entry.name.clone()))
    }
}

enum Slot {
    Free,
    Reserved,
    Live(Arc<Universe>),
}

/// Index space of one direction
struct UniverseTable {
    slots: Vec<Slot>,
}

impl UniverseTable {
    fn new() -> Self {
        Self {
            slots: (0..MAX_UNIVERSES).map(|_| Slot::Free).collect(),
        }
    }

    /// Reserve the lowest free index
    fn reserve(&mut self) -> Option<usize> {
        let index = self.slots.iter().position(|s| matches!(s, Slot::Free))?;
        self.slots[index] = Slot::Reserved;
        Some(index)
    }

    fn install(&mut self, index: usize, universe: Arc<Universe>) {
        self.slots[index] = Slot::Live(universe);
    }

    /// Unpublish a universe but keep its index reserved
    fn take(&mut self, index: usize) -> Option<Arc<Universe>> {
        match std::mem::replace(self.slots.get_mut(index)?, Slot::Reserved) {
            Slot::Live(universe) => Some(universe),
            other => {
                self.slots[index] = other;
                None
            }
        }
    }

    fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Slot::Free;
        }
    }

    fn get(&self, index: usize) -> Option<Arc<Universe>> {
        match self.slots.get(index)? {
            Slot::Live(universe) => Some(Arc::clone(universe)),
            _ => None,
        }
    }

    fn live(&self) -> impl Iterator<Item = &Arc<Universe>> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Live(universe) => Some(universe),
            _ => None,
        })
    }
}

/// An interface removed from the tree whose hooks still have to run
struct DetachedInterface {
    id: InterfaceId,
    backend: Arc<dyn InterfaceBackend>,
    universes: Vec<Arc<Universe>>,
}

/// Root of the framework
pub struct Registry {
    tree: Mutex<Tree>,
    outputs: RwLock<UniverseTable>,
    inputs: RwLock<UniverseTable>,
    signals: Arc<SignalHub>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Tree::default()),
            outputs: RwLock::new(UniverseTable::new()),
            inputs: RwLock::new(UniverseTable::new()),
            signals: Arc::new(SignalHub::new()),
        }
    }

    fn table(&self, direction: Direction) -> &RwLock<UniverseTable> {
        match direction {
            Direction::Output => &self.outputs,
            Direction::Input => &self.inputs,
        }
    }

    pub(crate) fn lock_tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock()
    }

    /// Change notification hub shared by all universes
    pub fn signals(&self) -> &Arc<SignalHub> {
        &self.signals
    }

    /// Register a listener for change notifications of every universe
    pub fn subscribe(&self, listener: &Arc<dyn ChangeListener>) {
        self.signals.subscribe(listener);
    }

    // ----- families -----

    /// Create a new family
    pub fn create_family(&self, name: &str) -> Result<FamilyId> {
        let mut tree = self.tree.lock();
        if tree.family_by_name(name).is_some() {
            return Err(DmxError::FamilyExists(name.to_string()));
        }
        let id = tree.allocate_id();
        tree.families.push(FamilyEntry {
            id,
            name: name.to_string(),
            probe: None,
            drivers: Vec::new(),
        });
        tracing::info!("Family {} created", name);
        Ok(id)
    }

    /// Install the autoprobe function of a family
    pub fn set_probe<F>(&self, family: FamilyId, probe: F) -> Result<()>
    where
        F: Fn(&[String], &PropertyList) -> Option<String> + Send + Sync + 'static,
    {
        let mut tree = self.tree.lock();
        let entry = tree
            .families
            .iter_mut()
            .find(|f| f.id == family)
            .ok_or_else(|| DmxError::FamilyNotFound(family.to_string()))?;
        entry.probe = Some(Arc::new(probe));
        Ok(())
    }

    /// Find a family by name
    pub fn find_family(&self, name: &str) -> Option<FamilyId> {
        self.tree.lock().family_by_name(name).map(|f| f.id)
    }

    /// Name of a family
    pub fn family_name(&self, family: FamilyId) -> Option<String> {
        self.tree.lock().family(family).map(|f| f.name.clone())
    }

    /// All family names in registration order
    pub fn family_names(&self) -> Vec<String> {
        self.tree.lock().families.iter().map(|f| f.name.clone()).collect()
    }

    /// Delete a family and everything below it
    pub fn delete_family(&self, family: FamilyId) -> Result<()> {
        let (name, detached) = {
            let mut tree = self.tree.lock();
            let position = tree
                .families
                .iter()
                .position(|f| f.id == family)
                .ok_or_else(|| DmxError::FamilyNotFound(family.to_string()))?;
            let entry = tree.families.remove(position);
            let mut detached = Vec::new();
            for driver in entry.drivers {
                detached.extend(self.detach_driver(&mut tree, driver));
            }
            (entry.name, detached)
        };

        for interface in detached {
            self.finish_interface(interface);
        }
        tracing::info!("Family {} deleted", name);
        Ok(())
    }

    /// Delete every family; used on framework shutdown
    pub fn teardown(&self) {
        let families: Vec<FamilyId> = self.tree.lock().families.iter().map(|f| f.id).collect();
        for family in families {
            // A concurrent delete may have won the race; nothing left to do then.
            let _ = self.delete_family(family);
        }
        tracing::info!("Registry torn down");
    }

    // ----- drivers -----

    /// Register a driver within a family
    pub fn create_driver(&self, family: FamilyId, spec: DriverSpec) -> Result<DriverId> {
        let mut tree = self.tree.lock();
        let family_name = tree
            .family(family)
            .map(|f| f.name.clone())
            .ok_or_else(|| DmxError::FamilyNotFound(family.to_string()))?;
        if tree.driver_by_name(family, &spec.name).is_some() {
            return Err(DmxError::DriverExists {
                family: family_name,
                driver: spec.name,
            });
        }

        let id = tree.allocate_id();
        tracing::info!("Driver {}/{} created", family_name, spec.name);
        tree.drivers.insert(
            id,
            DriverEntry {
                family,
                name: spec.name,
                backend: spec.backend,
                properties: spec.properties,
                declared_outputs: spec.declared_outputs,
                declared_inputs: spec.declared_inputs,
                interfaces: Vec::new(),
                next_number: 0,
            },
        );
        if let Some(entry) = tree.families.iter_mut().find(|f| f.id == family) {
            entry.drivers.push(id);
        }
        Ok(id)
    }

    /// Find a driver by name within a family
    pub fn find_driver(&self, family: FamilyId, name: &str) -> Option<DriverId> {
        self.tree.lock().driver_by_name(family, name)
    }

    /// Find a driver by its qualified `family/driver` name
    pub fn find_family_driver(&self, qualified: &str) -> Option<DriverId> {
        let (family, driver) = qualified.split_once(FAMILY_DRIVER_SEPARATOR)?;
        let tree = self.tree.lock();
        let family = tree.family_by_name(family)?.id;
        tree.driver_by_name(family, driver)
    }

    /// Ask the family's probe function which driver matches `probe`
    pub fn autoprobe_driver(&self, family: FamilyId, probe: &PropertyList) -> Option<DriverId> {
        let (probe_fn, names) = {
            let tree = self.tree.lock();
            let entry = tree.family(family)?;
            let names: Vec<String> = entry
                .drivers
                .iter()
                .filter_map(|id| tree.drivers.get(id).map(|d| d.name.clone()))
                .collect();
            (entry.probe.clone()?, names)
        };

        let name = probe_fn(&names, probe)?;
        tracing::debug!("Autoprobe selected driver {}", name);
        self.find_driver(family, &name)
    }

    /// Drivers of a family in registration order
    pub fn drivers(&self, family: FamilyId) -> Vec<DriverId> {
        self.tree
            .lock()
            .family(family)
            .map(|f| f.drivers.clone())
            .unwrap_or_default()
    }

    /// Describe a driver
    pub fn driver_info(&self, driver: DriverId) -> Option<DriverInfo> {
        let tree = self.tree.lock();
        let entry = tree.drivers.get(&driver)?;
        let family = tree.family(entry.family)?;
        Some(DriverInfo {
            id: driver,
            family: family.name.clone(),
            name: entry.name.clone(),
            declared_outputs: entry.declared_outputs,
            declared_inputs: entry.declared_inputs,
        })
    }

    /// Delete a driver with all its interfaces and universes
    pub fn delete_driver(&self, driver: DriverId) -> Result<()> {
        let (name, detached) = {
            let mut tree = self.tree.lock();
            let (family, name) = tree
                .qualified_name(driver)
                .ok_or_else(|| DmxError::DriverNotFound(driver.to_string()))?;
            let family_id = tree.drivers.get(&driver).map(|d| d.family);
            if let Some(entry) = tree.families.iter_mut().find(|f| Some(f.id) == family_id) {
                entry.drivers.retain(|d| *d != driver);
            }
            (format!("{}/{}", family, name), self.detach_driver(&mut tree, driver))
        };

        for interface in detached {
            self.finish_interface(interface);
        }
        tracing::info!("Driver {} deleted", name);
        Ok(())
    }

    fn detach_driver(&self, tree: &mut Tree, driver: DriverId) -> Vec<DetachedInterface> {
        let Some(entry) = tree.drivers.remove(&driver) else {
            return Vec::new();
        };
        entry
            .interfaces
            .into_iter()
            .filter_map(|id| self.detach_interface(tree, id))
            .collect()
    }

    // ----- interfaces -----

    /// Create an interface of `driver`.
    ///
    /// The configuration starts from the driver's default properties; entries
    /// in `properties` override defaults of the same name.
    pub fn create_interface(&self, driver: DriverId, properties: PropertyList) -> Result<InterfaceId> {
        let (family_name, driver_name, backend, mut config, number) = {
            let mut tree = self.tree.lock();
            let (family_name, driver_name) = tree
                .qualified_name(driver)
                .ok_or_else(|| DmxError::DriverNotFound(driver.to_string()))?;
            let entry = tree
                .drivers
                .get_mut(&driver)
                .ok_or_else(|| DmxError::DriverNotFound(driver.to_string()))?;
            let mut config = entry.properties.copy()?;
            for property in properties.iter() {
                config.remove_by_name(property.name());
                config.add(Arc::clone(property))?;
            }
            let number = entry.next_number;
            entry.next_number += 1;
            (family_name, driver_name, Arc::clone(&entry.backend), config, number)
        };

        let mut setup = InterfaceSetup::new(&family_name, &driver_name, number, &mut config);
        let created = backend.create_interface(&mut setup);
        let number = setup.number;
        let interface = match created {
            Ok(interface) => interface,
            Err(e) => {
                tracing::warn!("{}/{}: interface creation failed: {}", family_name, driver_name, e);
                return Err(e);
            }
        };

        let mut tree = self.tree.lock();
        if !tree.drivers.contains_key(&driver) {
            drop(tree);
            interface.destroy();
            return Err(DmxError::DriverNotFound(driver_name));
        }
        let id = tree.allocate_id();
        tree.interfaces.insert(
            id,
            InterfaceEntry {
                driver,
                number,
                properties: Arc::new(RwLock::new(config)),
                backend: interface,
                universes: Vec::new(),
            },
        );
        if let Some(entry) = tree.drivers.get_mut(&driver) {
            entry.interfaces.push(id);
        }
        tracing::info!("Interface {} ({}/{} #{}) created", id, family_name, driver_name, number);
        Ok(id)
    }

    /// Autoprobe a driver of `family` and create an interface with it
    pub fn family_create_interface(&self, family: FamilyId, properties: PropertyList) -> Result<InterfaceId> {
        let name = self
            .family_name(family)
            .ok_or_else(|| DmxError::FamilyNotFound(family.to_string()))?;
        let driver = self
            .autoprobe_driver(family, &properties)
            .ok_or(DmxError::NoProbeMatch(name))?;
        self.create_interface(driver, properties)
    }

    /// Interfaces of a driver in creation order
    pub fn interfaces(&self, driver: DriverId) -> Vec<InterfaceId> {
        self.tree
            .lock()
            .drivers
            .get(&driver)
            .map(|d| d.interfaces.clone())
            .unwrap_or_default()
    }

    /// Owning driver of an interface
    pub fn interface_driver(&self, interface: InterfaceId) -> Option<DriverId> {
        self.tree.lock().interfaces.get(&interface).map(|i| i.driver)
    }

    /// Per-driver number of an interface
    pub fn interface_number(&self, interface: InterfaceId) -> Option<u32> {
        self.tree.lock().interfaces.get(&interface).map(|i| i.number)
    }

    /// Property list of an interface
    pub fn interface_properties(&self, interface: InterfaceId) -> Option<Arc<RwLock<PropertyList>>> {
        self.tree
            .lock()
            .interfaces
            .get(&interface)
            .map(|i| Arc::clone(&i.properties))
    }

    /// Universes of an interface, both directions, in creation order
    pub fn interface_universes(&self, interface: InterfaceId) -> Vec<UniverseId> {
        self.tree
            .lock()
            .interfaces
            .get(&interface)
            .map(|i| i.universes.clone())
            .unwrap_or_default()
    }

    /// Delete an interface and its universes
    pub fn delete_interface(&self, interface: InterfaceId) -> Result<()> {
        let detached = {
            let mut tree = self.tree.lock();
            self.detach_interface(&mut tree, interface)
                .ok_or(DmxError::InterfaceNotFound(interface))?
        };
        self.finish_interface(detached);
        Ok(())
    }

    fn detach_interface(&self, tree: &mut Tree, interface: InterfaceId) -> Option<DetachedInterface> {
        let entry = tree.interfaces.remove(&interface)?;
        if let Some(driver) = tree.drivers.get_mut(&entry.driver) {
            driver.interfaces.retain(|i| *i != interface);
        }
        let universes = entry
            .universes
            .iter()
            .filter_map(|id| self.table(id.direction).write().take(id.index))
            .collect();
        Some(DetachedInterface {
            id: interface,
            backend: entry.backend,
            universes,
        })
    }

    fn finish_interface(&self, interface: DetachedInterface) {
        for universe in interface.universes {
            self.finish_universe(universe);
        }
        interface.backend.destroy();
        tracing::info!("Interface {} deleted", interface.id);
    }

    // ----- universes -----

    /// Create a universe on an interface.
    ///
    /// The lowest free index of `direction` is reserved before the backend
    /// factory runs and released again if the factory fails. A `slots=512`
    /// property is added unless the caller supplied one.
    pub fn create_universe(
        &self,
        interface: InterfaceId,
        direction: Direction,
        properties: PropertyList,
    ) -> Result<Arc<Universe>> {
        let (family, driver, interface_properties, backend) = {
            let tree = self.tree.lock();
            let entry = tree
                .interfaces
                .get(&interface)
                .ok_or(DmxError::InterfaceNotFound(interface))?;
            let (family, driver) = tree
                .qualified_name(entry.driver)
                .ok_or_else(|| DmxError::DriverNotFound(entry.driver.to_string()))?;
            (
                family,
                driver,
                Arc::clone(&entry.properties),
                Arc::clone(&entry.backend),
            )
        };

        let mut properties = properties;
        if properties.find("slots").is_none() {
            properties.add(Property::create_long("slots", SLOTS_PER_UNIVERSE as i64))?;
        }

        let index = self
            .table(direction)
            .write()
            .reserve()
            .ok_or(DmxError::IndexSpaceExhausted(direction))?;
        let id = UniverseId::new(direction, index);
        let signal = ChangeSignal::new(Arc::clone(&self.signals), id);

        let (created, connector, conn_id) = {
            let interface_config = interface_properties.read();
            let mut setup =
                UniverseSetup::new(direction, index, &mut properties, &interface_config, signal);
            let created = backend.create_universe(&mut setup);
            (created, setup.connector, setup.conn_id)
        };

        let universe_backend = match created {
            Ok(backend) => backend,
            Err(e) => {
                self.table(direction).write().release(index);
                tracing::warn!("{}/{}: creating {} universe failed: {}", family, driver, direction, e);
                return Err(e);
            }
        };

        let universe = Arc::new(Universe::new(
            id,
            interface,
            family,
            driver,
            connector,
            conn_id,
            properties,
            interface_properties,
            universe_backend,
        ));

        {
            let mut tree = self.tree.lock();
            match tree.interfaces.get_mut(&interface) {
                Some(entry) => {
                    entry.universes.push(id);
                    self.table(direction).write().install(index, Arc::clone(&universe));
                }
                None => {
                    drop(tree);
                    universe.destroy();
                    self.table(direction).write().release(index);
                    return Err(DmxError::InterfaceNotFound(interface));
                }
            }
        }

        tracing::info!(
            "Universe {} created ({}/{} \"{}\"/{})",
            id,
            universe.family_name(),
            universe.driver_name(),
            universe.connector(),
            universe.conn_id()
        );
        Ok(universe)
    }

    /// Delete a universe. The backend's destroy hook runs before the index
    /// becomes free again.
    pub fn delete_universe(&self, id: UniverseId) -> Result<()> {
        let universe = {
            let mut tree = self.tree.lock();
            let universe = self
                .table(id.direction)
                .write()
                .take(id.index)
                .ok_or(DmxError::UniverseNotFound {
                    direction: id.direction,
                    index: id.index,
                })?;
            if let Some(entry) = tree.interfaces.get_mut(&universe.interface()) {
                entry.universes.retain(|u| *u != id);
            }
            universe
        };
        self.finish_universe(universe);
        Ok(())
    }

    fn finish_universe(&self, universe: Arc<Universe>) {
        let id = universe.id();
        universe.destroy();
        self.table(id.direction).write().release(id.index);
        tracing::info!("Universe {} deleted", id);
    }

    /// Look up a live universe
    pub fn universe(&self, direction: Direction, index: usize) -> Option<Arc<Universe>> {
        self.table(direction).read().get(index)
    }

    /// All live universes of a direction, by index
    pub fn universes(&self, direction: Direction) -> Vec<Arc<Universe>> {
        self.table(direction).read().live().cloned().collect()
    }

    /// Number of live universes of a direction
    pub fn used_universes(&self, direction: Direction) -> usize {
        self.table(direction).read().live().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{FactoryDriver, UniverseBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Null;

    impl UniverseBackend for Null {
        fn read_slots(&self, _offset: usize, buf: &mut [u8]) -> Result<usize> {
            buf.fill(0);
            Ok(buf.len())
        }
    }

    fn null_driver() -> Arc<dyn DriverBackend> {
        Arc::new(FactoryDriver::new(|_| Ok(Arc::new(Null) as Arc<dyn UniverseBackend>)))
    }

    fn setup() -> (Registry, FamilyId, DriverId, InterfaceId) {
        let registry = Registry::new();
        let family = registry.create_family("test").unwrap();
        let driver = registry
            .create_driver(family, DriverSpec::new("null", null_driver()))
            .unwrap();
        let interface = registry.create_interface(driver, PropertyList::new()).unwrap();
        (registry, family, driver, interface)
    }

    #[test]
    fn test_family_name_collision() {
        let registry = Registry::new();
        registry.create_family("a").unwrap();
        assert!(matches!(
            registry.create_family("a"),
            Err(DmxError::FamilyExists(_))
        ));
        assert_eq!(registry.family_names(), vec!["a"]);
    }

    #[test]
    fn test_driver_name_collision() {
        let (registry, family, _, _) = setup();
        assert!(matches!(
            registry.create_driver(family, DriverSpec::new("null", null_driver())),
            Err(DmxError::DriverExists { .. })
        ));
        assert_eq!(registry.drivers(family).len(), 1);
    }

    #[test]
    fn test_lowest_free_index() {
        let (registry, _, _, interface) = setup();
        let a = registry.create_universe(interface, Direction::Output, PropertyList::new()).unwrap();
        let b = registry.create_universe(interface, Direction::Output, PropertyList::new()).unwrap();
        let c = registry.create_universe(interface, Direction::Input, PropertyList::new()).unwrap();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 0));

        registry.delete_universe(a.id()).unwrap();
        let d = registry.create_universe(interface, Direction::Output, PropertyList::new()).unwrap();
        assert_eq!(d.index(), 0);
    }

    #[test]
    fn test_slots_property_added() {
        let (registry, _, _, interface) = setup();
        let u = registry.create_universe(interface, Direction::Output, PropertyList::new()).unwrap();
        assert_eq!(u.find_property("slots").unwrap().get_long().unwrap(), 512);
        assert_eq!(u.connector(), "unknown");
        assert_eq!(u.conn_id(), -1);
    }

    #[test]
    fn test_index_exhaustion() {
        let (registry, _, _, interface) = setup();
        for _ in 0..MAX_UNIVERSES {
            registry.create_universe(interface, Direction::Input, PropertyList::new()).unwrap();
        }
        assert!(matches!(
            registry.create_universe(interface, Direction::Input, PropertyList::new()),
            Err(DmxError::IndexSpaceExhausted(Direction::Input))
        ));
        assert!(registry.create_universe(interface, Direction::Output, PropertyList::new()).is_ok());
    }

    #[test]
    fn test_failed_factory_releases_index() {
        let registry = Registry::new();
        let family = registry.create_family("test").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let driver = registry
            .create_driver(
                family,
                DriverSpec::new(
                    "picky",
                    Arc::new(FactoryDriver::new(move |setup| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        match setup.direction() {
                            Direction::Output => Ok(Arc::new(Null) as Arc<dyn UniverseBackend>),
                            Direction::Input => Err(DmxError::DriverRejected("no inputs".into())),
                        }
                    })),
                ),
            )
            .unwrap();
        let interface = registry.create_interface(driver, PropertyList::new()).unwrap();

        assert!(registry.create_universe(interface, Direction::Input, PropertyList::new()).is_err());
        assert_eq!(registry.used_universes(Direction::Input), 0);
        assert!(registry.interface_universes(interface).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_find_family_driver() {
        let (registry, _, driver, _) = setup();
        assert_eq!(registry.find_family_driver("test/null"), Some(driver));
        assert_eq!(registry.find_family_driver("test/none"), None);
        assert_eq!(registry.find_family_driver("testnull"), None);
    }

    #[test]
    fn test_interface_defaults_and_overrides() {
        let registry = Registry::new();
        let family = registry.create_family("test").unwrap();
        let defaults = PropertyList::parse("iobase=0x300,irq=5").unwrap();
        let driver = registry
            .create_driver(family, DriverSpec::new("null", null_driver()).with_properties(defaults))
            .unwrap();

        let interface = registry
            .create_interface(driver, PropertyList::parse("irq=7").unwrap())
            .unwrap();
        let props = registry.interface_properties(interface).unwrap();
        let props = props.read();
        assert_eq!(props.find("iobase").unwrap().get_long().unwrap(), 0x300);
        assert_eq!(props.find("irq").unwrap().get_long().unwrap(), 7);
        assert_eq!(registry.interface_number(interface), Some(0));
    }
}
