//! Membus family: coalescing backend over a [`SlotTransport`]
//!
//! Application writes only touch an [`OutputStage`]; a periodic
//! [`tick`](MembusInterface::tick) takes the dirty range of every output
//! universe and hands exactly that span to the transport. Input universes are
//! sampled on the same tick and signal only the span that changed.
//!
//! Interface properties:
//! - `frequency` (live): tick rate in Hz
//! - `startcode` (live): start code sent with every transfer
//! - `framecount` (live, read-only): completed ticks

use dmxbus_core::{
    ChangeSignal, Direction, DmxError, DriverBackend, DriverSpec, InputMirror, InterfaceBackend,
    InterfaceSetup, OutputStage, Property, PropertyList, Registry, Result, Timing, UniverseBackend,
    UniverseSetup, SLOTS_PER_UNIVERSE,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::live::{long_or, take_initial_long};
use crate::scheduler::PeriodicTask;
use crate::transport::{ArtNetTransport, MemoryTransport, SlotTransport};
use crate::Registered;

pub const FAMILY: &str = "membus";
pub const MEMORY_DRIVER: &str = "membus";
pub const ARTNET_DRIVER: &str = "artnet";

pub const DEFAULT_FREQUENCY: i64 = 44;
pub const MAX_FREQUENCY: i64 = 1000;

/// Line timing reported by membus universes, in microseconds
const TIMING: Timing = Timing {
    break_size: Some(88),
    mab_size: Some(8),
};

/// Builds the transport of a new interface from its configuration
pub type TransportFactory =
    dyn Fn(&mut InterfaceSetup<'_>) -> Result<Arc<dyn SlotTransport>> + Send + Sync;

struct MembusOutput {
    port: usize,
    stage: OutputStage,
    interface: Weak<MembusInterface>,
}

impl UniverseBackend for MembusOutput {
    fn write_slots(&self, offset: usize, data: &[u8]) -> Result<usize> {
        Ok(self.stage.write(offset, data))
    }

    fn read_slots(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stage.read(offset, buf))
    }

    fn timing(&self) -> Timing {
        TIMING
    }

    fn destroy(&self) {
        if let Some(iface) = self.interface.upgrade() {
            iface.outputs.lock().retain(|o| o.port != self.port);
        }
    }
}

struct MembusInput {
    port: usize,
    mirror: InputMirror,
    signal: ChangeSignal,
    interface: Weak<MembusInterface>,
}

impl UniverseBackend for MembusInput {
    fn read_slots(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        Ok(self.mirror.consume(offset, buf))
    }

    fn data_available(&self, _start: usize, _size: usize) -> Result<bool> {
        Ok(self.mirror.data_available())
    }

    fn timing(&self) -> Timing {
        TIMING
    }

    fn destroy(&self) {
        if let Some(iface) = self.interface.upgrade() {
            iface.inputs.lock().retain(|i| i.port != self.port);
        }
    }
}

/// One device behind a transport
pub struct MembusInterface {
    label: String,
    transport: Arc<dyn SlotTransport>,
    frequency: AtomicI64,
    start_code: AtomicU8,
    frame_count: AtomicU64,
    outputs: Mutex<Vec<Arc<MembusOutput>>>,
    inputs: Mutex<Vec<Arc<MembusInput>>>,
    destroyed: AtomicBool,
    me: Weak<MembusInterface>,
}

impl MembusInterface {
    pub fn frequency(&self) -> i64 {
        self.frequency.load(Ordering::Acquire)
    }

    pub fn set_frequency(&self, hz: i64) -> Result<()> {
        if !(1..=MAX_FREQUENCY).contains(&hz) {
            return Err(DmxError::InvalidPropertyValue {
                name: "frequency".to_string(),
                value: hz.to_string(),
            });
        }
        self.frequency.store(hz, Ordering::Release);
        tracing::debug!("{}: frequency set to {} Hz", self.label, hz);
        Ok(())
    }

    pub fn start_code(&self) -> u8 {
        self.start_code.load(Ordering::Acquire)
    }

    pub fn set_start_code(&self, code: i64) -> Result<()> {
        let code = u8::try_from(code).map_err(|_| DmxError::InvalidPropertyValue {
            name: "startcode".to_string(),
            value: code.to_string(),
        })?;
        self.start_code.store(code, Ordering::Release);
        Ok(())
    }

    /// Ticks completed so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    pub fn transport(&self) -> &Arc<dyn SlotTransport> {
        &self.transport
    }

    /// Flush every dirty output span and sample every input port.
    ///
    /// A failed transfer puts its range back so the next tick retries it.
    /// The first error is returned after all ports were attempted.
    pub fn tick(&self) -> Result<()> {
        let _span = tracing::trace_span!("tick", interface = %self.label).entered();
        let start_code = self.start_code();
        let mut first_error = None;

        let outputs: Vec<_> = self.outputs.lock().clone();
        for output in &outputs {
            let Some(flush) = output.stage.take_dirty() else {
                continue;
            };
            match self
                .transport
                .send(output.port, start_code, flush.offset, &flush.data)
            {
                Ok(()) => tracing::trace!(port = output.port, range = ?flush.range(), "flushed"),
                Err(e) => {
                    output.stage.requeue(&flush);
                    tracing::debug!(port = output.port, "transfer failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        let inputs: Vec<_> = self.inputs.lock().clone();
        let mut frame = [0u8; SLOTS_PER_UNIVERSE];
        for input in &inputs {
            match self.transport.receive(input.port, &mut frame) {
                Ok(()) => {
                    if let Some(changed) = input.mirror.sample_and_signal(&frame, &input.signal) {
                        tracing::trace!(port = input.port, ?changed, "input changed");
                    }
                }
                Err(e) => {
                    tracing::debug!(port = input.port, "input sample failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        self.frame_count.fetch_add(1, Ordering::AcqRel);
        first_error.map_or(Ok(()), Err)
    }

    /// Mark every output dirty so the next tick resends full frames
    pub fn refresh_all(&self) {
        for output in self.outputs.lock().iter() {
            output.stage.mark_all_dirty();
        }
    }

    fn free_port(used: impl Iterator<Item = usize>, available: usize) -> Option<usize> {
        let used: Vec<usize> = used.collect();
        (0..available).find(|port| !used.contains(port))
    }

    fn bind_properties(self: &Arc<Self>, properties: &mut PropertyList) -> Result<()> {
        let frequency = take_initial_long(properties, "frequency", DEFAULT_FREQUENCY)?;
        self.set_frequency(frequency)?;
        let start_code = take_initial_long(properties, "startcode", 0)?;
        self.set_start_code(start_code)?;
        properties.remove_by_name("framecount");

        let property = Property::create_long("frequency", 0);
        property.bind_live_long(
            Arc::clone(self),
            |iface: &MembusInterface| Ok(iface.frequency()),
            Some(|iface: &MembusInterface, hz: i64| iface.set_frequency(hz)),
        )?;
        properties.add(property)?;

        let property = Property::create_long("startcode", 0);
        property.bind_live_long(
            Arc::clone(self),
            |iface: &MembusInterface| Ok(i64::from(iface.start_code())),
            Some(|iface: &MembusInterface, code: i64| iface.set_start_code(code)),
        )?;
        properties.add(property)?;

        let property = Property::create_long("framecount", 0);
        property.bind_live_long(
            Arc::clone(self),
            |iface: &MembusInterface| {
                i64::try_from(iface.frame_count()).map_err(|e| DmxError::Backend(e.to_string()))
            },
            None::<fn(&MembusInterface, i64) -> Result<()>>,
        )?;
        properties.add(property)
    }
}

impl InterfaceBackend for MembusInterface {
    fn create_universe(&self, setup: &mut UniverseSetup<'_>) -> Result<Arc<dyn UniverseBackend>> {
        let backend: Arc<dyn UniverseBackend> = match setup.direction() {
            Direction::Output => {
                let mut outputs = self.outputs.lock();
                let port = Self::free_port(outputs.iter().map(|o| o.port), self.transport.output_ports())
                    .ok_or_else(|| {
                        DmxError::DriverRejected(format!("{}: no free output port", self.label))
                    })?;
                let output = Arc::new(MembusOutput {
                    port,
                    stage: OutputStage::new(),
                    interface: self.me.clone(),
                });
                // first tick pushes a full frame
                output.stage.mark_all_dirty();
                outputs.push(Arc::clone(&output));
                setup.set_connector("port", port as i64);
                output
            }
            Direction::Input => {
                let mut inputs = self.inputs.lock();
                let port = Self::free_port(inputs.iter().map(|i| i.port), self.transport.input_ports())
                    .ok_or_else(|| {
                        DmxError::DriverRejected(format!("{}: no free input port", self.label))
                    })?;
                let input = Arc::new(MembusInput {
                    port,
                    mirror: InputMirror::new(),
                    signal: setup.signal(),
                    interface: self.me.clone(),
                });
                inputs.push(Arc::clone(&input));
                setup.set_connector("port", port as i64);
                input
            }
        };
        Ok(backend)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.outputs.lock().clear();
        self.inputs.lock().clear();
        tracing::info!("{} destroyed after {} frames", self.label, self.frame_count());
    }
}

impl PeriodicTask for MembusInterface {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn period(&self) -> Duration {
        let hz = self.frequency().clamp(1, MAX_FREQUENCY) as u64;
        Duration::from_micros(1_000_000 / hz)
    }

    fn run(&self) -> Result<()> {
        self.tick()
    }

    fn is_finished(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

/// Driver creating [`MembusInterface`]s over transports built by a factory
pub struct MembusDriver {
    factory: Arc<TransportFactory>,
    interfaces: Mutex<Vec<Weak<MembusInterface>>>,
}

impl MembusDriver {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&mut InterfaceSetup<'_>) -> Result<Arc<dyn SlotTransport>> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            interfaces: Mutex::new(Vec::new()),
        }
    }

    /// Driver over an in-memory register file sized by the `outputs` and
    /// `inputs` interface properties
    pub fn memory() -> Self {
        Self::new(|setup| {
            let outputs = port_count(setup.properties(), "outputs", 4)?;
            let inputs = port_count(setup.properties(), "inputs", 1)?;
            Ok(Arc::new(MemoryTransport::new(outputs, inputs)) as Arc<dyn SlotTransport>)
        })
    }

    /// Driver sending Art-Net to the `target` interface property, starting at
    /// Art-Net universe `universe`
    pub fn artnet() -> Self {
        Self::new(|setup| {
            let properties = setup.properties();
            let target = properties
                .find("target")
                .ok_or_else(|| DmxError::DriverRejected("artnet: missing target property".to_string()))?
                .get_string()?;
            let base = long_or(properties, "universe", 0)?;
            let base = u16::try_from(base).map_err(|_| DmxError::InvalidPropertyValue {
                name: "universe".to_string(),
                value: base.to_string(),
            })?;
            let outputs = port_count(properties, "outputs", 1)?;
            Ok(Arc::new(ArtNetTransport::new(&target, base, outputs)?) as Arc<dyn SlotTransport>)
        })
    }

    /// Register the `membus` family with its `membus` and `artnet` drivers.
    ///
    /// The family probe picks `artnet` when a `target` property is given.
    pub fn register(registry: &Registry) -> Result<(Registered<MembusDriver>, Registered<MembusDriver>)> {
        let family = registry.create_family(FAMILY)?;
        registry.set_probe(family, |drivers: &[String], probe: &PropertyList| {
            let wanted = if probe.find("target").is_some() {
                ARTNET_DRIVER
            } else {
                MEMORY_DRIVER
            };
            drivers.iter().find(|d| d.as_str() == wanted).cloned()
        })?;

        let memory = Arc::new(MembusDriver::memory());
        let driver = registry.create_driver(
            family,
            DriverSpec::new(MEMORY_DRIVER, memory.clone())
                .with_properties(PropertyList::parse(&format!("frequency={}", DEFAULT_FREQUENCY))?)
                .with_outputs(1)
                .with_inputs(1),
        )?;
        let memory = Registered {
            family,
            driver,
            backend: memory,
        };

        let artnet = Arc::new(MembusDriver::artnet());
        let driver = registry.create_driver(
            family,
            DriverSpec::new(ARTNET_DRIVER, artnet.clone())
                .with_properties(PropertyList::parse(&format!(
                    "frequency={},universe=0",
                    DEFAULT_FREQUENCY
                ))?)
                .with_outputs(1),
        )?;
        let artnet = Registered {
            family,
            driver,
            backend: artnet,
        };

        Ok((memory, artnet))
    }

    /// Live interfaces, for scheduling their ticks
    pub fn interfaces(&self) -> Vec<Arc<MembusInterface>> {
        let mut interfaces = self.interfaces.lock();
        interfaces.retain(|i| i.strong_count() > 0);
        interfaces.iter().filter_map(Weak::upgrade).collect()
    }

    /// Live interfaces as schedulable tasks
    pub fn tasks(&self) -> Vec<Arc<dyn PeriodicTask>> {
        self.interfaces()
            .into_iter()
            .map(|i| i as Arc<dyn PeriodicTask>)
            .collect()
    }
}

impl DriverBackend for MembusDriver {
    fn create_interface(&self, setup: &mut InterfaceSetup<'_>) -> Result<Arc<dyn InterfaceBackend>> {
        let transport = (self.factory)(setup)?;
        let label = format!("{}/{}#{}", setup.family(), setup.driver(), setup.number());

        let interface = Arc::new_cyclic(|me| MembusInterface {
            label,
            transport,
            frequency: AtomicI64::new(DEFAULT_FREQUENCY),
            start_code: AtomicU8::new(0),
            frame_count: AtomicU64::new(0),
            outputs: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            me: me.clone(),
        });
        interface.bind_properties(setup.properties())?;

        self.interfaces.lock().push(Arc::downgrade(&interface));
        tracing::info!(
            "{} created on {} ({} out, {} in)",
            interface.label,
            interface.transport.name(),
            interface.transport.output_ports(),
            interface.transport.input_ports()
        );
        Ok(interface)
    }
}

fn port_count(properties: &PropertyList, name: &str, default: i64) -> Result<usize> {
    let count = long_or(properties, name, default)?;
    usize::try_from(count)
        .ok()
        .filter(|&n| n <= dmxbus_core::MAX_UNIVERSES)
        .ok_or_else(|| DmxError::InvalidPropertyValue {
            name: name.to_string(),
            value: count.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_port_lowest_gap() {
        assert_eq!(MembusInterface::free_port([0, 2].into_iter(), 4), Some(1));
        assert_eq!(MembusInterface::free_port([0, 1].into_iter(), 2), None);
        assert_eq!(MembusInterface::free_port(std::iter::empty(), 0), None);
    }

    #[test]
    fn test_port_count_validation() {
        let list = PropertyList::parse("outputs=-1,inputs=64,ok=2").unwrap();
        assert!(port_count(&list, "outputs", 1).is_err());
        assert!(port_count(&list, "inputs", 1).is_err());
        assert_eq!(port_count(&list, "ok", 1).unwrap(), 2);
        assert_eq!(port_count(&list, "missing", 3).unwrap(), 3);
    }

    #[test]
    fn test_probe_selects_by_target() {
        let registry = Registry::new();
        let (memory, artnet) = MembusDriver::register(&registry).unwrap();

        let family = memory.family;
        assert_eq!(
            registry.autoprobe_driver(family, &PropertyList::new()),
            Some(memory.driver)
        );
        assert_eq!(
            registry.autoprobe_driver(family, &PropertyList::parse("target=127.0.0.1:6454").unwrap()),
            Some(artnet.driver)
        );
    }

    #[test]
    fn test_period_follows_frequency() {
        let registry = Registry::new();
        let (memory, _) = MembusDriver::register(&registry).unwrap();
        registry
            .create_interface(memory.driver, PropertyList::parse("frequency=100").unwrap())
            .unwrap();

        let iface = &memory.backend.interfaces()[0];
        assert_eq!(iface.period(), Duration::from_millis(10));
        iface.set_frequency(1000).unwrap();
        assert_eq!(iface.period(), Duration::from_millis(1));
        assert!(iface.set_frequency(0).is_err());
        assert!(iface.set_start_code(256).is_err());
    }
}
