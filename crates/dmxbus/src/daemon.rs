//! Bootstrap and main loop of the host daemon

use anyhow::{Context, Result};
use dmxbus_core::{Direction, DriverId, InterfaceId, Property, PropertyList, Registry};
use dmxbus_drivers::{DummyDriver, MembusDriver, Registered, Scheduler};
use dmxbus_io::Multiplexer;
use std::future::Future;
use std::sync::Arc;

use crate::config::{DaemonConfig, InterfaceConfig, RuntimeConfig};

/// Registered families, created interfaces and the I/O layer
pub struct Daemon {
    registry: Arc<Registry>,
    mux: Multiplexer,
    membus: Vec<Registered<MembusDriver>>,
    dummy: Option<Registered<DummyDriver>>,
    runtime: RuntimeConfig,
}

impl Daemon {
    /// Register all families and create the configured interfaces and
    /// universes
    pub fn build(config: &DaemonConfig) -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let (memory, artnet) =
            MembusDriver::register(&registry).context("Failed to register membus family")?;
        let dummy = if config.dummy.enabled {
            Some(DummyDriver::register(&registry).context("Failed to register dummy family")?)
        } else {
            None
        };

        let mux = Multiplexer::new(Arc::clone(&registry));
        let daemon = Self {
            registry,
            mux,
            membus: vec![memory, artnet],
            dummy,
            runtime: config.runtime.clone(),
        };

        if let Some(dummy) = &daemon.dummy {
            let loopback = i64::from(config.dummy.loopback);
            let interface = daemon
                .registry
                .create_interface(dummy.driver, PropertyList::new())
                .context("Failed to create dummy interface")?;
            daemon.create_universes(interface, Direction::Output, config.dummy.outputs, || {
                let mut props = PropertyList::new();
                props.add(Property::create_long("loopback", loopback))?;
                Ok(props)
            })?;
            daemon.create_universes(interface, Direction::Input, config.dummy.inputs, || {
                Ok(PropertyList::new())
            })?;
        }

        for entry in &config.interfaces {
            daemon
                .create_configured_interface(entry)
                .with_context(|| format!("Failed to set up interface {}", entry.driver))?;
        }

        tracing::info!(
            "dmxbus ready: {} output and {} input universes",
            daemon.registry.used_universes(Direction::Output),
            daemon.registry.used_universes(Direction::Input)
        );
        Ok(daemon)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    /// The dummy driver, when enabled
    pub fn dummy(&self) -> Option<&Registered<DummyDriver>> {
        self.dummy.as_ref()
    }

    fn resolve_driver(&self, name: &str, properties: &PropertyList) -> Result<DriverId> {
        if name.contains('/') {
            return self
                .registry
                .find_family_driver(name)
                .with_context(|| format!("Unknown driver {}", name));
        }
        let family = self
            .registry
            .find_family(name)
            .with_context(|| format!("Unknown family {}", name))?;
        self.registry
            .autoprobe_driver(family, properties)
            .with_context(|| format!("No driver of family {} matches the interface properties", name))
    }

    fn create_configured_interface(&self, entry: &InterfaceConfig) -> Result<InterfaceId> {
        let properties = entry.property_list()?;
        let driver = self.resolve_driver(&entry.driver, &properties)?;
        let info = self
            .registry
            .driver_info(driver)
            .with_context(|| format!("Driver {} vanished", entry.driver))?;

        let interface = self.registry.create_interface(driver, properties)?;
        let outputs = entry.outputs.unwrap_or(info.declared_outputs);
        let inputs = entry.inputs.unwrap_or(info.declared_inputs);
        self.create_universes(interface, Direction::Output, outputs, || Ok(PropertyList::new()))?;
        self.create_universes(interface, Direction::Input, inputs, || Ok(PropertyList::new()))?;
        Ok(interface)
    }

    fn create_universes<F>(
        &self,
        interface: InterfaceId,
        direction: Direction,
        count: usize,
        properties: F,
    ) -> Result<()>
    where
        F: Fn() -> dmxbus_core::Result<PropertyList>,
    {
        for n in 0..count {
            self.registry
                .create_universe(interface, direction, properties()?)
                .with_context(|| format!("Failed to create {} universe {} of interface {}", direction, n, interface))?;
        }
        Ok(())
    }

    /// One line per live universe
    pub fn status_lines(&self) -> Vec<String> {
        self.registry
            .universe_list()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Registry tree as pretty JSON
    pub fn structure_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.registry.structure())
            .context("Failed to serialize registry structure")
    }

    fn log_status(&self) {
        let info = self.registry.info();
        tracing::info!(
            "dmxbus {}: {}/{} output, {}/{} input universes",
            info.version,
            info.used_out_universes,
            info.max_out_universes,
            info.used_in_universes,
            info.max_in_universes
        );
        for line in self.status_lines() {
            tracing::debug!("{}", line);
        }
    }

    /// Run the periodic tasks until `shutdown` resolves, then tear down.
    ///
    /// Blocked readers are woken before the registry goes away.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut scheduler = Scheduler::new(self.runtime.scheduler());
        for driver in &self.membus {
            for task in driver.backend.tasks() {
                scheduler.spawn(task);
            }
        }

        let mut status = tokio::time::interval(self.runtime.status_interval());
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = status.tick() => self.log_status(),
            }
        }

        tracing::info!("Shutting down");
        self.mux.shutdown();
        scheduler.shutdown().await;
        self.registry.teardown();
        Ok(())
    }

    /// Tear down without running, e.g. after `--dump-structure`
    pub fn teardown(self) {
        self.mux.shutdown();
        self.registry.teardown();
    }
}
