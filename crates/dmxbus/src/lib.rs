//! dmxbus - Host Daemon
//!
//! Wires the framework together for `dmxbusd`:
//! - **config**: TOML daemon configuration with validation
//! - **logging**: console and file logging via `tracing`
//! - **daemon**: driver registration, interface creation, periodic ticks,
//!   status reports and orderly shutdown

pub mod config;
pub mod daemon;
pub mod logging;

pub use config::{DaemonConfig, DummyConfig, InterfaceConfig, PropertyValue, RuntimeConfig};
pub use daemon::Daemon;
pub use logging::{LogConfig, LogGuard};
