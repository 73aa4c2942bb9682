//! Daemon configuration file
//!
//! ```toml
//! [log]
//! level = "debug"
//!
//! [runtime]
//! status_interval_secs = 30
//!
//! [dummy]
//! outputs = 2
//! loopback = true
//!
//! [[interface]]
//! driver = "membus/membus"
//! outputs = 4
//! properties = { frequency = 30, startcode = 0 }
//! ```

use anyhow::{bail, Context, Result};
use dmxbus_core::{Property, PropertyList, MAX_UNIVERSES};
use dmxbus_drivers::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::logging::LogConfig;

/// Maximum accepted configuration file size
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Whole daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub log: LogConfig,
    pub runtime: RuntimeConfig,
    pub dummy: DummyConfig,
    #[serde(rename = "interface")]
    pub interfaces: Vec<InterfaceConfig>,
}

/// `[runtime]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Seconds between universe status reports
    pub status_interval_secs: u64,
    /// Consecutive tick failures before a task backs off
    pub max_failures: u32,
    /// Longest tick period while backing off
    pub max_period_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            status_interval_secs: 60,
            max_failures: 3,
            max_period_ms: 5000,
        }
    }
}

impl RuntimeConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_failures: self.max_failures,
            max_period: Duration::from_millis(self.max_period_ms),
        }
    }
}

/// `[dummy]` section: the dummy family and its default interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DummyConfig {
    pub enabled: bool,
    pub outputs: usize,
    pub inputs: usize,
    /// Loop output universes back to inputs with the same connector id
    pub loopback: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            outputs: 1,
            inputs: 1,
            loopback: false,
        }
    }
}

/// Value of an interface property in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Integer(i64),
    Text(String),
}

/// One `[[interface]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// `"family/driver"`, or a bare family name to autoprobe
    pub driver: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Output universes to create; the driver's declared count if absent
    #[serde(default)]
    pub outputs: Option<usize>,
    #[serde(default)]
    pub inputs: Option<usize>,
}

impl InterfaceConfig {
    /// Build the property list handed to interface creation
    pub fn property_list(&self) -> Result<PropertyList> {
        let mut list = PropertyList::new();
        for (name, value) in &self.properties {
            let property = match value {
                PropertyValue::Integer(v) => Property::create_long(name.as_str(), *v),
                PropertyValue::Text(s) => Property::create_string(name.as_str(), s.as_str()),
            };
            list.add(property)
                .with_context(|| format!("interface {}: property {}", self.driver, name))?;
        }
        Ok(list)
    }
}

impl DaemonConfig {
    /// Read, parse and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let size = std::fs::metadata(path)
            .with_context(|| format!("Failed to access config file: {:?}", path))?
            .len();
        if size > MAX_CONFIG_FILE_SIZE {
            bail!("Config file {:?} too large ({} bytes)", path, size);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        if !self.log.is_valid_level() {
            bail!("Unknown log level: {}", self.log.level);
        }
        if self.runtime.status_interval_secs == 0 {
            bail!("runtime.status_interval_secs must be positive");
        }
        if self.runtime.max_failures == 0 {
            bail!("runtime.max_failures must be positive");
        }
        if self.dummy.outputs > MAX_UNIVERSES || self.dummy.inputs > MAX_UNIVERSES {
            bail!("dummy universe count exceeds {}", MAX_UNIVERSES);
        }

        for (i, interface) in self.interfaces.iter().enumerate() {
            let mut parts = interface.driver.split('/');
            let family = parts.next().unwrap_or_default();
            let driver = parts.next();
            if family.is_empty() || driver.is_some_and(str::is_empty) || parts.next().is_some() {
                bail!("interface #{}: invalid driver name {:?}", i, interface.driver);
            }
            if interface.outputs.unwrap_or(0) > MAX_UNIVERSES || interface.inputs.unwrap_or(0) > MAX_UNIVERSES {
                bail!("interface #{}: universe count exceeds {}", i, MAX_UNIVERSES);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert!(config.validate().is_ok());
        assert!(config.dummy.enabled);
    }

    #[test]
    fn test_property_values() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [[interface]]
            driver = "membus/artnet"
            properties = { target = "10.0.0.5:6454", universe = 3 }
            "#,
        )
        .unwrap();
        let list = config.interfaces[0].property_list().unwrap();
        assert_eq!(list.find("universe").unwrap().get_long().unwrap(), 3);
        assert_eq!(list.find("target").unwrap().get_string().unwrap(), "10.0.0.5:6454");
    }

    #[test]
    fn test_validate_rejects_bad_driver_names() {
        for name in ["", "/x", "a/", "a/b/c"] {
            let config = DaemonConfig {
                interfaces: vec![InterfaceConfig {
                    driver: name.to_string(),
                    properties: BTreeMap::new(),
                    outputs: None,
                    inputs: None,
                }],
                ..DaemonConfig::default()
            };
            assert!(config.validate().is_err(), "{:?} accepted", name);
        }
    }

    #[test]
    fn test_validate_runtime_limits() {
        let mut config = DaemonConfig::default();
        config.runtime.max_failures = 0;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.dummy.inputs = MAX_UNIVERSES + 1;
        assert!(config.validate().is_err());
    }
}
