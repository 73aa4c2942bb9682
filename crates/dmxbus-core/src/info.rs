//! Introspection and parameter access
//!
//! Read-only views of the registry for status displays and control
//! surfaces, plus get/set of named universe parameters.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DmxError;
use crate::property::PropertySnapshot;
use crate::registry::{InterfaceId, Registry};
use crate::universe::{Direction, Universe, UniverseId};
use crate::{Result, MAX_UNIVERSES, SLOTS_PER_UNIVERSE};

/// Framework version reported by [`Registry::info`]
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Global framework summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub version: String,
    pub max_out_universes: usize,
    pub max_in_universes: usize,
    pub used_out_universes: usize,
    pub used_in_universes: usize,
    pub families: Vec<String>,
}

/// One page of a family's driver names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverPage {
    /// Number of drivers in the family
    pub total: usize,
    /// Names starting at the requested offset
    pub names: Vec<String>,
}

/// Capability metadata of one universe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub family: String,
    pub driver: String,
    pub connector: String,
    pub conn_id: i64,
    pub max_slots: usize,
    pub break_size: Option<u32>,
    pub mab_size: Option<u32>,
}

/// One line of the universe listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseRow {
    pub id: UniverseId,
    /// First byte in the direction's flat address space
    pub first: usize,
    /// Last byte, inclusive
    pub last: usize,
    pub family: String,
    pub driver: String,
    pub connector: String,
    pub conn_id: i64,
}

impl fmt::Display for UniverseRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<5} {}-{} {}/{} \"{}\"/{}",
            self.id.to_string(),
            self.first,
            self.last,
            self.family,
            self.driver,
            self.connector,
            self.conn_id
        )
    }
}

/// Registry tree: family level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyNode {
    pub name: String,
    pub drivers: Vec<DriverNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverNode {
    pub name: String,
    pub declared_outputs: usize,
    pub declared_inputs: usize,
    pub interfaces: Vec<InterfaceNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceNode {
    pub id: InterfaceId,
    pub number: u32,
    pub properties: Vec<PropertySnapshot>,
    pub universes: Vec<UniverseNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseNode {
    pub id: UniverseId,
    pub connector: String,
    pub conn_id: i64,
    pub properties: Vec<PropertySnapshot>,
}

impl UniverseNode {
    fn from_universe(universe: &Universe) -> Self {
        Self {
            id: universe.id(),
            connector: universe.connector().to_string(),
            conn_id: universe.conn_id(),
            properties: universe.properties().read().snapshot(),
        }
    }
}

impl Registry {
    /// Version, index space usage and family names
    pub fn info(&self) -> FrameworkInfo {
        FrameworkInfo {
            version: VERSION.to_string(),
            max_out_universes: MAX_UNIVERSES,
            max_in_universes: MAX_UNIVERSES,
            used_out_universes: self.used_universes(Direction::Output),
            used_in_universes: self.used_universes(Direction::Input),
            families: self.family_names(),
        }
    }

    /// Driver names of `family`, skipping the first `offset`
    pub fn driver_names(&self, family: &str, offset: usize) -> Result<DriverPage> {
        let family = self
            .find_family(family)
            .ok_or_else(|| DmxError::FamilyNotFound(family.to_string()))?;
        let names: Vec<String> = self
            .drivers(family)
            .into_iter()
            .filter_map(|id| self.driver_info(id).map(|d| d.name))
            .collect();
        Ok(DriverPage {
            total: names.len(),
            names: names.into_iter().skip(offset).collect(),
        })
    }

    fn live_universe(&self, direction: Direction, index: usize) -> Result<std::sync::Arc<Universe>> {
        self.universe(direction, index)
            .ok_or(DmxError::UniverseNotFound { direction, index })
    }

    /// Capability metadata of a universe
    pub fn capabilities(&self, direction: Direction, index: usize) -> Result<Capabilities> {
        let universe = self.live_universe(direction, index)?;
        let max_slots = universe
            .find_property("slots")
            .and_then(|p| p.get_long().ok())
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(SLOTS_PER_UNIVERSE);
        let timing = universe.timing();
        Ok(Capabilities {
            family: universe.family_name().to_string(),
            driver: universe.driver_name().to_string(),
            connector: universe.connector().to_string(),
            conn_id: universe.conn_id(),
            max_slots,
            break_size: timing.break_size,
            mab_size: timing.mab_size,
        })
    }

    /// Read a universe parameter, falling back to its interface.
    ///
    /// An unknown name yields `Ok(None)`.
    pub fn get_parameter(&self, direction: Direction, index: usize, name: &str) -> Result<Option<String>> {
        let universe = self.live_universe(direction, index)?;
        universe
            .find_property(name)
            .map(|p| p.get_string())
            .transpose()
    }

    /// Write a universe parameter, falling back to its interface.
    ///
    /// Returns `Ok(false)` if no property of that name exists.
    pub fn set_parameter(&self, direction: Direction, index: usize, name: &str, value: &str) -> Result<bool> {
        let universe = self.live_universe(direction, index)?;
        match universe.find_property(name) {
            Some(property) => {
                property.set_string(value)?;
                tracing::debug!("{}: {} = {}", universe.id(), name, value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Names usable with [`get_parameter`](Self::get_parameter)
    pub fn parameter_names(&self, direction: Direction, index: usize) -> Result<Vec<String>> {
        Ok(self.live_universe(direction, index)?.property_names())
    }

    /// One row per live universe, outputs first
    pub fn universe_list(&self) -> Vec<UniverseRow> {
        Direction::ALL
            .iter()
            .flat_map(|&d| self.universes(d))
            .map(|u| {
                let first = u.id().base_offset();
                UniverseRow {
                    id: u.id(),
                    first,
                    last: first + SLOTS_PER_UNIVERSE - 1,
                    family: u.family_name().to_string(),
                    driver: u.driver_name().to_string(),
                    connector: u.connector().to_string(),
                    conn_id: u.conn_id(),
                }
            })
            .collect()
    }

    /// Snapshot of the whole family/driver/interface/universe tree
    pub fn structure(&self) -> Vec<FamilyNode> {
        // Collect handles under the lock, read properties after releasing it:
        // live getters may call back into the registry.
        let skeleton: Vec<_> = {
            let tree = self.lock_tree();
            tree.families
                .iter()
                .map(|family| {
                    let drivers: Vec<_> = family
                        .drivers
                        .iter()
                        .filter_map(|id| tree.drivers.get(id))
                        .map(|driver| {
                            let interfaces: Vec<_> = driver
                                .interfaces
                                .iter()
                                .filter_map(|id| tree.interfaces.get(id).map(|i| (*id, i)))
                                .map(|(id, i)| {
                                    (id, i.number, i.properties.clone(), i.universes.clone())
                                })
                                .collect();
                            (
                                driver.name.clone(),
                                driver.declared_outputs,
                                driver.declared_inputs,
                                interfaces,
                            )
                        })
                        .collect();
                    (family.name.clone(), drivers)
                })
                .collect()
        };

        skeleton
            .into_iter()
            .map(|(name, drivers)| FamilyNode {
                name,
                drivers: drivers
                    .into_iter()
                    .map(|(name, declared_outputs, declared_inputs, interfaces)| DriverNode {
                        name,
                        declared_outputs,
                        declared_inputs,
                        interfaces: interfaces
                            .into_iter()
                            .map(|(id, number, properties, universes)| InterfaceNode {
                                id,
                                number,
                                properties: properties.read().snapshot(),
                                universes: universes
                                    .iter()
                                    .filter_map(|u| self.universe(u.direction, u.index))
                                    .map(|u| UniverseNode::from_universe(&u))
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_row_format() {
        let row = UniverseRow {
            id: UniverseId::new(Direction::Output, 1),
            first: 512,
            last: 1023,
            family: "dummy".into(),
            driver: "dummy".into(),
            connector: "none".into(),
            conn_id: 1,
        };
        assert_eq!(row.to_string(), "OUT1  512-1023 dummy/dummy \"none\"/1");
    }

    #[test]
    fn test_info_on_empty_registry() {
        let registry = Registry::new();
        let info = registry.info();
        assert_eq!(info.max_out_universes, MAX_UNIVERSES);
        assert_eq!(info.used_in_universes, 0);
        assert!(info.families.is_empty());
        assert!(registry.structure().is_empty());
        assert!(registry.universe_list().is_empty());
    }

    #[test]
    fn test_missing_universe_errors() {
        let registry = Registry::new();
        assert!(matches!(
            registry.capabilities(Direction::Output, 0),
            Err(DmxError::UniverseNotFound { .. })
        ));
        assert!(matches!(
            registry.driver_names("nope", 0),
            Err(DmxError::FamilyNotFound(_))
        ));
    }
}
