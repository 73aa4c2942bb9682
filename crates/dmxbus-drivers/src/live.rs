//! Helpers for turning configuration entries into live properties

use dmxbus_core::{DmxError, PropertyList, Result};

/// Remove a plain `name` entry from `list` and return its integer value, or
/// `default` when absent. The caller then installs a live property under the
/// same name.
pub(crate) fn take_initial_long(list: &mut PropertyList, name: &str, default: i64) -> Result<i64> {
    let Some(property) = list.find(name) else {
        return Ok(default);
    };
    if property.is_live() {
        return Err(DmxError::PropertyExists(name.to_string()));
    }
    let value = property.get_long()?;
    list.remove(&property);
    Ok(value)
}

/// Integer value of `name`, or `default` when absent
pub(crate) fn long_or(list: &PropertyList, name: &str, default: i64) -> Result<i64> {
    list.find(name).map_or(Ok(default), |p| p.get_long())
}
