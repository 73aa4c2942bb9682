//! Error types for the registry, property and universe layers
use thiserror::Error;

use crate::universe::Direction;

/// Core framework errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DmxError {
    /// A family with this name is already registered
    #[error("Family already exists: {0}")]
    FamilyExists(String),

    /// A driver with this name already exists in the family
    #[error("Driver already exists: {family}/{driver}")]
    DriverExists { family: String, driver: String },

    /// Family handle or name does not resolve
    #[error("Family not found: {0}")]
    FamilyNotFound(String),

    /// Driver handle or name does not resolve
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Interface handle does not resolve
    #[error("Interface not found: {0}")]
    InterfaceNotFound(u64),

    /// No live universe at this index
    #[error("Universe not found: {direction} {index}")]
    UniverseNotFound { direction: Direction, index: usize },

    /// Every index of a direction is in use
    #[error("No free {0} universe index left")]
    IndexSpaceExhausted(Direction),

    /// A hardware collaborator hook refused to create an object
    #[error("Driver rejected request: {0}")]
    DriverRejected(String),

    /// The family has no probe function or the probe matched nothing
    #[error("No driver of family {0} matches the probe properties")]
    NoProbeMatch(String),

    /// Offset lies outside the addressable space
    #[error("Offset {offset} out of range (limit {limit})")]
    OffsetOutOfRange { offset: usize, limit: usize },

    /// The backend does not implement this operation
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Hardware I/O failure reported by a backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// A property with this name is already in the list
    #[error("Property already exists: {0}")]
    PropertyExists(String),

    /// Property holds a different kind of value than the operation needs
    #[error("Property type mismatch: {0}")]
    PropertyTypeMismatch(String),

    /// Live property without setter
    #[error("Property is read-only: {0}")]
    PropertyReadOnly(String),

    /// Value cannot be converted for this property
    #[error("Invalid value for property {name}: {value}")]
    InvalidPropertyValue { name: String, value: String },

    /// Malformed `name=value` list
    #[error("Invalid property list syntax: {0}")]
    InvalidPropertySyntax(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, DmxError>;
