//! Error types for the multiplexed endpoints.

use dmxbus_core::{Direction, DmxError};

/// Result type alias for endpoint operations.
pub type Result<T> = std::result::Result<T, IoError>;

/// Errors returned by sessions on the output and input endpoints.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Registry, range or backend error from the core layer
    #[error(transparent)]
    Core(#[from] DmxError),

    /// Seek origin the endpoints do not support
    #[error("Unsupported seek origin: {0}")]
    UnsupportedSeek(&'static str),

    /// Seek would move the position before the start of the endpoint
    #[error("Invalid seek to {0}")]
    InvalidSeek(i64),

    /// A blocked read was cancelled
    #[error("Interrupted while waiting for {0} data")]
    Interrupted(Direction),
}
