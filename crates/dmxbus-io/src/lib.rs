//! dmxbus I/O - Multiplexed Output and Input Endpoints
//!
//! Applications see two byte-addressable endpoints, one spanning all output
//! universes and one spanning all input universes. Each [`Session`] on an
//! endpoint supports:
//!
//! - blocking or non-blocking `read`, clamped to the address space
//! - `write` split across universe boundaries (output endpoint)
//! - `seek` from the start or the current position
//! - `poll` / `poll_wait` readiness checks
//! - an optional [`crossbeam_channel`] notification channel
//!
//! Blocked readers wake when a backend reports a change overlapping the
//! requested range, or when they are interrupted.

pub mod error;
pub mod mux;
pub mod session;

pub use error::{IoError, Result};
pub use mux::{Multiplexer, ADDRESS_SPACE};
pub use session::{ChangeEvent, Interrupter, OpenMode, Session};
