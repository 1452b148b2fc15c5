//! Error types for device construction and execution.
//!
//! Guest misbehavior (invalid opcodes, unknown I/O, stack excursions) is
//! never an error at this level: it is logged and execution continues with
//! a defined fallback. Only host misuse is fatal — a malformed model
//! configuration at construction, or a program counter leaving flash.

use thiserror::Error;

/// Raised during construction or flash load; the device is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid model configuration, prefixed with the model name.
    #[error("{model}: {reason}")]
    Model { model: String, reason: String },

    /// A block's I/O or IV window is out of range or overlaps another block.
    #[error("block {block}: {reason}")]
    Wiring { block: &'static str, reason: String },
}

/// Unrecoverable failure while stepping the device.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The program counter left the flash address space.
    #[error("invalid PC value (overflow): 0x{pc:05X}")]
    PcOutOfRange { pc: u32 },
}
