//! Error taxonomy for the emulation core.
//!
//! Startup failures (bad ROM) and runtime failures (unknown opcode) are the
//! only conditions that propagate as `Result`s out of the core; everything
//! else the hardware itself defines a recovery for (bank-0 remap, discarded
//! ROM writes) is handled locally and never surfaces here.

use thiserror::Error;

/// Errors that can terminate the emulator.
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("failed to open ROM file: {0}")]
    RomOpenFailed(#[from] std::io::Error),

    #[error("ROM file too short: found {found} bytes, need at least {needed}")]
    RomTooShort { found: usize, needed: usize },

    #[error("unknown opcode ${opcode:02X} at PC=${pc:04X}")]
    UnknownOpcode { pc: u16, opcode: u8 },

    #[error("unknown CB-prefixed opcode ${opcode:02X} at PC=${pc:04X}")]
    UnknownCbOpcode { pc: u16, opcode: u8 },
}
