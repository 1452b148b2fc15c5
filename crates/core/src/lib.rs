//! # xmega-core
//!
//! Cycle-accurate simulation core for 8-bit AVR XMEGA microcontrollers.
//!
//! Executes raw machine code against a faithful model of the CPU (full
//! instruction set with exact SREG semantics, RAMPX/Y/Z/D and EIND
//! extensions, CCP protection timer), the unified data space (I/O blocks,
//! internal SRAM, optional external SRAM, an emulator-private window), the
//! PMIC interrupt controller (4 priority levels + NMI), and the CLK/OSC
//! clock tree driving a deterministic event scheduler.
//!
//! ## Architecture
//!
//! - [`Device`] — Top-level simulator wiring flash, SRAM, register file,
//!   scheduler and peripheral blocks together
//! - [`ModelConf`] — Per-model memory map configuration (flash/SRAM/EEPROM
//!   sizes, boot section, external SRAM)
//! - [`Block`] — Contract every peripheral satisfies: an I/O window, an
//!   optional interrupt-vector window, reset and vector-acknowledge hooks
//! - [`blocks`] — CPU core registers, CLK, OSC, PMIC, GPIOR, and a 16-bit
//!   Timer/Counter
//! - [`clock`] — Multi-domain clock scheduler (SYS/CPU/PER/PER2/PER4)
//! - [`hex`] — Intel HEX reader producing flash images
//!
//! The core is single-threaded and cooperative: all state is owned by the
//! [`Device`] and mutated only from within [`Device::step`]. Diagnostics are
//! emitted through `tracing`; the embedding front-end owns the subscriber.

pub mod bits;
pub mod block;
pub mod blocks;
pub mod clock;
pub mod device;
pub mod error;
mod executor;
pub mod hex;
pub mod memory;
pub mod model;

pub use block::Block;
pub use clock::{ClockType, EventTag};
pub use device::Device;
pub use error::{ConfigError, RuntimeError};
pub use memory::{Flash, RegFile};
pub use model::ModelConf;

// Data-space memory map, shared by all XMEGA devices.

/// Size of the I/O register space at the bottom of the data space.
pub const MEM_IO_SIZE: u32 = 0x1000;
/// Start of the memory-mapped EEPROM window.
pub const MEM_EEPROM_START: u32 = 0x1000;
/// Start of internal SRAM.
pub const MEM_SRAM_START: u32 = 0x2000;
/// Start of the emulator-private memory window.
pub const MEM_EMULATOR_START: u32 = 0xFF00;
/// Size of the emulator-private memory window.
pub const MEM_EMULATOR_SIZE: u32 = 0x100;
/// Total addressable data space (24-bit).
pub const MEM_MAX_SIZE: u32 = 0x0100_0000;

/// Largest interrupt vector count of any XMEGA device.
pub const IV_MAX_COUNT: usize = 0x80;

// SREG bit positions
pub const SREG_C: u8 = 0;
pub const SREG_Z: u8 = 1;
pub const SREG_N: u8 = 2;
pub const SREG_V: u8 = 3;
pub const SREG_S: u8 = 4;
pub const SREG_H: u8 = 5;
pub const SREG_T: u8 = 6;
pub const SREG_I: u8 = 7;

/// CCP state bit: I/O register change protection window is open.
pub const CCP_IOREG: u8 = 0x1;
/// CCP state bit: self-programming protection window is open.
pub const CCP_SPM: u8 = 0x2;

/// Interrupt priority level.
///
/// Ordering matters: a pending interrupt is only served while no interrupt
/// of the same or a higher level is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntLvl {
    None = 0,
    Lo = 1,
    Med = 2,
    Hi = 3,
    Nmi = 4,
}

impl IntLvl {
    /// Decode a 2-bit INTLVL register field (NMI is not encodable there).
    pub fn from_field(v: u8) -> IntLvl {
        match v & 0x3 {
            0 => IntLvl::None,
            1 => IntLvl::Lo,
            2 => IntLvl::Med,
            _ => IntLvl::Hi,
        }
    }

    /// Encode back into a 2-bit INTLVL register field.
    pub fn to_field(self) -> u8 {
        match self {
            IntLvl::None => 0,
            IntLvl::Lo => 1,
            IntLvl::Med => 2,
            IntLvl::Hi => 3,
            IntLvl::Nmi => 3,
        }
    }
}
