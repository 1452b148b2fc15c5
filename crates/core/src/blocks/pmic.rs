//! Programmable Multi-level Interrupt Controller block (PMIC).
//!
//! Holds the level-enable bits, the vector relocation bit (IVSEL,
//! CCP-protected) and the level-executing status bits. The pending-vector
//! bookkeeping and the delivery state machine live on the device; this
//! block only owns the architectural registers.

use tracing::warn;

use crate::bits::bit;
use crate::block::{Block, BusCtx};
use crate::CCP_IOREG;

const IO_BASE: u16 = 0x00A0;
const IO_SIZE: u16 = 3;

// STATUS bits
const STATUS_LOLVLEX: u8 = 0;
const STATUS_MEDLVLEX: u8 = 1;
const STATUS_HILVLEX: u8 = 2;
const STATUS_NMIEX: u8 = 7;

// CTRL bits
const CTRL_LOLVLEN: u8 = 0;
const CTRL_MEDLVLEN: u8 = 1;
const CTRL_HILVLEN: u8 = 2;
const CTRL_IVSEL: u8 = 6;

pub struct Pmic {
    pub(crate) status: u8,
    pub(crate) ctrl: u8,
}

impl Pmic {
    pub fn new() -> Self {
        Pmic { status: 0, ctrl: 0 }
    }

    pub fn lolvlen(&self) -> bool {
        bit(self.ctrl, CTRL_LOLVLEN)
    }

    pub fn medlvlen(&self) -> bool {
        bit(self.ctrl, CTRL_MEDLVLEN)
    }

    pub fn hilvlen(&self) -> bool {
        bit(self.ctrl, CTRL_HILVLEN)
    }

    pub fn ivsel(&self) -> bool {
        bit(self.ctrl, CTRL_IVSEL)
    }

    pub fn lolvlex(&self) -> bool {
        bit(self.status, STATUS_LOLVLEX)
    }

    pub fn medlvlex(&self) -> bool {
        bit(self.status, STATUS_MEDLVLEX)
    }

    pub fn hilvlex(&self) -> bool {
        bit(self.status, STATUS_HILVLEX)
    }

    pub fn nmiex(&self) -> bool {
        bit(self.status, STATUS_NMIEX)
    }

    /// Mark the given level as executing (on interrupt acknowledge).
    pub(crate) fn set_executing(&mut self, lvl: crate::IntLvl) {
        self.status |= match lvl {
            crate::IntLvl::Lo => 1 << STATUS_LOLVLEX,
            crate::IntLvl::Med => 1 << STATUS_MEDLVLEX,
            crate::IntLvl::Hi => 1 << STATUS_HILVLEX,
            crate::IntLvl::Nmi => 1 << STATUS_NMIEX,
            crate::IntLvl::None => 0,
        };
    }

    /// Clear the highest executing level (on RETI). Returns false if no
    /// interrupt was executing.
    pub(crate) fn clear_executing(&mut self) -> bool {
        for b in [STATUS_NMIEX, STATUS_HILVLEX, STATUS_MEDLVLEX, STATUS_LOLVLEX] {
            if bit(self.status, b) {
                self.status &= !(1 << b);
                return true;
            }
        }
        false
    }
}

impl Default for Pmic {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for Pmic {
    fn name(&self) -> &'static str {
        "PMIC"
    }

    fn io_base(&self) -> u16 {
        IO_BASE
    }

    fn io_size(&self) -> u16 {
        IO_SIZE
    }

    fn read_io(&mut self, offset: u16) -> u8 {
        match offset {
            0x00 => self.status, // STATUS
            0x01 => {
                warn!(target: "pmic", "I/O read PMIC + 0x01: INTPRI not implemented");
                0
            }
            0x02 => self.ctrl, // CTRL
            _ => {
                warn!(target: "pmic", "I/O read PMIC + 0x{offset:02X}: reserved address");
                0
            }
        }
    }

    fn write_io(&mut self, offset: u16, v: u8, bus: &mut BusCtx) {
        match offset {
            0x01 => {
                warn!(target: "pmic", "I/O write PMIC + 0x01: INTPRI not implemented");
            }
            0x02 => {
                // IVSEL is CCP-protected; the enable bits are not.
                let mut v = v;
                if bus.ccp_state() & CCP_IOREG == 0 {
                    v &= !(1 << CTRL_IVSEL);
                }
                self.ctrl = v;
            }
            _ => {
                warn!(target: "pmic", "I/O write PMIC + 0x{offset:02X}: not writable");
            }
        }
    }

    fn reset(&mut self) {
        self.status = 0;
        self.ctrl = 0;
    }
}
