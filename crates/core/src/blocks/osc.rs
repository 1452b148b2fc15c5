//! Oscillator control block (OSC).
//!
//! Clock sources are modeled as immediately ready: enabling one sets its
//! STATUS ready bit on the spot. XOSC is the exception — it is not
//! supported and never reports ready. The PLL multiplies its reference
//! source by PLLFAC; the resulting frequency is consumed by the CLK block
//! when the PLL is selected as system clock.

use tracing::{error, warn};

use crate::block::{Block, BusCtx};
use crate::CCP_IOREG;

const IO_BASE: u16 = 0x0050;
const IO_SIZE: u16 = 8;

/// Oscillator failure IV (OSCF), relative to the block's IV base.
const IV_OSCF: u8 = 0;
const IV_COUNT: u8 = 1;

/// PLL reference sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pllsrc {
    Rc2M = 0,
    Rc32M = 2,
    Xosc = 3,
}

pub struct Osc {
    ctrl: u8,
    status: u8,
    xoscctrl: u8,
    /// XOSCFAIL: bit 0 XOSCFDEN (sticky, CCP-gated), bit 1 XOSCFDIF.
    xoscfail: u8,
    rc32kcal: u8,
    pllsrc: Pllsrc,
    pllfac: u8,
    dfllctrl: u8,
    iv_base: u8,
}

impl Osc {
    pub fn new(iv_base: u8) -> Self {
        Osc {
            ctrl: 0x01,
            status: 0x01,
            xoscctrl: 0,
            xoscfail: 0,
            rc32kcal: 0x55,
            pllsrc: Pllsrc::Rc2M,
            pllfac: 0,
            dfllctrl: 0,
            iv_base,
        }
    }

    /// Frequency the PLL produces with the current reference and factor.
    pub fn pll_frequency(&self) -> u32 {
        let f_base: u32 = match self.pllsrc {
            Pllsrc::Rc2M => 2_000_000,
            Pllsrc::Rc32M => 32_000_000 / 4,
            Pllsrc::Xosc => {
                error!(target: "osc", "unsupported PLLSRC value");
                0
            }
        };
        f_base * self.pllfac as u32
    }
}

impl Block for Osc {
    fn name(&self) -> &'static str {
        "OSC"
    }

    fn io_base(&self) -> u16 {
        IO_BASE
    }

    fn io_size(&self) -> u16 {
        IO_SIZE
    }

    fn iv_base(&self) -> u8 {
        self.iv_base
    }

    fn iv_count(&self) -> u8 {
        IV_COUNT
    }

    fn read_io(&mut self, offset: u16) -> u8 {
        match offset {
            0x00 => self.ctrl,                                // CTRL
            0x01 => self.status,                              // STATUS
            0x02 => self.xoscctrl,                            // XOSCCTRL
            0x03 => self.xoscfail,                            // XOSCFAIL
            0x04 => self.rc32kcal,                            // RC32KCAL
            0x05 => ((self.pllsrc as u8) << 6) | self.pllfac, // PLLCTRL
            0x06 => self.dfllctrl,                            // DFLLCTRL
            _ => {
                warn!(target: "osc", "I/O read OSC + 0x{offset:02X}: reserved address");
                0
            }
        }
    }

    fn write_io(&mut self, offset: u16, v: u8, bus: &mut BusCtx) {
        match offset {
            0x00 => {
                // CTRL: sources are ready as soon as they are enabled,
                // except XOSC which is never reported ready.
                self.ctrl = v & 0x1F;
                self.status = self.ctrl & !0x08;
            }
            0x02 => {
                self.xoscctrl = v & 0xEF;
            }
            0x03 => {
                // XOSCFDEN is sticky and CCP-protected.
                let vfden = v & 0x01 != 0;
                let fden = self.xoscfail & 0x01 != 0;
                if !fden && vfden {
                    if bus.ccp_state() & CCP_IOREG != 0 {
                        self.xoscfail |= 0x01;
                    } else {
                        error!(target: "osc", "cannot set XOSCFAIL.XOSCFDEN: protected by CCP");
                    }
                } else if fden && !vfden {
                    error!(target: "osc", "XOSCFAIL.XOSCFDEN cannot be cleared");
                }
                // XOSCFDIF is cleared by writing one.
                if v & 0x02 != 0 {
                    self.xoscfail &= !0x02;
                }
            }
            0x04 => {
                self.rc32kcal = v;
            }
            0x05 => {
                // PLLCTRL
                match v >> 6 {
                    0 => self.pllsrc = Pllsrc::Rc2M,
                    2 => self.pllsrc = Pllsrc::Rc32M,
                    3 => self.pllsrc = Pllsrc::Xosc,
                    _ => error!(target: "osc", "invalid PLLSRC value"),
                }
                self.pllfac = v & 0x1F;
            }
            0x06 => {
                self.dfllctrl = v & 0x03;
            }
            _ => {
                error!(target: "osc", "I/O write OSC + 0x{offset:02X}: not writable");
            }
        }
    }

    fn reset(&mut self) {
        self.ctrl = 0x01;
        self.status = 0x01;
        self.xoscctrl = 0;
        self.xoscfail = 0;
        self.rc32kcal = 0x55;
        self.pllsrc = Pllsrc::Rc2M;
        self.pllfac = 0;
        self.dfllctrl = 0;
    }

    fn execute_iv(&mut self, iv: u8) {
        if iv == IV_OSCF {
            self.xoscfail &= !0x02;
        }
    }
}
