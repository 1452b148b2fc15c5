//! Clock system block (CLK).
//!
//! Models system clock source selection, the A/B/C prescaler cascade and
//! the configuration lock. Committing CTRL or PSCTRL recomputes the
//! derived divisors and f_sys, then asks the device to re-align the event
//! queue.
//!
//! Divisor derivation: `clkPer4 = A`, `clkPer2 = A·B`,
//! `clkPer = clkCPU = A·B·C`.

use tracing::{error, info, warn};

use crate::block::{Block, BusCtx};
use crate::CCP_IOREG;

const IO_BASE: u16 = 0x0040;
const IO_SIZE: u16 = 8;

/// System clock sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sclksel {
    Rc2M = 0,
    Rc32M = 1,
    Rc32K = 2,
    Xosc = 3,
    Pll = 4,
}

/// RTC clock sources (the RTC itself is not modeled).
const RTCSRC_VALID: [u8; 4] = [0, 1, 2, 5];

pub struct Clk {
    sclk: Sclksel,
    /// PSCTRL backing byte: PSBCDIV in bits 0..2, PSADIV in bits 2..7.
    psctrl: u8,
    locked: bool,
    rtc_enabled: bool,
    rtcsrc: u8,
    // Derived values, kept in sync with the register bytes.
    pub(crate) prescaler_a: u64,
    pub(crate) prescaler_b: u64,
    pub(crate) prescaler_c: u64,
    pub(crate) f_sys: u32,
}

impl Clk {
    pub fn new() -> Self {
        Clk {
            sclk: Sclksel::Rc2M,
            psctrl: 0,
            locked: false,
            rtc_enabled: false,
            rtcsrc: 0,
            prescaler_a: 1,
            prescaler_b: 1,
            prescaler_c: 1,
            f_sys: 2_000_000,
        }
    }

    fn psadiv(&self) -> u8 {
        (self.psctrl >> 2) & 0x1F
    }

    fn psbcdiv(&self) -> u8 {
        self.psctrl & 0x3
    }

    /// Recompute f_sys and the prescaler divisors from the register bytes.
    fn update_frequencies(&mut self, pll_hz: u32) {
        self.f_sys = match self.sclk {
            Sclksel::Rc2M => 2_000_000,
            Sclksel::Rc32M => 32_000_000,
            Sclksel::Rc32K => 32_768,
            Sclksel::Pll => {
                if pll_hz > 200_000_000 {
                    error!(target: "clk", "PLL frequency is too high");
                } else if pll_hz < 10_000_000 {
                    error!(target: "clk", "PLL frequency is too low");
                }
                pll_hz
            }
            // Rejected before commit.
            Sclksel::Xosc => self.f_sys,
        };

        self.prescaler_a = 1 << self.psadiv();
        self.prescaler_b = match self.psbcdiv() {
            2 => 4,
            3 => 2,
            _ => 1,
        };
        self.prescaler_c = if self.psbcdiv() & 1 != 0 { 2 } else { 1 };
    }
}

impl Default for Clk {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for Clk {
    fn name(&self) -> &'static str {
        "CLK"
    }

    fn io_base(&self) -> u16 {
        IO_BASE
    }

    fn io_size(&self) -> u16 {
        IO_SIZE
    }

    fn read_io(&mut self, offset: u16) -> u8 {
        match offset {
            0x00 => self.sclk as u8,                              // CTRL
            0x01 => self.psctrl,                                  // PSCTRL
            0x02 => self.locked as u8,                            // LOCK
            0x03 => (self.rtc_enabled as u8) | (self.rtcsrc << 1), // RTCCTRL
            _ => {
                warn!(target: "clk", "I/O read CLK + 0x{offset:02X}: reserved address");
                0
            }
        }
    }

    fn write_io(&mut self, offset: u16, v: u8, bus: &mut BusCtx) {
        match offset {
            0x00 if !self.locked => {
                // CTRL
                let vsclk = match v & 0x7 {
                    0 => Some(Sclksel::Rc2M),
                    1 => Some(Sclksel::Rc32M),
                    2 => Some(Sclksel::Rc32K),
                    3 => Some(Sclksel::Xosc),
                    4 => Some(Sclksel::Pll),
                    _ => None,
                };
                match vsclk {
                    None => error!(target: "clk", "invalid SCLKSEL value"),
                    Some(Sclksel::Xosc) if bus.ccp_state() & CCP_IOREG != 0 => {
                        warn!(target: "clk", "XOSC clock source not supported");
                    }
                    Some(sel) if bus.ccp_state() & CCP_IOREG != 0 => {
                        self.sclk = sel;
                        self.update_frequencies(bus.pll_hz());
                        bus.notify_clock_config_change();
                    }
                    Some(_) => {
                        error!(target: "clk", "cannot set CLK.CTRL: protected by CCP");
                    }
                }
            }
            0x01 if !self.locked => {
                // PSCTRL
                let vreg = v & 0x7F;
                let psadiv = (vreg >> 2) & 0x1F;
                if psadiv > 9 {
                    error!(target: "clk", "invalid PSADIV value");
                } else {
                    self.psctrl = vreg;
                    self.update_frequencies(bus.pll_hz());
                    bus.notify_clock_config_change();
                }
            }
            0x02 => {
                // LOCK
                if !self.locked && v != 0 {
                    if bus.ccp_state() & CCP_IOREG != 0 {
                        info!(target: "clk", "locked CLK.CTRL and CLK.PSCTRL");
                        self.locked = true;
                    } else {
                        error!(target: "clk", "cannot set CLK.LOCK: protected by CCP");
                    }
                } else if self.locked && v == 0 {
                    error!(target: "clk", "CLK.LOCK cannot be cleared");
                }
            }
            0x03 => {
                // RTCCTRL
                self.rtc_enabled = v & 1 != 0;
                let vsrc = (v >> 1) & 0x7;
                if RTCSRC_VALID.contains(&vsrc) {
                    self.rtcsrc = vsrc;
                } else {
                    error!(target: "clk", "invalid RTCSRC value");
                }
            }
            _ => {
                error!(target: "clk", "I/O write CLK + 0x{offset:02X}: not writable");
            }
        }
    }

    fn reset(&mut self) {
        self.sclk = Sclksel::Rc2M;
        self.psctrl = 0;
        self.locked = false;
        self.rtc_enabled = false;
        self.rtcsrc = 0;
        self.update_frequencies(0);
    }
}
