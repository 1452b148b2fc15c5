//! 16-bit Timer/Counter block (TC).
//!
//! The counter is driven by a scheduled event on the PER clock whose
//! period is the selected prescaler. Supports normal, frequency and
//! single/dual-slope waveform modes, overflow and compare-match
//! interrupts on channels A..D (A..B on type-1 instances), and the
//! double-buffered PER/CCx registers flushed on UPDATE conditions.
//!
//! 16-bit registers are accessed through the shared TEMP byte, low byte
//! first, as on hardware.

use tracing::{error, warn};

use crate::block::{Block, BusCtx};
use crate::clock::{ClockType, EventTag};
use crate::IntLvl;

const IO_SIZE: u16 = 0x40;

// Interrupt vectors, relative to the block's IV base.
const IV_OVF: u8 = 0;
const IV_ERR: u8 = 1;
const IV_CCA: u8 = 2;
const IV_CCB: u8 = 3;
const IV_CCC: u8 = 4;
const IV_CCD: u8 = 5;

// INTFLAGS bits
const IF_OVF: u8 = 0x01;
const IF_ERR: u8 = 0x02;
const IF_CCA: u8 = 0x04;
const IF_CCB: u8 = 0x08;
const IF_CCC: u8 = 0x10;
const IF_CCD: u8 = 0x20;

// Waveform generation modes (CTRLB[2:0])
const WGMODE_FRQ: u8 = 1;
const WGMODE_DSTOP: u8 = 5;
const WGMODE_DSBOTTOM: u8 = 7;

/// Events run just ahead of the CPU step so flags raised on a tick are
/// serviceable on the same tick.
const EVENT_PRIORITY: u8 = 50;

/// Static description of a TC instance: where it sits in the I/O space
/// and the interrupt vector table.
#[derive(Debug, Clone, Copy)]
pub struct TcInstance {
    pub name: &'static str,
    pub io_base: u16,
    pub iv_base: u8,
    /// Scheduler identity (`EventTag::Tc(index)`).
    pub index: u8,
}

/// Timer/Counter C0 of the ATxmega128A1 vector table.
pub const TCC0: TcInstance = TcInstance { name: "TCC0", io_base: 0x0800, iv_base: 14, index: 0 };

pub struct Tc {
    instance: TcInstance,
    /// 0 (TCx0, four compare channels) or 1 (TCx1, two channels).
    tc_type: u8,
    /// Clock source prescaler; 0 means the TC is OFF.
    prescaler: u64,
    event_scheduled: bool,
    ctrlb: u8,
    ctrlc: u8,
    ovf_intlvl: IntLvl,
    err_intlvl: IntLvl,
    cca_intlvl: IntLvl,
    ccb_intlvl: IntLvl,
    ccc_intlvl: IntLvl,
    ccd_intlvl: IntLvl,
    /// CTRLF: bit 0 DIR (1 = down), bit 1 LUPD.
    ctrlf: u8,
    /// CTRLG: buffer-valid bits (PERBV, CCABV..CCDBV).
    ctrlg: u8,
    intflags: u8,
    temp: u8,
    cnt: u16,
    per: u16,
    cca: u16,
    ccb: u16,
    ccc: u16,
    ccd: u16,
    perbuf: u16,
    ccabuf: u16,
    ccbbuf: u16,
    cccbuf: u16,
    ccdbuf: u16,
}

impl Tc {
    pub fn new(instance: TcInstance) -> Self {
        let tc_type = match instance.name.as_bytes().last().copied() {
            Some(b'0') => 0,
            _ => 1,
        };
        Tc {
            instance,
            tc_type,
            prescaler: 0,
            event_scheduled: false,
            ctrlb: 0,
            ctrlc: 0,
            ovf_intlvl: IntLvl::None,
            err_intlvl: IntLvl::None,
            cca_intlvl: IntLvl::None,
            ccb_intlvl: IntLvl::None,
            ccc_intlvl: IntLvl::None,
            ccd_intlvl: IntLvl::None,
            ctrlf: 0,
            ctrlg: 0,
            intflags: 0,
            temp: 0,
            cnt: 0,
            per: 0,
            cca: 0,
            ccb: 0,
            ccc: 0,
            ccd: 0,
            perbuf: 0,
            ccabuf: 0,
            ccbbuf: 0,
            cccbuf: 0,
            ccdbuf: 0,
        }
    }

    fn tag(&self) -> EventTag {
        EventTag::Tc(self.instance.index)
    }

    fn wgmode(&self) -> u8 {
        self.ctrlb & 0x7
    }

    fn dir_down(&self) -> bool {
        self.ctrlf & 0x1 != 0
    }

    /// True when the clock source is OFF.
    pub fn off(&self) -> bool {
        self.prescaler == 0
    }

    pub fn cnt(&self) -> u16 {
        self.cnt
    }

    fn raise(&mut self, bus: &mut BusCtx, flag: u8, iv: u8, lvl: IntLvl) {
        self.intflags |= flag;
        bus.set_iv_lvl(self.instance.iv_base + iv, lvl);
    }

    /// Flush double-buffered values on an UPDATE condition.
    fn process_update(&mut self) {
        if self.ctrlg & 0x01 != 0 {
            self.per = self.perbuf;
        }
        if self.ctrlg & 0x02 != 0 {
            self.cca = self.ccabuf;
        }
        if self.ctrlg & 0x04 != 0 {
            self.ccb = self.ccbbuf;
        }
        if self.ctrlg & 0x08 != 0 {
            self.ccc = self.cccbuf;
        }
        if self.ctrlg & 0x10 != 0 {
            self.ccd = self.ccdbuf;
        }
        self.ctrlg = 0;
    }

    fn update_command(&mut self) {
        // UPDATE is ignored while the lock-update bit is set.
        if self.ctrlf & 0x02 == 0 {
            self.process_update();
        }
    }

    fn restart_command(&mut self) {
        self.ctrlf &= !0x01;
        self.ctrlc = 0;
    }

    fn reset_command(&mut self) {
        if !self.off() {
            warn!(target: "tc", "RESET command triggered but TC is not OFF");
            return;
        }
        self.reset();
    }

    /// One counter tick; returns the ticks until the next one (0 stops
    /// the event when the clock source was switched off meanwhile).
    pub fn on_tick(&mut self, bus: &mut BusCtx) -> u64 {
        if self.off() {
            self.event_scheduled = false;
            return 0;
        }
        let wgmode = self.wgmode();
        let dual_slope = wgmode >= WGMODE_DSTOP;
        let top = if wgmode == WGMODE_FRQ { self.cca } else { self.per };
        let mut trigger_ovf = false;

        if self.dir_down() {
            if self.cnt == 0 {
                self.cnt = top;
            }
            self.cnt = self.cnt.wrapping_sub(1);
            if self.cnt == 0 {
                // BOTTOM reached
                trigger_ovf = wgmode != WGMODE_DSTOP;
                self.process_update();
                if dual_slope {
                    self.ctrlf &= !0x01;
                }
            }
        } else {
            if self.cnt == top {
                self.cnt = 0;
            }
            self.cnt = self.cnt.wrapping_add(1);
            if self.cnt == top {
                // TOP reached
                trigger_ovf = wgmode != WGMODE_DSBOTTOM;
                self.process_update();
                if dual_slope {
                    self.ctrlf |= 0x01;
                }
            }
        }

        if trigger_ovf {
            let lvl = self.ovf_intlvl;
            self.raise(bus, IF_OVF, IV_OVF, lvl);
        }
        if self.cnt == self.cca {
            let lvl = self.cca_intlvl;
            self.raise(bus, IF_CCA, IV_CCA, lvl);
        }
        if self.cnt == self.ccb {
            let lvl = self.ccb_intlvl;
            self.raise(bus, IF_CCB, IV_CCB, lvl);
        }
        if self.tc_type == 0 {
            if self.cnt == self.ccc {
                let lvl = self.ccc_intlvl;
                self.raise(bus, IF_CCC, IV_CCC, lvl);
            }
            if self.cnt == self.ccd {
                let lvl = self.ccd_intlvl;
                self.raise(bus, IF_CCD, IV_CCD, lvl);
            }
        }

        self.prescaler
    }
}

impl Block for Tc {
    fn name(&self) -> &'static str {
        self.instance.name
    }

    fn io_base(&self) -> u16 {
        self.instance.io_base
    }

    fn io_size(&self) -> u16 {
        IO_SIZE
    }

    fn iv_base(&self) -> u8 {
        self.instance.iv_base
    }

    fn iv_count(&self) -> u8 {
        if self.tc_type == 0 {
            6
        } else {
            4
        }
    }

    fn read_io(&mut self, offset: u16) -> u8 {
        match offset {
            0x00 => match self.prescaler {
                // CTRLA: map the prescaler back to CLKSEL
                0 => 0,
                1 => 1,
                2 => 2,
                4 => 3,
                8 => 4,
                64 => 5,
                256 => 6,
                _ => 7,
            },
            0x01 => self.ctrlb,
            0x02 => self.ctrlc,
            0x03 => 0, // CTRLD
            0x04 => 0, // CTRLE
            0x06 => (self.err_intlvl.to_field() << 2) | self.ovf_intlvl.to_field(),
            0x07 => {
                (self.ccd_intlvl.to_field() << 6)
                    | (self.ccc_intlvl.to_field() << 4)
                    | (self.ccb_intlvl.to_field() << 2)
                    | self.cca_intlvl.to_field()
            }
            0x08 | 0x09 => self.ctrlf,
            0x0A | 0x0B => self.ctrlg,
            0x0C => self.intflags,
            0x0F => self.temp,
            0x20 => {
                self.temp = (self.cnt >> 8) as u8;
                (self.cnt & 0xFF) as u8
            }
            0x21 => self.temp,
            0x26 => {
                self.temp = (self.per >> 8) as u8;
                (self.per & 0xFF) as u8
            }
            0x27 => self.temp,
            0x28 => {
                self.temp = (self.cca >> 8) as u8;
                (self.cca & 0xFF) as u8
            }
            0x29 => self.temp,
            0x2A => {
                self.temp = (self.ccb >> 8) as u8;
                (self.ccb & 0xFF) as u8
            }
            0x2B => self.temp,
            0x2C => {
                self.temp = (self.ccc >> 8) as u8;
                (self.ccc & 0xFF) as u8
            }
            0x2D => self.temp,
            0x2E => {
                self.temp = (self.ccd >> 8) as u8;
                (self.ccd & 0xFF) as u8
            }
            0x2F => self.temp,
            0x36 => {
                self.temp = (self.perbuf >> 8) as u8;
                (self.perbuf & 0xFF) as u8
            }
            0x37 => self.temp,
            0x38 => {
                self.temp = (self.ccabuf >> 8) as u8;
                (self.ccabuf & 0xFF) as u8
            }
            0x39 => self.temp,
            0x3A => {
                self.temp = (self.ccbbuf >> 8) as u8;
                (self.ccbbuf & 0xFF) as u8
            }
            0x3B => self.temp,
            0x3C => {
                self.temp = (self.cccbuf >> 8) as u8;
                (self.cccbuf & 0xFF) as u8
            }
            0x3D => self.temp,
            0x3E => {
                self.temp = (self.ccdbuf >> 8) as u8;
                (self.ccdbuf & 0xFF) as u8
            }
            0x3F => self.temp,
            _ => {
                warn!(target: "tc", "I/O read {} + 0x{offset:02X}: reserved address", self.name());
                0
            }
        }
    }

    fn write_io(&mut self, offset: u16, v: u8, bus: &mut BusCtx) {
        match offset {
            0x00 => {
                // CTRLA
                if v & 0x08 != 0 {
                    warn!(target: "tc", "event channel source not supported");
                    return;
                }
                const PRESCALERS: [u64; 8] = [0, 1, 2, 4, 8, 64, 256, 1024];
                self.prescaler = PRESCALERS[(v & 0x7) as usize];
                if self.prescaler == 0 {
                    if self.event_scheduled {
                        bus.unschedule(self.tag());
                        self.event_scheduled = false;
                    }
                } else {
                    if self.event_scheduled {
                        bus.unschedule(self.tag());
                    }
                    bus.schedule(self.tag(), ClockType::Per, self.prescaler, EVENT_PRIORITY);
                    self.event_scheduled = true;
                }
            }
            0x01 => {
                // CTRLB
                let mut v = v;
                if v & 0xF0 != 0 {
                    warn!(target: "tc", "CCxEN bits not supported");
                    v &= 0x0F;
                }
                self.ctrlb = v & 0x07;
                if self.wgmode() == 2 || self.wgmode() == 4 {
                    error!(target: "tc", "invalid WGMODE value");
                    self.ctrlb &= !0x07;
                }
            }
            0x02 => {
                self.ctrlc = v & 0x0F;
            }
            0x03 => {
                // CTRLD
                if v != 0 {
                    warn!(target: "tc", "event actions not supported");
                }
            }
            0x04 => {
                // CTRLE
                match v & 0x03 {
                    0 => {}
                    1 => warn!(target: "tc", "BYTEMODE not supported"),
                    2 => warn!(target: "tc", "SPLITMODE not supported"),
                    _ => error!(target: "tc", "invalid BYTEM value"),
                }
            }
            0x06 => {
                // INTCTRLA
                self.ovf_intlvl = IntLvl::from_field(v);
                self.err_intlvl = IntLvl::from_field(v >> 2);
                // Reflect level changes onto already-raised flags.
                if self.intflags & IF_OVF != 0 {
                    bus.set_iv_lvl(self.instance.iv_base + IV_OVF, self.ovf_intlvl);
                }
                if self.intflags & IF_ERR != 0 {
                    bus.set_iv_lvl(self.instance.iv_base + IV_ERR, self.err_intlvl);
                }
            }
            0x07 => {
                // INTCTRLB
                self.cca_intlvl = IntLvl::from_field(v);
                self.ccb_intlvl = IntLvl::from_field(v >> 2);
                if self.tc_type == 0 {
                    self.ccc_intlvl = IntLvl::from_field(v >> 4);
                    self.ccd_intlvl = IntLvl::from_field(v >> 6);
                }
                if self.intflags & IF_CCA != 0 {
                    bus.set_iv_lvl(self.instance.iv_base + IV_CCA, self.cca_intlvl);
                }
                if self.intflags & IF_CCB != 0 {
                    bus.set_iv_lvl(self.instance.iv_base + IV_CCB, self.ccb_intlvl);
                }
                if self.tc_type == 0 {
                    if self.intflags & IF_CCC != 0 {
                        bus.set_iv_lvl(self.instance.iv_base + IV_CCC, self.ccc_intlvl);
                    }
                    if self.intflags & IF_CCD != 0 {
                        bus.set_iv_lvl(self.instance.iv_base + IV_CCD, self.ccd_intlvl);
                    }
                }
            }
            0x08 => {
                // CTRLFCLR
                self.ctrlf &= !(v & 0x03);
            }
            0x09 => {
                // CTRLFSET
                self.ctrlf |= v & 0x03;
                match (v >> 2) & 0x3 {
                    1 => self.update_command(),
                    2 => self.restart_command(),
                    3 => self.reset_command(),
                    _ => {}
                }
            }
            0x0A => {
                self.ctrlg &= !(v & 0x1F);
            }
            0x0B => {
                self.ctrlg |= v & 0x1F;
            }
            0x0C => {
                // INTFLAGS: write one to clear
                self.intflags &= !v;
            }
            0x0F => {
                self.temp = v;
            }
            0x20 => self.temp = v,
            0x21 => self.cnt = self.temp as u16 | ((v as u16) << 8),
            0x26 => self.temp = v,
            0x27 => self.per = self.temp as u16 | ((v as u16) << 8),
            0x28 => self.temp = v,
            0x29 => self.cca = self.temp as u16 | ((v as u16) << 8),
            0x2A => self.temp = v,
            0x2B => self.ccb = self.temp as u16 | ((v as u16) << 8),
            0x2C => self.temp = v,
            0x2D => self.ccc = self.temp as u16 | ((v as u16) << 8),
            0x2E => self.temp = v,
            0x2F => self.ccd = self.temp as u16 | ((v as u16) << 8),
            0x36 => self.temp = v,
            0x37 => {
                self.perbuf = self.temp as u16 | ((v as u16) << 8);
                self.ctrlg |= 0x01;
            }
            0x38 => self.temp = v,
            0x39 => {
                self.ccabuf = self.temp as u16 | ((v as u16) << 8);
                self.ctrlg |= 0x02;
            }
            0x3A => self.temp = v,
            0x3B => {
                self.ccbbuf = self.temp as u16 | ((v as u16) << 8);
                self.ctrlg |= 0x04;
            }
            0x3C => self.temp = v,
            0x3D => {
                self.cccbuf = self.temp as u16 | ((v as u16) << 8);
                self.ctrlg |= 0x08;
            }
            0x3E => self.temp = v,
            0x3F => {
                self.ccdbuf = self.temp as u16 | ((v as u16) << 8);
                self.ctrlg |= 0x10;
            }
            _ => {
                error!(target: "tc", "I/O write {} + 0x{offset:02X}: not writable", self.name());
            }
        }
    }

    fn reset(&mut self) {
        self.prescaler = 0;
        self.event_scheduled = false;
        self.ctrlb = 0;
        self.ctrlc = 0;
        self.ovf_intlvl = IntLvl::None;
        self.err_intlvl = IntLvl::None;
        self.cca_intlvl = IntLvl::None;
        self.ccb_intlvl = IntLvl::None;
        self.ccc_intlvl = IntLvl::None;
        self.ccd_intlvl = IntLvl::None;
        self.ctrlf = 0;
        self.ctrlg = 0;
        self.intflags = 0;
        self.temp = 0;
        self.cnt = 0;
        self.per = 0;
        self.cca = 0;
        self.ccb = 0;
        self.ccc = 0;
        self.ccd = 0;
        self.perbuf = 0;
        self.ccabuf = 0;
        self.ccbbuf = 0;
        self.cccbuf = 0;
        self.ccdbuf = 0;
    }

    fn execute_iv(&mut self, iv: u8) {
        match iv {
            IV_OVF => self.intflags &= !IF_OVF,
            IV_ERR => self.intflags &= !IF_ERR,
            IV_CCA => self.intflags &= !IF_CCA,
            IV_CCB => self.intflags &= !IF_CCB,
            IV_CCC => self.intflags &= !IF_CCC,
            IV_CCD => self.intflags &= !IF_CCD,
            _ => {}
        }
    }
}
