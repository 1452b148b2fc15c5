//! The peripheral block contract and the bus effect collector.
//!
//! Blocks never hold a reference back to the device. During an I/O write
//! they observe the little device state they are allowed to see (CCP
//! window, PLL frequency) through [`BusCtx`] and record their outward
//! effects — interrupt level changes, scheduler operations, a clock
//! reconfiguration — which the device applies once the dispatch returns.
//! This keeps ownership a strict tree and guarantees the scheduler queue
//! is never touched while an event callback is running.

use crate::clock::{ClockType, EventTag};
use crate::IntLvl;

/// Uniform contract every peripheral satisfies.
///
/// A block owns a contiguous I/O window `[io_base, io_base + io_size)`
/// and, optionally, a contiguous interrupt-vector window
/// `[iv_base, iv_base + iv_count)`. Windows of distinct blocks must not
/// overlap; the device checks this at wiring time.
pub trait Block {
    fn name(&self) -> &'static str;
    fn io_base(&self) -> u16;
    fn io_size(&self) -> u16;
    fn iv_base(&self) -> u8 {
        0
    }
    fn iv_count(&self) -> u8 {
        0
    }

    /// Read a byte within the block's I/O window.
    ///
    /// Unknown offsets log a warning and read as zero.
    fn read_io(&mut self, offset: u16) -> u8;

    /// Write a byte within the block's I/O window.
    ///
    /// Unknown or read-only offsets log an error and are dropped.
    fn write_io(&mut self, offset: u16, value: u8, bus: &mut BusCtx);

    /// Restore architectural defaults.
    fn reset(&mut self);

    /// Called when an IV owned by this block is acknowledged; the block
    /// typically clears the matching interrupt flag.
    fn execute_iv(&mut self, _iv: u8) {}
}

/// A scheduler operation requested by a block during an I/O write.
#[derive(Debug, Clone, Copy)]
pub enum SchedOp {
    Schedule { tag: EventTag, clock: ClockType, ticks: u64, priority: u8 },
    Unschedule { tag: EventTag },
}

/// Narrow device capability handed to blocks for the duration of one
/// I/O write or one scheduled-event callback.
pub struct BusCtx {
    ccp: u8,
    pll_hz: u32,
    pub(crate) iv_ops: Vec<(u8, IntLvl)>,
    pub(crate) sched_ops: Vec<SchedOp>,
    pub(crate) clock_config_changed: bool,
}

impl BusCtx {
    pub(crate) fn new(ccp: u8, pll_hz: u32) -> Self {
        BusCtx {
            ccp,
            pll_hz,
            iv_ops: Vec::new(),
            sched_ops: Vec::new(),
            clock_config_changed: false,
        }
    }

    /// Current CCP state (see [`crate::CCP_IOREG`], [`crate::CCP_SPM`]).
    pub fn ccp_state(&self) -> u8 {
        self.ccp
    }

    /// Frequency the PLL would currently produce, in Hz.
    pub fn pll_hz(&self) -> u32 {
        self.pll_hz
    }

    /// Set, update or clear a pending interrupt (IV number is global).
    pub fn set_iv_lvl(&mut self, iv: u8, lvl: IntLvl) {
        self.iv_ops.push((iv, lvl));
    }

    /// Schedule a repeating event `ticks` domain ticks out.
    pub fn schedule(&mut self, tag: EventTag, clock: ClockType, ticks: u64, priority: u8) {
        self.sched_ops.push(SchedOp::Schedule { tag, clock, ticks, priority });
    }

    /// Remove a previously scheduled event by identity.
    pub fn unschedule(&mut self, tag: EventTag) {
        self.sched_ops.push(SchedOp::Unschedule { tag });
    }

    /// Tell the device the prescaler tree changed so the event queue can
    /// be re-aligned.
    pub fn notify_clock_config_change(&mut self) {
        self.clock_config_changed = true;
    }
}
