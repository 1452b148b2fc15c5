//! Device composition: flash, SRAM, register file, blocks, scheduler.
//!
//! The device owns every piece of mutable state and is the only place
//! where they meet: the memory dispatcher fans data-space accesses out to
//! I/O blocks, SRAM and the emulator window; the interrupt engine keeps
//! the four pending-vector queues and acknowledges into the PMIC; the
//! step loop drains the clock event queue.

use std::collections::BTreeSet;

use tracing::{debug, error, info, trace, warn};

use crate::block::{Block, BusCtx, SchedOp};
use crate::blocks::{Clk, Cpu, Gpior, Osc, Pmic, Tc, TCC0};
use crate::clock::{ClockType, EventTag, Scheduler};
use crate::error::{ConfigError, RuntimeError};
use crate::executor;
use crate::memory::{Flash, RegFile};
use crate::model::ModelConf;
use crate::{
    IntLvl, IV_MAX_COUNT, MEM_EEPROM_START, MEM_EMULATOR_SIZE, MEM_EMULATOR_START, MEM_IO_SIZE,
    MEM_MAX_SIZE, MEM_SRAM_START,
};

/// Identifies a wired block in the dispatch tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockId {
    Cpu,
    Clk,
    Osc,
    Pmic,
    Gpior,
    Tc0,
}

/// Pending interrupt vectors, one ordered queue per level.
///
/// The sets are sorted so the first element is the vector with the
/// highest hardware priority within its level.
#[derive(Default)]
struct IvPending {
    lo: BTreeSet<u8>,
    med: BTreeSet<u8>,
    hi: BTreeSet<u8>,
    nmi: BTreeSet<u8>,
}

impl IvPending {
    fn clear(&mut self) {
        self.lo.clear();
        self.med.clear();
        self.hi.clear();
        self.nmi.clear();
    }
}

/// An AVR XMEGA device.
pub struct Device {
    model: ModelConf,

    // Derived memory map values
    flash_boot_start_word: u32,
    exsram_start: u32,
    exsram_size: u32,

    pub(crate) flash: Flash,
    pub(crate) regfile: RegFile,
    sram: Vec<u8>,

    io_map: Box<[Option<BlockId>]>,
    iv_map: [Option<BlockId>; IV_MAX_COUNT],

    iv_pending: IvPending,

    scheduler: Scheduler,
    clk_sys_tick: u64,

    /// Instruction extra cycles not consumed yet.
    instruction_cycles: u32,
    /// Forces one instruction to execute between two interrupt services.
    interrupt_wait_instruction: bool,
    /// Set by BREAK, cleared at the start of each CPU step.
    breaked: bool,

    pub(crate) cpu: Cpu,
    pub(crate) clk: Clk,
    osc: Osc,
    pmic: Pmic,
    gpior: Gpior,
    tc0: Tc,
}

/// Priority of the CPU instruction-step event.
const CPU_STEP_PRIORITY: u8 = 100;

impl Device {
    /// Build a device for the given model and wire the core blocks.
    ///
    /// The device comes out of `new` already reset; call [`Self::reset`]
    /// again after loading flash if a clean restart is wanted.
    pub fn new(model: ModelConf) -> Result<Device, ConfigError> {
        model.validate()?;

        let exsram_start = MEM_SRAM_START + model.sram_size;
        let exsram_size = if model.has_exsram { MEM_MAX_SIZE - exsram_start } else { 0 };
        let ramp_mask = (((exsram_start + exsram_size) >> 8) & 0xFF) as u8;
        let eind_mask = ((model.flash_size >> 9) & 0xFF) as u8;
        let sp_reset = (exsram_start - 1) as u16;

        let mut dev = Device {
            flash_boot_start_word: (model.flash_size - model.flash_boot_size) / 2,
            exsram_start,
            exsram_size,
            flash: Flash::new(model.flash_size),
            regfile: RegFile::new(),
            sram: vec![0; model.sram_size as usize],
            io_map: vec![None; MEM_IO_SIZE as usize].into_boxed_slice(),
            iv_map: [None; IV_MAX_COUNT],
            iv_pending: IvPending::default(),
            scheduler: Scheduler::new(),
            clk_sys_tick: 0,
            instruction_cycles: 0,
            interrupt_wait_instruction: true,
            breaked: false,
            cpu: Cpu::new(ramp_mask, eind_mask, sp_reset),
            clk: Clk::new(),
            osc: Osc::new(1),
            pmic: Pmic::new(),
            gpior: Gpior::new(),
            tc0: Tc::new(TCC0),
            model,
        };

        dev.connect(BlockId::Cpu)?;
        dev.connect(BlockId::Clk)?;
        dev.connect(BlockId::Osc)?;
        dev.connect(BlockId::Pmic)?;
        dev.connect(BlockId::Gpior)?;
        dev.connect(BlockId::Tc0)?;

        dev.reset();
        Ok(dev)
    }

    /// Register a block in the I/O and IV dispatch tables.
    fn connect(&mut self, id: BlockId) -> Result<(), ConfigError> {
        let block = self.block_ref(id);
        let name = block.name();
        let io_base = block.io_base();
        let io_size = block.io_size();
        let iv_base = block.iv_base();
        let iv_count = block.iv_count();
        info!(target: "device", "connecting block {name}");

        if (io_base as u32) + (io_size as u32) > MEM_IO_SIZE {
            return Err(ConfigError::Wiring { block: name, reason: "I/O memory out of range".into() });
        }
        for addr in io_base..io_base + io_size {
            if let Some(other) = self.io_map[addr as usize] {
                let other = self.block_ref(other).name();
                return Err(ConfigError::Wiring {
                    block: name,
                    reason: format!("I/O memory space overlaps with block {other}"),
                });
            }
            self.io_map[addr as usize] = Some(id);
        }

        if iv_count != 0 {
            if iv_base == 0 {
                return Err(ConfigError::Wiring {
                    block: name,
                    reason: "invalid interrupt vector number: 0".into(),
                });
            }
            if iv_base as usize + iv_count as usize > IV_MAX_COUNT {
                return Err(ConfigError::Wiring { block: name, reason: "IVs out of range".into() });
            }
            for iv in iv_base..iv_base + iv_count {
                if let Some(other) = self.iv_map[iv as usize] {
                    let other = self.block_ref(other).name();
                    return Err(ConfigError::Wiring {
                        block: name,
                        reason: format!("interrupt vectors overlap with block {other}"),
                    });
                }
                self.iv_map[iv as usize] = Some(id);
            }
        }
        Ok(())
    }

    fn block_ref(&self, id: BlockId) -> &dyn Block {
        match id {
            BlockId::Cpu => &self.cpu,
            BlockId::Clk => &self.clk,
            BlockId::Osc => &self.osc,
            BlockId::Pmic => &self.pmic,
            BlockId::Gpior => &self.gpior,
            BlockId::Tc0 => &self.tc0,
        }
    }

    fn block_mut(&mut self, id: BlockId) -> &mut dyn Block {
        match id {
            BlockId::Cpu => &mut self.cpu,
            BlockId::Clk => &mut self.clk,
            BlockId::Osc => &mut self.osc,
            BlockId::Pmic => &mut self.pmic,
            BlockId::Gpior => &mut self.gpior,
            BlockId::Tc0 => &mut self.tc0,
        }
    }

    /// Reset blocks and stepping state. Internal SRAM is not cleared.
    pub fn reset(&mut self) {
        self.instruction_cycles = 0;
        self.interrupt_wait_instruction = true;
        self.breaked = false;
        self.clk_sys_tick = 0;
        self.scheduler.clear();
        self.iv_pending.clear();

        // Reset CLK first so schedule() sees valid divisors.
        self.clk.reset();
        self.schedule(EventTag::CpuStep, ClockType::Cpu, 1, CPU_STEP_PRIORITY);

        self.cpu.reset();
        self.osc.reset();
        self.pmic.reset();
        self.gpior.reset();
        self.tc0.reset();

        self.regfile.fill(0);
    }

    // --- Stepping ---

    /// Advance the SYS clock to the next due tick and run every event
    /// scheduled for it.
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        self.clk_sys_tick = self
            .scheduler
            .head_tick()
            .expect("clock event queue is empty");

        while let Some(mut ev) = self.scheduler.pop_due(self.clk_sys_tick) {
            let next = self.dispatch_event(ev.tag)?;
            if next > 0 {
                // The callback may have reconfigured the prescalers; a
                // popped event is not in the queue during the rescale, so
                // refresh its scale here. It fired on an aligned tick, so
                // no rounding is involved.
                ev.scale = self.clock_scale(ev.clock);
                ev.tick += next * ev.scale;
                self.scheduler.requeue(ev);
            }
        }
        Ok(())
    }

    fn dispatch_event(&mut self, tag: EventTag) -> Result<u64, RuntimeError> {
        match tag {
            EventTag::CpuStep => self.step_cpu(),
            EventTag::Tc(0) => {
                let mut bus = self.bus_ctx();
                let next = self.tc0.on_tick(&mut bus);
                self.apply_bus(bus);
                Ok(next)
            }
            EventTag::Tc(n) => {
                error!(target: "device", "unknown scheduler event: TC{n}");
                Ok(0)
            }
        }
    }

    /// Execute one CPU clock cycle.
    ///
    /// Order matters: the CCP timers advance first, then a pending
    /// interrupt may be acknowledged, and only then does an instruction
    /// execute — gated so one instruction always runs between services.
    fn step_cpu(&mut self) -> Result<u64, RuntimeError> {
        self.breaked = false;
        self.cpu.ccp_tick();

        if self.instruction_cycles == 0
            && !self.interrupt_wait_instruction
            && self.cpu.sreg.i()
            && self.ccp_state() == 0
            && self.process_pending_interrupts()
        {
            self.instruction_cycles = 5;
            self.interrupt_wait_instruction = true;
        }

        while self.instruction_cycles == 0 {
            self.instruction_cycles = self.execute_next_instruction()?;
            self.interrupt_wait_instruction = false;
        }
        self.instruction_cycles -= 1;
        Ok(1)
    }

    /// Fetch and execute the instruction at PC.
    fn execute_next_instruction(&mut self) -> Result<u32, RuntimeError> {
        let pc = self.cpu.pc;
        if pc >= self.flash.word_count() {
            error!(target: "device", "invalid PC value (overflow): 0x{pc:05X}");
            return Err(RuntimeError::PcOutOfRange { pc });
        }
        let opcode = self.flash.word(pc);
        trace!(target: "asm", "PC:{:05X} SP:{:04X} OP:{:04X}", pc, self.cpu.sp, opcode);
        let handler = executor::opcode_table()[opcode as usize];
        Ok(handler(self, opcode))
    }

    // --- Interrupts ---

    /// Set, clear or update an interrupt.
    ///
    /// A vector lives in at most one pending queue: raising it at a new
    /// level moves it, `IntLvl::None` removes it entirely, and re-raising
    /// at the same level is a no-op.
    pub fn set_iv_lvl(&mut self, iv: u8, lvl: IntLvl) {
        if iv as usize >= IV_MAX_COUNT {
            error!(target: "device", "invalid IV number: {iv}");
            return;
        }
        let p = &mut self.iv_pending;
        match lvl {
            IntLvl::None => {
                let _ = p.lo.remove(&iv)
                    || p.med.remove(&iv)
                    || p.hi.remove(&iv)
                    || p.nmi.remove(&iv);
            }
            IntLvl::Lo => {
                if p.lo.insert(iv) {
                    let _ = p.med.remove(&iv) || p.hi.remove(&iv) || p.nmi.remove(&iv);
                }
            }
            IntLvl::Med => {
                if p.med.insert(iv) {
                    let _ = p.lo.remove(&iv) || p.hi.remove(&iv) || p.nmi.remove(&iv);
                }
            }
            IntLvl::Hi => {
                if p.hi.insert(iv) {
                    let _ = p.lo.remove(&iv) || p.med.remove(&iv) || p.nmi.remove(&iv);
                }
            }
            IntLvl::Nmi => {
                if p.nmi.insert(iv) {
                    let _ = p.lo.remove(&iv) || p.med.remove(&iv) || p.hi.remove(&iv);
                }
            }
        }
    }

    /// Level of the interrupt currently executing.
    pub fn current_int_lvl(&self) -> IntLvl {
        if self.pmic.status == 0 {
            return IntLvl::None; // common case
        }
        if self.pmic.nmiex() {
            IntLvl::Nmi
        } else if self.pmic.hilvlex() {
            IntLvl::Hi
        } else if self.pmic.medlvlex() {
            IntLvl::Med
        } else if self.pmic.lolvlex() {
            IntLvl::Lo
        } else {
            IntLvl::None
        }
    }

    /// Select, acknowledge and enter the next pending interrupt.
    ///
    /// Returns true if a vector was taken.
    fn process_pending_interrupts(&mut self) -> bool {
        let executing = self.current_int_lvl();
        let (lvl, queue) = if executing >= IntLvl::Nmi {
            return false;
        } else if !self.iv_pending.nmi.is_empty() {
            (IntLvl::Nmi, &mut self.iv_pending.nmi)
        } else if executing >= IntLvl::Hi {
            return false;
        } else if self.pmic.hilvlen() && !self.iv_pending.hi.is_empty() {
            (IntLvl::Hi, &mut self.iv_pending.hi)
        } else if executing >= IntLvl::Med {
            return false;
        } else if self.pmic.medlvlen() && !self.iv_pending.med.is_empty() {
            (IntLvl::Med, &mut self.iv_pending.med)
        } else if executing >= IntLvl::Lo {
            return false;
        } else if self.pmic.lolvlen() && !self.iv_pending.lo.is_empty() {
            (IntLvl::Lo, &mut self.iv_pending.lo)
        } else {
            return false;
        };

        let iv = *queue.iter().next().expect("pending queue is empty");
        queue.remove(&iv);
        self.pmic.set_executing(lvl);

        // Each IV is two words long; IVSEL relocates into the boot section.
        let mut iv_addr = 2 * iv as u32;
        if self.pmic.ivsel() {
            iv_addr += self.flash_boot_start_word;
        }

        // Let the owning block clear its interrupt flag.
        match self.iv_map[iv as usize] {
            Some(id) => {
                let base = self.block_ref(id).iv_base();
                self.block_mut(id).execute_iv(iv - base);
            }
            None => {
                error!(target: "device", "acknowledged IV {iv} has no owning block");
            }
        }

        let pc = self.cpu.pc;
        self.push_pc(pc);
        self.cpu.pc = iv_addr;
        debug!(target: "device", "acknowledge interrupt {iv}, level {lvl:?}, PC:{iv_addr:05X}");
        true
    }

    /// Leave the interrupt currently executing (RETI). Returns false and
    /// logs if no interrupt was active.
    pub(crate) fn leave_interrupt(&mut self) -> bool {
        let ok = self.pmic.clear_executing();
        if !ok {
            error!(target: "asm", "RETI but no active interruption");
        }
        ok
    }

    // --- Memory dispatch ---

    /// Read a data memory value.
    pub fn get_data_mem(&mut self, addr: u32) -> u8 {
        if addr < MEM_IO_SIZE {
            self.get_io_mem(addr as u16)
        } else if addr >= MEM_EEPROM_START && addr < MEM_EEPROM_START + self.model.eeprom_size {
            warn!(target: "device", "EEPROM read access not supported at 0x{addr:X}");
            0
        } else if addr >= MEM_SRAM_START && addr < MEM_SRAM_START + self.model.sram_size {
            self.sram[(addr - MEM_SRAM_START) as usize]
        } else if addr >= MEM_EMULATOR_START && addr < MEM_EMULATOR_START + MEM_EMULATOR_SIZE {
            self.get_emulator_mem(addr)
        } else if self.exsram_size != 0
            && addr >= self.exsram_start
            && addr < self.exsram_start + self.exsram_size
        {
            warn!(target: "device", "external SRAM read access not supported: 0x{addr:X}");
            0
        } else {
            error!(target: "device", "invalid data memory address to read: 0x{addr:X}");
            0
        }
    }

    /// Write a data memory value.
    pub fn set_data_mem(&mut self, addr: u32, v: u8) {
        if addr < MEM_IO_SIZE {
            self.set_io_mem(addr as u16, v);
        } else if addr >= MEM_EEPROM_START && addr < MEM_EEPROM_START + self.model.eeprom_size {
            warn!(target: "device", "EEPROM write access not supported at 0x{addr:X}");
        } else if addr >= MEM_SRAM_START && addr < MEM_SRAM_START + self.model.sram_size {
            self.sram[(addr - MEM_SRAM_START) as usize] = v;
        } else if addr >= MEM_EMULATOR_START && addr < MEM_EMULATOR_START + MEM_EMULATOR_SIZE {
            self.set_emulator_mem(addr, v);
        } else if self.exsram_size != 0
            && addr >= self.exsram_start
            && addr < self.exsram_start + self.exsram_size
        {
            warn!(target: "device", "external SRAM write access not supported at 0x{addr:X}");
        } else {
            error!(target: "device", "invalid data memory address to write: 0x{addr:X}");
        }
    }

    /// Read an I/O memory value.
    pub fn get_io_mem(&mut self, addr: u16) -> u8 {
        let id = match self.io_map.get(addr as usize).copied().flatten() {
            Some(id) => id,
            None => {
                error!(target: "device", "invalid I/O address to read: 0x{addr:X} (no block)");
                return 0;
            }
        };
        let base = self.block_ref(id).io_base();
        self.block_mut(id).read_io(addr - base)
    }

    /// Write an I/O memory value.
    pub fn set_io_mem(&mut self, addr: u16, v: u8) {
        let id = match self.io_map.get(addr as usize).copied().flatten() {
            Some(id) => id,
            None => {
                error!(target: "device", "invalid I/O address to write: 0x{addr:X} (no block)");
                return;
            }
        };
        let base = self.block_ref(id).io_base();
        let mut bus = self.bus_ctx();
        self.block_mut(id).write_io(addr - base, v, &mut bus);
        self.apply_bus(bus);
    }

    /// Read from the emulator-private window.
    pub fn get_emulator_mem(&self, addr: u32) -> u8 {
        let offset = addr - MEM_EMULATOR_START;
        match offset {
            // Little-endian SYS tick counter
            0x00..=0x03 => (self.clk_sys_tick >> (offset * 8)) as u8,
            _ => {
                warn!(target: "device", "emulator memory read 0x{addr:06X}: reserved address");
                0
            }
        }
    }

    /// Write to the emulator-private window (always rejected).
    pub fn set_emulator_mem(&mut self, addr: u32, _v: u8) {
        error!(target: "device", "emulator memory write 0x{addr:06X}: not writable");
    }

    // --- Bus effects ---

    fn bus_ctx(&self) -> BusCtx {
        BusCtx::new(self.cpu.ccp_state(), self.osc.pll_frequency())
    }

    fn apply_bus(&mut self, bus: BusCtx) {
        for (iv, lvl) in bus.iv_ops {
            self.set_iv_lvl(iv, lvl);
        }
        for op in bus.sched_ops {
            match op {
                SchedOp::Schedule { tag, clock, ticks, priority } => {
                    self.schedule(tag, clock, ticks, priority);
                }
                SchedOp::Unschedule { tag } => self.unschedule(tag),
            }
        }
        if bus.clock_config_changed {
            self.on_clock_config_change();
        }
    }

    // --- Clocks & scheduling ---

    /// Schedule an event `ticks` ticks out, in its clock's own scale.
    pub fn schedule(&mut self, tag: EventTag, clock: ClockType, ticks: u64, priority: u8) {
        let scale = self.clock_scale(clock);
        self.scheduler.schedule(tag, clock, ticks, priority, scale, self.clk_sys_tick);
    }

    /// Unschedule an event by identity.
    pub fn unschedule(&mut self, tag: EventTag) {
        if !self.scheduler.unschedule(tag) {
            error!(target: "device", "cannot unschedule event: not found");
        }
    }

    /// Divisor from the given clock domain to the SYS clock.
    pub fn clock_scale(&self, clock: ClockType) -> u64 {
        match clock {
            ClockType::Sys => 1,
            ClockType::Cpu | ClockType::Per => {
                self.clk.prescaler_a * self.clk.prescaler_b * self.clk.prescaler_c
            }
            ClockType::Per2 => self.clk.prescaler_a * self.clk.prescaler_b,
            ClockType::Per4 => self.clk.prescaler_a,
            ClockType::Asy => {
                warn!(target: "device", "ASY clock not supported");
                1
            }
        }
    }

    /// Frequency of the given clock, in Hz.
    pub fn clock_frequency(&self, clock: ClockType) -> u32 {
        self.clk.f_sys / self.clock_scale(clock) as u32
    }

    /// Re-align scheduled events after a prescaler reconfiguration.
    ///
    /// Must be invoked on a tick aligned with the slowest changed clock.
    pub fn on_clock_config_change(&mut self) {
        let (a, b, c) = (self.clk.prescaler_a, self.clk.prescaler_b, self.clk.prescaler_c);
        self.scheduler.rescale(self.clk_sys_tick, |clock| match clock {
            ClockType::Sys | ClockType::Asy => 1,
            ClockType::Cpu | ClockType::Per => a * b * c,
            ClockType::Per2 => a * b,
            ClockType::Per4 => a,
        });
    }

    // --- Stack ---

    fn stack_read(&self, addr: u16) -> u8 {
        let a = addr as u32;
        if a >= MEM_SRAM_START && a < MEM_SRAM_START + self.model.sram_size {
            self.sram[(a - MEM_SRAM_START) as usize]
        } else {
            error!(target: "device", "stack read outside internal SRAM: 0x{addr:04X}");
            0
        }
    }

    fn stack_write(&mut self, addr: u16, v: u8) {
        let a = addr as u32;
        if a >= MEM_SRAM_START && a < MEM_SRAM_START + self.model.sram_size {
            self.sram[(a - MEM_SRAM_START) as usize] = v;
        } else {
            error!(target: "device", "stack write outside internal SRAM: 0x{addr:04X}");
        }
    }

    /// Width of the return-address stack frame, set by the flash size.
    pub fn pc_bytes(&self) -> u16 {
        if self.model.flash_size <= 0x20000 {
            2
        } else {
            3
        }
    }

    /// Push a return address, MSB first, and drop SP below it.
    pub(crate) fn push_pc(&mut self, pc: u32) {
        let sp = self.cpu.sp;
        if self.pc_bytes() == 2 {
            self.stack_write(sp, (pc >> 8) as u8);
            self.stack_write(sp.wrapping_sub(1), pc as u8);
            self.cpu.sp = sp.wrapping_sub(2);
        } else {
            self.stack_write(sp, (pc >> 16) as u8);
            self.stack_write(sp.wrapping_sub(1), (pc >> 8) as u8);
            self.stack_write(sp.wrapping_sub(2), pc as u8);
            self.cpu.sp = sp.wrapping_sub(3);
        }
    }

    /// Pop a return address pushed by [`Self::push_pc`].
    pub(crate) fn pop_pc(&mut self) -> u32 {
        if self.pc_bytes() == 2 {
            self.cpu.sp = self.cpu.sp.wrapping_add(2);
            let sp = self.cpu.sp;
            ((self.stack_read(sp) as u32) << 8) | self.stack_read(sp.wrapping_sub(1)) as u32
        } else {
            self.cpu.sp = self.cpu.sp.wrapping_add(3);
            let sp = self.cpu.sp;
            ((self.stack_read(sp) as u32) << 16)
                | ((self.stack_read(sp.wrapping_sub(1)) as u32) << 8)
                | self.stack_read(sp.wrapping_sub(2)) as u32
        }
    }

    /// Push one byte (PUSH).
    pub(crate) fn push_byte(&mut self, v: u8) {
        let sp = self.cpu.sp;
        self.stack_write(sp, v);
        self.cpu.sp = sp.wrapping_sub(1);
    }

    /// Pop one byte (POP).
    pub(crate) fn pop_byte(&mut self) -> u8 {
        self.cpu.sp = self.cpu.sp.wrapping_add(1);
        self.stack_read(self.cpu.sp)
    }

    // --- Flash & configuration ---

    /// Load a little-endian flash byte image.
    pub fn load_flash(&mut self, data: &[u8]) -> Result<(), ConfigError> {
        self.flash.load(data).map_err(|reason| ConfigError::Model {
            model: self.model.name.clone(),
            reason: reason.into(),
        })
    }

    pub fn model(&self) -> &ModelConf {
        &self.model
    }

    /// First word address of the boot section.
    pub fn flash_boot_start_word(&self) -> u32 {
        self.flash_boot_start_word
    }

    pub(crate) fn flash_size(&self) -> u32 {
        self.model.flash_size
    }

    // --- Host-observable hooks ---

    pub fn regfile(&self) -> &RegFile {
        &self.regfile
    }

    pub fn regfile_mut(&mut self) -> &mut RegFile {
        &mut self.regfile
    }

    pub fn flash_data(&self) -> &[u16] {
        self.flash.words()
    }

    pub fn flash_data_mut(&mut self) -> &mut [u16] {
        self.flash.words_mut()
    }

    pub fn sreg(&self) -> u8 {
        self.cpu.sreg.0
    }

    pub fn set_sreg(&mut self, v: u8) {
        self.cpu.sreg.0 = v;
    }

    pub fn sp(&self) -> u16 {
        self.cpu.sp
    }

    /// Set SP, rejecting values outside the SRAM ranges.
    pub fn set_sp(&mut self, sp: u16) {
        let limit = self.exsram_start + self.exsram_size;
        if (sp as u32) < limit {
            self.cpu.sp = sp;
        } else {
            error!(target: "device", "invalid SP value (overflow): 0x{sp:04X}");
        }
    }

    /// Program counter, in flash words.
    pub fn pc(&self) -> u32 {
        self.cpu.pc
    }

    /// Set PC; an out-of-flash value is a fatal host error.
    pub fn set_pc(&mut self, pc: u32) -> Result<(), RuntimeError> {
        if pc >= self.flash.word_count() {
            error!(target: "device", "invalid PC value (overflow): 0x{pc:05X}");
            Err(RuntimeError::PcOutOfRange { pc })
        } else {
            self.cpu.pc = pc;
            Ok(())
        }
    }

    /// CCP state as read in the I/O register.
    pub fn ccp_state(&self) -> u8 {
        self.cpu.ccp_state()
    }

    /// One-shot BREAK flag, observable by front-ends.
    pub fn breaked(&self) -> bool {
        self.breaked
    }

    pub(crate) fn set_breaked(&mut self) {
        self.breaked = true;
    }

    /// Current SYS tick.
    pub fn sys_tick(&self) -> u64 {
        self.clk_sys_tick
    }

    /// PMIC status byte (executing levels).
    pub fn pmic_status(&self) -> u8 {
        self.pmic.status
    }

    #[cfg(test)]
    pub(crate) fn pending_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.iv_pending.lo.len(),
            self.iv_pending.med.len(),
            self.iv_pending.hi.len(),
            self.iv_pending.nmi.len(),
        )
    }

    #[cfg(test)]
    pub(crate) fn pending_has(&self, iv: u8, lvl: IntLvl) -> bool {
        match lvl {
            IntLvl::Lo => self.iv_pending.lo.contains(&iv),
            IntLvl::Med => self.iv_pending.med.contains(&iv),
            IntLvl::Hi => self.iv_pending.hi.contains(&iv),
            IntLvl::Nmi => self.iv_pending.nmi.contains(&iv),
            IntLvl::None => {
                !(self.iv_pending.lo.contains(&iv)
                    || self.iv_pending.med.contains(&iv)
                    || self.iv_pending.hi.contains(&iv)
                    || self.iv_pending.nmi.contains(&iv))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::new(ModelConf::atxmega128a1()).unwrap()
    }

    #[test]
    fn test_new_device_reset_state() {
        let dev = device();
        assert_eq!(dev.pc(), 0);
        assert_eq!(dev.sp(), 0x5FFF);
        assert_eq!(dev.sys_tick(), 0);
        assert_eq!(dev.flash_data().len(), 0x11000);
        assert!(dev.flash_data().iter().all(|&w| w == 0xFFFF));
    }

    #[test]
    fn test_sram_not_cleared_on_reset() {
        let mut dev = device();
        dev.set_data_mem(MEM_SRAM_START + 4, 0xA5);
        dev.reset();
        assert_eq!(dev.get_data_mem(MEM_SRAM_START + 4), 0xA5);
    }

    #[test]
    fn test_scheduler_counts_cpu_ticks() {
        let mut dev = device();
        // NOP sled
        for w in dev.flash_data_mut().iter_mut().take(64) {
            *w = 0x0000;
        }
        for _ in 0..10 {
            dev.step().unwrap();
        }
        assert_eq!(dev.sys_tick(), 10);
        assert_eq!(dev.pc(), 10); // one NOP per CPU tick
    }

    #[test]
    fn test_memory_dispatch_io_and_sram() {
        let mut dev = device();
        // GPIOR0 lives at I/O 0x0000
        dev.set_data_mem(0x0000, 0x42);
        assert_eq!(dev.get_data_mem(0x0000), 0x42);
        dev.set_data_mem(MEM_SRAM_START, 0x99);
        assert_eq!(dev.get_data_mem(MEM_SRAM_START), 0x99);
        // EEPROM stub reads as zero
        assert_eq!(dev.get_data_mem(MEM_EEPROM_START), 0);
        // Unmapped hole between EEPROM and SRAM
        assert_eq!(dev.get_data_mem(0x1F00), 0);
    }

    #[test]
    fn test_emulator_window_exposes_sys_tick() {
        let mut dev = device();
        dev.clk_sys_tick = 0x0403_0201;
        assert_eq!(dev.get_data_mem(MEM_EMULATOR_START), 0x01);
        assert_eq!(dev.get_data_mem(MEM_EMULATOR_START + 1), 0x02);
        assert_eq!(dev.get_data_mem(MEM_EMULATOR_START + 2), 0x03);
        assert_eq!(dev.get_data_mem(MEM_EMULATOR_START + 3), 0x04);
        assert_eq!(dev.get_data_mem(MEM_EMULATOR_START + 4), 0);
        // Writes are rejected
        dev.set_data_mem(MEM_EMULATOR_START, 0xFF);
        assert_eq!(dev.get_data_mem(MEM_EMULATOR_START), 0x01);
    }

    #[test]
    fn test_set_iv_lvl_moves_between_queues() {
        let mut dev = device();
        dev.set_iv_lvl(14, IntLvl::Lo);
        assert!(dev.pending_has(14, IntLvl::Lo));
        dev.set_iv_lvl(14, IntLvl::Hi);
        assert!(dev.pending_has(14, IntLvl::Hi));
        assert!(!dev.pending_has(14, IntLvl::Lo));
        dev.set_iv_lvl(14, IntLvl::Hi); // idempotent
        assert_eq!(dev.pending_counts(), (0, 0, 1, 0));
        dev.set_iv_lvl(14, IntLvl::None);
        assert!(dev.pending_has(14, IntLvl::None));
    }

    #[test]
    fn test_sp_masked_via_io_and_hook() {
        let mut dev = device();
        dev.set_io_mem(0x3D, 0x34); // SPL
        dev.set_io_mem(0x3E, 0x25); // SPH
        assert_eq!(dev.sp(), 0x2534);
        assert_eq!(dev.get_io_mem(0x3D), 0x34);
        assert_eq!(dev.get_io_mem(0x3E), 0x25);
    }

    #[test]
    fn test_set_pc_overflow_is_fatal() {
        let mut dev = device();
        assert!(dev.set_pc(0x10FFF).is_ok());
        assert_eq!(dev.set_pc(0x11000), Err(RuntimeError::PcOutOfRange { pc: 0x11000 }));
    }

    #[test]
    fn test_load_flash_validation() {
        let mut dev = device();
        assert!(dev.load_flash(&[1, 2, 3]).is_err());
        let too_big = vec![0u8; 0x22002];
        assert!(dev.load_flash(&too_big).is_err());
        assert!(dev.load_flash(&[0x05, 0xE0]).is_ok());
        assert_eq!(dev.flash_data()[0], 0xE005);
    }

    #[test]
    fn test_clock_scales_follow_prescalers() {
        let mut dev = device();
        assert_eq!(dev.clock_scale(ClockType::Cpu), 1);
        // Reconfigure PSCTRL: A=4, B=2, C=2
        dev.set_io_mem(0x41, (2 << 2) | 3);
        assert_eq!(dev.clock_scale(ClockType::Per4), 4);
        assert_eq!(dev.clock_scale(ClockType::Per2), 8);
        assert_eq!(dev.clock_scale(ClockType::Per), 16);
        assert_eq!(dev.clock_scale(ClockType::Cpu), 16);
        assert_eq!(dev.clock_scale(ClockType::Sys), 1);
    }

    #[test]
    fn test_clock_frequency_divides_f_sys() {
        let mut dev = device();
        assert_eq!(dev.clock_frequency(ClockType::Sys), 2_000_000);
        dev.set_io_mem(0x41, 1 << 2); // PSADIV=1 -> A=2 (not locked, no CCP needed)
        assert_eq!(dev.clock_frequency(ClockType::Per4), 1_000_000);
    }
}
