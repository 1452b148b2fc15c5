//! Property tests: flag semantics against independent arithmetic
//! references, register masking, stack round trips and scheduler
//! accounting.

use proptest::prelude::*;
use xmega_core::{ClockType, Device, ModelConf};

fn small_model() -> ModelConf {
    ModelConf {
        name: "testdev".into(),
        flash_size: 0x10000,
        flash_page_size: 0x100,
        flash_boot_size: 0x1000,
        eeprom_size: 0x400,
        sram_size: 0x2000,
        has_exsram: false,
    }
}

/// Run a single one-word instruction from a fresh device.
fn run_one(op: u16, setup: impl FnOnce(&mut Device)) -> Device {
    let mut dev = Device::new(small_model()).unwrap();
    dev.flash_data_mut()[0] = op;
    setup(&mut dev);
    dev.step().unwrap();
    dev
}

fn flag(dev: &Device, bit: u8) -> bool {
    dev.sreg() & (1 << bit) != 0
}

const C: u8 = 0;
const Z: u8 = 1;
const N: u8 = 2;
const V: u8 = 3;
const S: u8 = 4;
const H: u8 = 5;

proptest! {
    #[test]
    fn add_flags_match_reference(rd in any::<u8>(), rr in any::<u8>()) {
        // ADD r0,r1
        let dev = run_one(0x0C01, |d| {
            d.regfile_mut().set_reg(0, rd);
            d.regfile_mut().set_reg(1, rr);
        });
        let r = rd.wrapping_add(rr);
        prop_assert_eq!(dev.regfile().reg(0), r);
        prop_assert_eq!(flag(&dev, C), (rd as u16 + rr as u16) > 0xFF);
        prop_assert_eq!(flag(&dev, Z), r == 0);
        prop_assert_eq!(flag(&dev, N), r & 0x80 != 0);
        prop_assert_eq!(flag(&dev, V), (rd as i8).checked_add(rr as i8).is_none());
        prop_assert_eq!(flag(&dev, H), (rd & 0xF) + (rr & 0xF) > 0xF);
        prop_assert_eq!(flag(&dev, S), flag(&dev, N) ^ flag(&dev, V));
    }

    #[test]
    fn sub_and_cp_flags_match_reference(rd in any::<u8>(), rr in any::<u8>()) {
        // CP r0,r1 computes the same flags as SUB without the writeback.
        let dev = run_one(0x1401, |d| {
            d.regfile_mut().set_reg(0, rd);
            d.regfile_mut().set_reg(1, rr);
        });
        let r = rd.wrapping_sub(rr);
        prop_assert_eq!(dev.regfile().reg(0), rd); // CP does not write
        prop_assert_eq!(flag(&dev, C), rd < rr);
        prop_assert_eq!(flag(&dev, Z), r == 0);
        prop_assert_eq!(flag(&dev, N), r & 0x80 != 0);
        prop_assert_eq!(flag(&dev, V), (rd as i8).checked_sub(rr as i8).is_none());
        prop_assert_eq!(flag(&dev, H), (rd & 0xF) < (rr & 0xF));
    }

    #[test]
    fn cpc_flags_match_reference(
        rd in any::<u8>(),
        rr in any::<u8>(),
        carry in any::<bool>(),
        zin in any::<bool>(),
    ) {
        // CPC r0,r1 with seeded C and Z
        let sreg0 = (carry as u8) | ((zin as u8) << 1);
        let dev = run_one(0x0401, |d| {
            d.regfile_mut().set_reg(0, rd);
            d.regfile_mut().set_reg(1, rr);
            d.set_sreg(sreg0);
        });
        let c = carry as u16;
        let r = rd.wrapping_sub(rr).wrapping_sub(c as u8);
        prop_assert_eq!(flag(&dev, C), (rd as u16) < (rr as u16 + c));
        // Z is only ever cleared, to support multi-byte compares.
        prop_assert_eq!(flag(&dev, Z), zin && r == 0);
        let full = (rd as i8 as i16) - (rr as i8 as i16) - c as i16;
        prop_assert_eq!(flag(&dev, V), full < -128 || full > 127);
        prop_assert_eq!(flag(&dev, H), ((rd & 0xF) as u16) < ((rr & 0xF) as u16 + c));
    }

    #[test]
    fn adiw_flags_match_reference(rd in any::<u16>(), k in 0u16..64) {
        // ADIW r30,k
        let op = 0x9630 | (k & 0xF) | ((k & 0x30) << 2);
        let dev = run_one(op, |d| d.regfile_mut().set_z(rd));
        let r = rd.wrapping_add(k);
        prop_assert_eq!(dev.regfile().z(), r);
        prop_assert_eq!(flag(&dev, C), (rd as u32 + k as u32) > 0xFFFF);
        prop_assert_eq!(flag(&dev, Z), r == 0);
        prop_assert_eq!(flag(&dev, N), r & 0x8000 != 0);
        prop_assert_eq!(flag(&dev, V), (rd as i16).checked_add(k as i16).is_none());
    }

    #[test]
    fn sbiw_flags_match_reference(rd in any::<u16>(), k in 0u16..64) {
        // SBIW r30,k
        let op = 0x9730 | (k & 0xF) | ((k & 0x30) << 2);
        let dev = run_one(op, |d| d.regfile_mut().set_z(rd));
        let r = rd.wrapping_sub(k);
        prop_assert_eq!(dev.regfile().z(), r);
        prop_assert_eq!(flag(&dev, C), rd < k);
        prop_assert_eq!(flag(&dev, Z), r == 0);
        prop_assert_eq!(flag(&dev, V), (rd as i16).checked_sub(k as i16).is_none());
    }

    #[test]
    fn inc_dec_flags_match_reference(rd in any::<u8>()) {
        // INC r4
        let dev = run_one(0x9443, |d| d.regfile_mut().set_reg(4, rd));
        let r = rd.wrapping_add(1);
        prop_assert_eq!(dev.regfile().reg(4), r);
        prop_assert_eq!(flag(&dev, V), rd == 0x7F);
        prop_assert_eq!(flag(&dev, Z), r == 0);
        prop_assert_eq!(flag(&dev, N), r & 0x80 != 0);
        // DEC r4
        let dev = run_one(0x944A, |d| d.regfile_mut().set_reg(4, rd));
        let r = rd.wrapping_sub(1);
        prop_assert_eq!(dev.regfile().reg(4), r);
        prop_assert_eq!(flag(&dev, V), rd == 0x80);
        prop_assert_eq!(flag(&dev, Z), r == 0);
    }

    #[test]
    fn neg_com_flags_match_reference(rd in any::<u8>()) {
        // NEG r4
        let dev = run_one(0x9441, |d| d.regfile_mut().set_reg(4, rd));
        let r = 0u8.wrapping_sub(rd);
        prop_assert_eq!(dev.regfile().reg(4), r);
        prop_assert_eq!(flag(&dev, C), r != 0);
        prop_assert_eq!(flag(&dev, V), r == 0x80);
        prop_assert_eq!(flag(&dev, H), (r & 0x08 != 0) || (rd & 0x08 != 0));
        // COM r4, with H seeded to catch clobbers: COM must not touch it.
        let dev = run_one(0x9440, |d| {
            d.regfile_mut().set_reg(4, rd);
            d.set_sreg(1 << H);
        });
        prop_assert_eq!(dev.regfile().reg(4), !rd);
        prop_assert!(flag(&dev, C));
        prop_assert!(!flag(&dev, V));
        prop_assert_eq!(flag(&dev, N), !rd & 0x80 != 0);
        prop_assert_eq!(flag(&dev, Z), !rd == 0);
        prop_assert!(flag(&dev, H));
    }

    #[test]
    fn shift_flags_match_reference(rd in any::<u8>(), carry in any::<bool>()) {
        // ASR r4
        let dev = run_one(0x9445, |d| d.regfile_mut().set_reg(4, rd));
        prop_assert_eq!(dev.regfile().reg(4), ((rd as i8) >> 1) as u8);
        prop_assert_eq!(flag(&dev, C), rd & 1 != 0);
        prop_assert_eq!(flag(&dev, V), flag(&dev, N) ^ flag(&dev, C));
        // LSR r4
        let dev = run_one(0x9446, |d| d.regfile_mut().set_reg(4, rd));
        prop_assert_eq!(dev.regfile().reg(4), rd >> 1);
        prop_assert!(!flag(&dev, N));
        // ROR r4 with seeded carry
        let dev = run_one(0x9447, |d| {
            d.regfile_mut().set_reg(4, rd);
            d.set_sreg(carry as u8);
        });
        prop_assert_eq!(dev.regfile().reg(4), (rd >> 1) | ((carry as u8) << 7));
        prop_assert_eq!(flag(&dev, C), rd & 1 != 0);
    }

    #[test]
    fn prescaler_scales_relate(psadiv in 0u8..10, psbcdiv in 0u8..4) {
        let mut dev = Device::new(small_model()).unwrap();
        dev.set_io_mem(0x41, (psadiv << 2) | psbcdiv);
        let a = 1u64 << psadiv;
        let b = match psbcdiv { 2 => 4, 3 => 2, _ => 1 };
        let c = if psbcdiv & 1 != 0 { 2 } else { 1 };
        prop_assert_eq!(dev.clock_scale(ClockType::Per4), a);
        prop_assert_eq!(dev.clock_scale(ClockType::Per2), a * b);
        prop_assert_eq!(dev.clock_scale(ClockType::Per), a * b * c);
        prop_assert_eq!(dev.clock_scale(ClockType::Cpu), a * b * c);
        prop_assert_eq!(dev.clock_scale(ClockType::Sys), 1);
    }

    #[test]
    fn sp_reads_back_through_io(sp in 0x2000u16..0x4000) {
        let mut dev = Device::new(small_model()).unwrap();
        dev.set_io_mem(0x3D, (sp & 0xFF) as u8);
        dev.set_io_mem(0x3E, (sp >> 8) as u8);
        prop_assert_eq!(dev.sp(), sp);
        prop_assert_eq!(dev.get_io_mem(0x3D), (sp & 0xFF) as u8);
        prop_assert_eq!(dev.get_io_mem(0x3E), (sp >> 8) as u8);
    }

    #[test]
    fn ramp_and_eind_writes_are_masked(v in any::<u8>()) {
        let mut dev = Device::new(small_model()).unwrap();
        // testdev: no external SRAM, data space tops out at 0x4000.
        let ramp_mask = (0x4000u32 >> 8) as u8;
        let eind_mask = (0x10000u32 >> 9) as u8;
        for offset in [0x38u16, 0x39, 0x3A, 0x3B] { // RAMPD/X/Y/Z
            dev.set_io_mem(offset, v);
            prop_assert_eq!(dev.get_io_mem(offset), v & ramp_mask);
        }
        dev.set_io_mem(0x3C, v); // EIND
        prop_assert_eq!(dev.get_io_mem(0x3C), v & eind_mask);
    }

    #[test]
    fn jmp_reaches_any_word(k in 0u32..0x8000) {
        let mut dev = Device::new(small_model()).unwrap();
        dev.flash_data_mut()[0] = 0x940C;
        dev.flash_data_mut()[1] = k as u16;
        for _ in 0..3 {
            dev.step().unwrap();
        }
        // JMP takes 3 cycles; PC sits at the target, nothing fetched yet.
        prop_assert_eq!(dev.pc(), k);
    }

    #[test]
    fn push_pop_roundtrip(v in any::<u8>(), r in 0u8..32) {
        let mut dev = Device::new(small_model()).unwrap();
        let op_push = 0x920F | ((r as u16) << 4);
        let op_pop = 0x900F | (((r ^ 1) as u16) << 4);
        dev.flash_data_mut()[0] = op_push;
        dev.flash_data_mut()[1] = op_pop;
        dev.regfile_mut().set_reg(r, v);
        let sp0 = dev.sp();
        dev.step().unwrap();
        prop_assert_eq!(dev.sp(), sp0 - 1);
        dev.step().unwrap();
        prop_assert_eq!(dev.sp(), sp0);
        prop_assert_eq!(dev.regfile().reg(r ^ 1), v);
    }

    #[test]
    fn call_ret_restores_pc_and_sp(k in 2u32..0x1000) {
        let mut dev = Device::new(small_model()).unwrap();
        dev.flash_data_mut()[0] = 0x940E;
        dev.flash_data_mut()[1] = k as u16;
        dev.flash_data_mut()[k as usize] = 0x9508; // RET
        let sp0 = dev.sp();
        for _ in 0..3 {
            dev.step().unwrap(); // CALL (3 cycles)
        }
        prop_assert_eq!(dev.pc(), k);
        prop_assert_eq!(dev.sp(), sp0 - 2);
        for _ in 0..2 {
            dev.step().unwrap(); // RET (2 cycles)
        }
        prop_assert_eq!(dev.pc(), 2);
        prop_assert_eq!(dev.sp(), sp0);
    }

    #[test]
    fn scheduler_counts_match_steps(n in 1usize..200) {
        let mut dev = Device::new(small_model()).unwrap();
        for w in dev.flash_data_mut().iter_mut().take(256) {
            *w = 0x0000;
        }
        for _ in 0..n {
            dev.step().unwrap();
        }
        prop_assert_eq!(dev.sys_tick(), n as u64);
    }

    #[test]
    fn rescaled_ticks_stay_aligned(psadiv in 0u8..6, warmup in 1usize..16) {
        let mut dev = Device::new(small_model()).unwrap();
        for w in dev.flash_data_mut().iter_mut().take(1024) {
            *w = 0x0000;
        }
        for _ in 0..warmup {
            dev.step().unwrap();
        }
        let now = dev.sys_tick();
        dev.set_io_mem(0x41, psadiv << 2);
        let scale = dev.clock_scale(ClockType::Cpu);
        dev.step().unwrap();
        let next = dev.sys_tick();
        prop_assert!(next > now);
        prop_assert_eq!((next - now) % scale, 0);
    }

    #[test]
    fn flash_image_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut data = data;
        if data.len() % 2 != 0 {
            data.pop();
        }
        let mut dev = Device::new(small_model()).unwrap();
        dev.load_flash(&data).unwrap();
        for (i, pair) in data.chunks_exact(2).enumerate() {
            prop_assert_eq!(dev.flash_data()[i], pair[0] as u16 | ((pair[1] as u16) << 8));
        }
    }
}
