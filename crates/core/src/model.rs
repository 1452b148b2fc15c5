//! Device model configuration.
//!
//! A [`ModelConf`] holds the per-model memory map values that cannot be
//! deduced from one another; everything else (application/boot section
//! split, external SRAM window) is derived at device construction.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::{MEM_MAX_SIZE, MEM_SRAM_START};

/// Model configuration, provided to [`crate::Device::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConf {
    /// Device model name, used to prefix configuration errors.
    pub name: String,
    /// Flash size in bytes.
    pub flash_size: u32,
    /// Flash page size in bytes.
    pub flash_page_size: u32,
    /// Boot section size in bytes.
    pub flash_boot_size: u32,
    /// Memory-mapped EEPROM size in bytes.
    pub eeprom_size: u32,
    /// Internal SRAM size in bytes.
    pub sram_size: u32,
    /// Whether the model can map external SRAM above internal SRAM.
    pub has_exsram: bool,
}

impl ModelConf {
    /// ATxmega128A1: 128K+8K flash, 8K boot, 2K EEPROM, 16K SRAM, EBI.
    pub fn atxmega128a1() -> Self {
        ModelConf {
            name: "ATxmega128A1".into(),
            flash_size: 0x22000,
            flash_page_size: 0x200,
            flash_boot_size: 0x2000,
            eeprom_size: 0x800,
            sram_size: 0x4000,
            has_exsram: true,
        }
    }

    fn check(&self, cond: bool, reason: &str) -> Result<(), ConfigError> {
        if cond {
            Ok(())
        } else {
            Err(ConfigError::Model { model: self.name.clone(), reason: reason.into() })
        }
    }

    /// Validate the memory map values.
    ///
    /// The order matters: each check may rely on the previous ones to
    /// avoid arithmetic overflow.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check(self.flash_page_size != 0 && self.flash_page_size % 2 == 0,
                   "flash page size not aligned on words")?;
        self.check(self.flash_size % self.flash_page_size == 0,
                   "flash size not aligned on page size")?;
        self.check(self.flash_boot_size % self.flash_page_size == 0,
                   "flash bootloader size not aligned on page size")?;
        self.check(self.flash_boot_size > 0,
                   "flash bootloader size is zero")?;
        self.check(self.flash_boot_size < self.flash_size,
                   "flash bootloader larger than total flash")?;
        self.check(self.flash_boot_size < self.flash_size - self.flash_boot_size,
                   "flash bootloader larger than flash application")?;
        self.check(self.eeprom_size <= 0x1000,
                   "memory mapped EEPROM is too large")?;
        self.check(self.sram_size < MEM_MAX_SIZE - MEM_SRAM_START,
                   "internal SRAM is too large")?;
        Ok(())
    }
}
