//! Board 1: MMC1 (SxROM)
//!
//! Registers are loaded one bit at a time through a 5-bit shift register.
//! The chip ignores a write that lands on the cycle right after another
//! write, which read-modify-write instructions rely on.

use tracing::trace;

use super::{Banks, Mapper, Mirroring};

#[derive(Debug, Clone)]
pub struct Mmc1 {
    banks: Banks,
    shift: u8,
    shift_count: u8,
    control: u8,
    chr_bank_0: u8,
    chr_bank_1: u8,
    prg_bank: u8,
    /// CPU cycles since the last accepted or rejected register write
    cycles_since_write: u32,
}

impl Mmc1 {
    pub fn new(banks: Banks) -> Self {
        let mut mmc1 = Self {
            banks,
            shift: 0,
            shift_count: 0,
            control: 0x0C,
            chr_bank_0: 0,
            chr_bank_1: 0,
            prg_bank: 0,
            cycles_since_write: u32::MAX,
        };
        mmc1.update_banks();
        mmc1
    }

    fn write_register(&mut self, address: u16, value: u8) {
        if value & 0x80 != 0 {
            self.shift = 0;
            self.shift_count = 0;
            self.control |= 0x0C;
            self.update_banks();
            return;
        }

        self.shift |= (value & 1) << self.shift_count;
        self.shift_count += 1;
        if self.shift_count < 5 {
            return;
        }

        let data = self.shift;
        self.shift = 0;
        self.shift_count = 0;
        trace!(address, data, "mmc1 register load");
        match address {
            0x8000..=0x9FFF => self.control = data,
            0xA000..=0xBFFF => self.chr_bank_0 = data,
            0xC000..=0xDFFF => self.chr_bank_1 = data,
            _ => self.prg_bank = data,
        }
        self.update_banks();
    }

    fn update_banks(&mut self) {
        // 512 KiB boards use CHR bit 4 as the outer 256 KiB PRG select
        let outer = if self.banks.prg_banks_16k() > 16 {
            (self.chr_bank_0 & 0x10) as i32
        } else {
            0
        };
        let bank = (self.prg_bank & 0x0F) as i32;
        match (self.control >> 2) & 0x03 {
            0 | 1 => {
                self.banks.set_prg_16k(0, outer | (bank & !1));
                self.banks.set_prg_16k(1, outer | (bank & !1) | 1);
            }
            2 => {
                self.banks.set_prg_16k(0, outer);
                self.banks.set_prg_16k(1, outer | bank);
            }
            _ => {
                self.banks.set_prg_16k(0, outer | bank);
                self.banks.set_prg_16k(1, outer | 0x0F);
            }
        }

        if self.control & 0x10 != 0 {
            self.banks.set_chr_4k(0, self.chr_bank_0 as i32);
            self.banks.set_chr_4k(1, self.chr_bank_1 as i32);
        } else {
            self.banks.set_chr_8k((self.chr_bank_0 >> 1) as i32);
        }
    }

    fn ram_enabled(&self) -> bool {
        self.prg_bank & 0x10 == 0
    }
}

impl Mapper for Mmc1 {
    fn read_prg(&self, address: u16) -> Option<u8> {
        match address {
            0x8000..=0xFFFF => Some(self.banks.read_prg_rom(address)),
            0x6000..=0x7FFF if self.ram_enabled() => self.banks.read_prg_ram(address),
            _ => None,
        }
    }

    fn write_prg(&mut self, address: u16, value: u8) {
        match address {
            0x8000..=0xFFFF => {
                let consecutive = self.cycles_since_write <= 1;
                self.cycles_since_write = 0;
                if !consecutive {
                    self.write_register(address, value);
                }
            }
            0x6000..=0x7FFF if self.ram_enabled() => self.banks.write_prg_ram(address, value),
            _ => {}
        }
    }

    fn mirroring(&self) -> Mirroring {
        match self.control & 0x03 {
            0 => Mirroring::SingleScreenLower,
            1 => Mirroring::SingleScreenUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        }
    }

    fn cpu_clock(&mut self) {
        self.cycles_since_write = self.cycles_since_write.saturating_add(1);
    }

    fn reset(&mut self) {
        self.shift = 0;
        self.shift_count = 0;
        self.control |= 0x0C;
        self.update_banks();
    }

    delegate_banks!();
}
