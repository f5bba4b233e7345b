//! Board 4: MMC3 (TxROM)
//!
//! Besides 8 KiB PRG and 1/2 KiB CHR banking, the chip counts rising edges
//! of PPU address line A12 to raise an IRQ after a programmable number of
//! scanlines. Edges that follow a short low period (the sprite fetch
//! pattern within one scanline) are filtered out.

use tracing::trace;

use super::{Banks, Mapper, Mirroring};

/// CPU cycles A12 must stay low before a rising edge clocks the counter
const A12_LOW_CYCLES: u8 = 3;

#[derive(Debug, Clone)]
pub struct Mmc3 {
    banks: Banks,
    bank_select: u8,
    registers: [u8; 8],
    mirroring: Mirroring,
    four_screen: bool,
    ram_enabled: bool,
    ram_write_protect: bool,
    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_pending: bool,
    a12: bool,
    a12_low_cycles: u8,
}

impl Mmc3 {
    pub fn new(banks: Banks, mirroring: Mirroring) -> Self {
        let mut mmc3 = Self {
            banks,
            bank_select: 0,
            registers: [0, 2, 4, 5, 6, 7, 0, 1],
            mirroring,
            four_screen: mirroring == Mirroring::FourScreen,
            ram_enabled: true,
            ram_write_protect: false,
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
            irq_pending: false,
            a12: false,
            a12_low_cycles: 0,
        };
        mmc3.update_banks();
        mmc3
    }

    fn update_banks(&mut self) {
        let r = self.registers.map(|value| value as i32);
        if self.bank_select & 0x40 == 0 {
            self.banks.set_prg_8k(0, r[6]);
            self.banks.set_prg_8k(2, -2);
        } else {
            self.banks.set_prg_8k(0, -2);
            self.banks.set_prg_8k(2, r[6]);
        }
        self.banks.set_prg_8k(1, r[7]);
        self.banks.set_prg_8k(3, -1);

        // CHR A12 inversion swaps the 2 KiB and 1 KiB halves
        let (wide, narrow) = if self.bank_select & 0x80 == 0 { (0, 4) } else { (4, 0) };
        self.banks.set_chr_1k(wide, r[0] & !1);
        self.banks.set_chr_1k(wide + 1, r[0] | 1);
        self.banks.set_chr_1k(wide + 2, r[1] & !1);
        self.banks.set_chr_1k(wide + 3, r[1] | 1);
        for i in 0..4 {
            self.banks.set_chr_1k(narrow + i, r[2 + i]);
        }
    }

    fn clock_irq_counter(&mut self) {
        if self.irq_counter == 0 || self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
        }
        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_pending = true;
        }
    }

    /// Current value of the scanline counter
    pub fn irq_counter(&self) -> u8 {
        self.irq_counter
    }
}

impl Mapper for Mmc3 {
    fn read_prg(&self, address: u16) -> Option<u8> {
        match address {
            0x8000..=0xFFFF => Some(self.banks.read_prg_rom(address)),
            0x6000..=0x7FFF if self.ram_enabled => self.banks.read_prg_ram(address),
            _ => None,
        }
    }

    fn write_prg(&mut self, address: u16, value: u8) {
        match (address, address & 1) {
            (0x6000..=0x7FFF, _) => {
                if self.ram_enabled && !self.ram_write_protect {
                    self.banks.write_prg_ram(address, value);
                }
            }
            (0x8000..=0x9FFF, 0) => {
                self.bank_select = value;
                self.update_banks();
            }
            (0x8000..=0x9FFF, _) => {
                let index = (self.bank_select & 0x07) as usize;
                self.registers[index] = value;
                self.update_banks();
            }
            (0xA000..=0xBFFF, 0) => {
                if !self.four_screen {
                    self.mirroring = if value & 1 == 0 {
                        Mirroring::Vertical
                    } else {
                        Mirroring::Horizontal
                    };
                }
            }
            (0xA000..=0xBFFF, _) => {
                self.ram_enabled = value & 0x80 != 0;
                self.ram_write_protect = value & 0x40 != 0;
            }
            (0xC000..=0xDFFF, 0) => self.irq_latch = value,
            (0xC000..=0xDFFF, _) => {
                self.irq_counter = 0;
                self.irq_reload = true;
            }
            (0xE000..=0xFFFF, 0) => {
                self.irq_enabled = false;
                self.irq_pending = false;
            }
            (0xE000..=0xFFFF, _) => self.irq_enabled = true,
            _ => {}
        }
        trace!(address, value, "mmc3 write");
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn on_ppu_address(&mut self, address: u16) {
        let a12 = address & 0x1000 != 0;
        if a12 && !self.a12 {
            if self.a12_low_cycles >= A12_LOW_CYCLES {
                self.clock_irq_counter();
            }
        } else if !a12 && self.a12 {
            self.a12_low_cycles = 0;
        }
        self.a12 = a12;
    }

    fn cpu_clock(&mut self) {
        if !self.a12 {
            self.a12_low_cycles = self.a12_low_cycles.saturating_add(1);
        }
    }

    fn irq_pending(&self) -> bool {
        self.irq_pending
    }

    fn reset(&mut self) {
        self.irq_enabled = false;
        self.irq_pending = false;
        self.bank_select = 0;
        self.update_banks();
    }

    delegate_banks!();
}
