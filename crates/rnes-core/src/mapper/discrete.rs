//! Discrete-logic boards driven by a single latch written anywhere in $8000-$FFFF

use tracing::trace;

use super::{Banks, Mapper, Mirroring};

/// Shared CPU-space read path for latch boards
fn read_latch_board(banks: &Banks, address: u16) -> Option<u8> {
    match address {
        0x8000..=0xFFFF => Some(banks.read_prg_rom(address)),
        0x6000..=0x7FFF => banks.read_prg_ram(address),
        _ => None,
    }
}

/// Board 2: switchable 16 KiB at $8000, last bank fixed at $C000
#[derive(Debug, Clone)]
pub struct UxRom {
    banks: Banks,
    mirroring: Mirroring,
}

impl UxRom {
    pub fn new(mut banks: Banks, mirroring: Mirroring) -> Self {
        banks.set_prg_16k(0, 0);
        banks.set_prg_16k(1, -1);
        Self { banks, mirroring }
    }
}

impl Mapper for UxRom {
    fn read_prg(&self, address: u16) -> Option<u8> {
        read_latch_board(&self.banks, address)
    }

    fn write_prg(&mut self, address: u16, value: u8) {
        match address {
            0x8000..=0xFFFF => {
                trace!(bank = value, "uxrom prg select");
                self.banks.set_prg_16k(0, value as i32);
            }
            0x6000..=0x7FFF => self.banks.write_prg_ram(address, value),
            _ => {}
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    delegate_banks!();
}

/// Board 3: fixed PRG, switchable 8 KiB CHR
#[derive(Debug, Clone)]
pub struct CnRom {
    banks: Banks,
    mirroring: Mirroring,
}

impl CnRom {
    pub fn new(banks: Banks, mirroring: Mirroring) -> Self {
        Self { banks, mirroring }
    }
}

impl Mapper for CnRom {
    fn read_prg(&self, address: u16) -> Option<u8> {
        read_latch_board(&self.banks, address)
    }

    fn write_prg(&mut self, address: u16, value: u8) {
        match address {
            0x8000..=0xFFFF => self.banks.set_chr_8k(value as i32),
            0x6000..=0x7FFF => self.banks.write_prg_ram(address, value),
            _ => {}
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    delegate_banks!();
}

/// Board 7: 32 KiB PRG switching with single-screen mirroring select
#[derive(Debug, Clone)]
pub struct AxRom {
    banks: Banks,
    mirroring: Mirroring,
}

impl AxRom {
    pub fn new(banks: Banks) -> Self {
        Self {
            banks,
            mirroring: Mirroring::SingleScreenLower,
        }
    }
}

impl Mapper for AxRom {
    fn read_prg(&self, address: u16) -> Option<u8> {
        read_latch_board(&self.banks, address)
    }

    fn write_prg(&mut self, address: u16, value: u8) {
        if address >= 0x8000 {
            self.banks.set_prg_32k((value & 0x07) as i32);
            self.mirroring = if value & 0x10 != 0 {
                Mirroring::SingleScreenUpper
            } else {
                Mirroring::SingleScreenLower
            };
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn reset(&mut self) {
        self.banks.set_prg_32k(0);
        self.mirroring = Mirroring::SingleScreenLower;
    }

    delegate_banks!();
}

/// Board 11: PRG in bits 0-1, CHR in bits 4-7
#[derive(Debug, Clone)]
pub struct ColorDreams {
    banks: Banks,
    mirroring: Mirroring,
}

impl ColorDreams {
    pub fn new(banks: Banks, mirroring: Mirroring) -> Self {
        Self { banks, mirroring }
    }
}

impl Mapper for ColorDreams {
    fn read_prg(&self, address: u16) -> Option<u8> {
        read_latch_board(&self.banks, address)
    }

    fn write_prg(&mut self, address: u16, value: u8) {
        if address >= 0x8000 {
            self.banks.set_prg_32k((value & 0x03) as i32);
            self.banks.set_chr_8k((value >> 4) as i32);
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    delegate_banks!();
}

/// Board 34 (BNROM wiring): 32 KiB PRG switching, CHR RAM
#[derive(Debug, Clone)]
pub struct BnRom {
    banks: Banks,
    mirroring: Mirroring,
}

impl BnRom {
    pub fn new(banks: Banks, mirroring: Mirroring) -> Self {
        Self { banks, mirroring }
    }
}

impl Mapper for BnRom {
    fn read_prg(&self, address: u16) -> Option<u8> {
        read_latch_board(&self.banks, address)
    }

    fn write_prg(&mut self, address: u16, value: u8) {
        match address {
            0x8000..=0xFFFF => self.banks.set_prg_32k(value as i32),
            0x6000..=0x7FFF => self.banks.write_prg_ram(address, value),
            _ => {}
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    delegate_banks!();
}

/// Board 66: PRG in bits 4-5, CHR in bits 0-1
#[derive(Debug, Clone)]
pub struct GxRom {
    banks: Banks,
    mirroring: Mirroring,
}

impl GxRom {
    pub fn new(banks: Banks, mirroring: Mirroring) -> Self {
        Self { banks, mirroring }
    }
}

impl Mapper for GxRom {
    fn read_prg(&self, address: u16) -> Option<u8> {
        read_latch_board(&self.banks, address)
    }

    fn write_prg(&mut self, address: u16, value: u8) {
        if address >= 0x8000 {
            self.banks.set_prg_32k(((value >> 4) & 0x03) as i32);
            self.banks.set_chr_8k((value & 0x03) as i32);
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn reset(&mut self) {
        self.banks.set_prg_32k(0);
        self.banks.set_chr_8k(0);
    }

    delegate_banks!();
}
