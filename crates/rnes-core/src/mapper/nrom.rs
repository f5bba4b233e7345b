//! Board 0: fixed 16/32 KiB PRG and 8 KiB CHR

use super::{Banks, Mapper, Mirroring};

/// NROM
#[derive(Debug, Clone)]
pub struct Nrom {
    banks: Banks,
    mirroring: Mirroring,
}

impl Nrom {
    pub fn new(banks: Banks, mirroring: Mirroring) -> Self {
        Self { banks, mirroring }
    }
}

impl Mapper for Nrom {
    fn read_prg(&self, address: u16) -> Option<u8> {
        match address {
            0x8000..=0xFFFF => Some(self.banks.read_prg_rom(address)),
            0x6000..=0x7FFF => self.banks.read_prg_ram(address),
            _ => None,
        }
    }

    fn write_prg(&mut self, address: u16, value: u8) {
        if let 0x6000..=0x7FFF = address {
            self.banks.write_prg_ram(address, value);
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    delegate_banks!();
}
