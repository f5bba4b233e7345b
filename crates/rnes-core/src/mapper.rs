//! Cartridge boards
//!
//! Every board implements [`Mapper`]. The board is chosen once, from the
//! iNES mapper number, when a cartridge is loaded and is afterwards reached
//! only through the trait object held by the bus.
//!
//! Most boards are thin register front-ends over [`Banks`], which keeps the
//! ROM/RAM images and the currently selected 8 KiB PRG and 1 KiB CHR windows.

use std::fmt;

use tracing::debug;

use crate::cartridge::{CartridgeError, InesHeader};

/// Forward the CHR and work-RAM accessors of a board to its `banks` field
macro_rules! delegate_banks {
    () => {
        fn read_chr(&self, address: u16) -> u8 {
            self.banks.read_chr(address)
        }

        fn write_chr(&mut self, address: u16, value: u8) {
            self.banks.write_chr(address, value);
        }

        fn prg_ram(&self) -> Option<&[u8]> {
            self.banks.prg_ram()
        }

        fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
            self.banks.prg_ram_mut()
        }

        fn has_battery(&self) -> bool {
            self.banks.has_battery()
        }
    };
}

mod discrete;
mod mmc1;
mod mmc3;
mod nrom;

pub use discrete::{AxRom, BnRom, CnRom, ColorDreams, GxRom, UxRom};
pub use mmc1::Mmc1;
pub use mmc3::Mmc3;
pub use nrom::Nrom;

/// Nametable arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    SingleScreenLower,
    SingleScreenUpper,
    FourScreen,
}

impl Mirroring {
    /// Map a PPU address in $2000-$3EFF to an offset into 4 KiB of nametable RAM
    pub fn nametable_offset(self, address: u16) -> usize {
        let address = (address & 0x0FFF) as usize;
        let table = address / 0x400;
        let offset = address % 0x400;
        let physical = match self {
            Mirroring::Horizontal => table / 2,
            Mirroring::Vertical => table % 2,
            Mirroring::SingleScreenLower => 0,
            Mirroring::SingleScreenUpper => 1,
            Mirroring::FourScreen => table,
        };
        physical * 0x400 + offset
    }
}

/// Cartridge board interface
///
/// PRG accesses cover CPU $4020-$FFFF, CHR accesses cover PPU $0000-$1FFF.
pub trait Mapper: fmt::Debug + Send {
    /// Read from CPU space; `None` leaves the open bus value in place
    fn read_prg(&self, address: u16) -> Option<u8>;

    /// Write to CPU space (registers or PRG RAM)
    fn write_prg(&mut self, address: u16, value: u8);

    /// Read from pattern table space
    fn read_chr(&self, address: u16) -> u8;

    /// Write to pattern table space (ignored for CHR ROM)
    fn write_chr(&mut self, address: u16, value: u8);

    /// Current nametable arrangement
    fn mirroring(&self) -> Mirroring;

    /// Observe an address driven on the PPU bus
    fn on_ppu_address(&mut self, _address: u16) {}

    /// Called once per CPU cycle
    fn cpu_clock(&mut self) {}

    /// Level of the board's IRQ line
    fn irq_pending(&self) -> bool {
        false
    }

    /// Console reset or power cycle; work RAM is kept
    fn reset(&mut self) {}

    /// Work RAM mapped at $6000-$7FFF, if any
    fn prg_ram(&self) -> Option<&[u8]>;

    /// Mutable work RAM, bypassing any board write protection
    fn prg_ram_mut(&mut self) -> Option<&mut [u8]>;

    /// Whether the work RAM is battery backed
    fn has_battery(&self) -> bool;
}

/// Nothing in the cartridge slot: PRG reads float, CHR reads as zero
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySlot;

impl Mapper for EmptySlot {
    fn read_prg(&self, _address: u16) -> Option<u8> {
        None
    }

    fn write_prg(&mut self, _address: u16, _value: u8) {}

    fn read_chr(&self, _address: u16) -> u8 {
        0
    }

    fn write_chr(&mut self, _address: u16, _value: u8) {}

    fn mirroring(&self) -> Mirroring {
        Mirroring::Horizontal
    }

    fn prg_ram(&self) -> Option<&[u8]> {
        None
    }

    fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn has_battery(&self) -> bool {
        false
    }
}

/// Build the board for a parsed header
pub fn create_mapper(
    header: &InesHeader,
    prg_rom: Vec<u8>,
    chr_rom: Vec<u8>,
) -> Result<Box<dyn Mapper>, CartridgeError> {
    let banks = Banks::new(header, prg_rom, chr_rom);
    let mirroring = header.mirroring();
    let mapper: Box<dyn Mapper> = match header.mapper_number() {
        0 => Box::new(Nrom::new(banks, mirroring)),
        1 => Box::new(Mmc1::new(banks)),
        2 => Box::new(UxRom::new(banks, mirroring)),
        3 => Box::new(CnRom::new(banks, mirroring)),
        4 => Box::new(Mmc3::new(banks, mirroring)),
        7 => Box::new(AxRom::new(banks)),
        11 => Box::new(ColorDreams::new(banks, mirroring)),
        34 => Box::new(BnRom::new(banks, mirroring)),
        66 => Box::new(GxRom::new(banks, mirroring)),
        mapper => return Err(CartridgeError::UnsupportedMapper { mapper }),
    };
    debug!(?mapper, "board created");
    Ok(mapper)
}

/// ROM/RAM images plus the current bank windows
#[derive(Clone)]
pub struct Banks {
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_writable: bool,
    prg_ram: Vec<u8>,
    battery: bool,
    /// Byte offsets of the four 8 KiB windows at $8000/$A000/$C000/$E000
    prg_slots: [usize; 4],
    /// Byte offsets of the eight 1 KiB pattern windows
    chr_slots: [usize; 8],
}

const PRG_WINDOW: usize = 0x2000;
const CHR_WINDOW: usize = 0x0400;

impl Banks {
    /// Wrap the cartridge images; CHR RAM is allocated when the header declares no CHR ROM
    pub fn new(header: &InesHeader, prg_rom: Vec<u8>, chr_rom: Vec<u8>) -> Self {
        let chr_writable = chr_rom.is_empty();
        let chr = if chr_writable {
            vec![0; header.chr_ram_size()]
        } else {
            chr_rom
        };
        let mut banks = Self {
            prg_rom,
            chr,
            chr_writable,
            prg_ram: vec![0; header.prg_ram_size()],
            battery: header.has_battery(),
            prg_slots: [0; 4],
            chr_slots: [0; 8],
        };
        banks.set_prg_32k(0);
        banks.set_chr_8k(0);
        banks
    }

    fn map(slots: &mut [usize], window: usize, total: usize, first: usize, count: usize, bank: i32) {
        if total == 0 {
            return;
        }
        let bank_size = window * count;
        let bank_count = (total / bank_size).max(1) as i32;
        let base = bank.rem_euclid(bank_count) as usize * bank_size;
        for (i, slot) in slots[first..first + count].iter_mut().enumerate() {
            *slot = (base + i * window) % total;
        }
    }

    /// Select an 8 KiB PRG bank into window `slot` (0-3); negative banks count from the end
    pub fn set_prg_8k(&mut self, slot: usize, bank: i32) {
        Self::map(&mut self.prg_slots, PRG_WINDOW, self.prg_rom.len(), slot, 1, bank);
    }

    /// Select a 16 KiB PRG bank into half `slot` (0 = $8000, 1 = $C000)
    pub fn set_prg_16k(&mut self, slot: usize, bank: i32) {
        Self::map(&mut self.prg_slots, PRG_WINDOW, self.prg_rom.len(), slot * 2, 2, bank);
    }

    /// Select a 32 KiB PRG bank
    pub fn set_prg_32k(&mut self, bank: i32) {
        Self::map(&mut self.prg_slots, PRG_WINDOW, self.prg_rom.len(), 0, 4, bank);
    }

    /// Select a 1 KiB CHR bank into window `slot` (0-7)
    pub fn set_chr_1k(&mut self, slot: usize, bank: i32) {
        Self::map(&mut self.chr_slots, CHR_WINDOW, self.chr.len(), slot, 1, bank);
    }

    /// Select a 2 KiB CHR bank into window `slot` (0-3)
    pub fn set_chr_2k(&mut self, slot: usize, bank: i32) {
        Self::map(&mut self.chr_slots, CHR_WINDOW, self.chr.len(), slot * 2, 2, bank);
    }

    /// Select a 4 KiB CHR bank into half `slot` (0-1)
    pub fn set_chr_4k(&mut self, slot: usize, bank: i32) {
        Self::map(&mut self.chr_slots, CHR_WINDOW, self.chr.len(), slot * 4, 4, bank);
    }

    /// Select an 8 KiB CHR bank
    pub fn set_chr_8k(&mut self, bank: i32) {
        Self::map(&mut self.chr_slots, CHR_WINDOW, self.chr.len(), 0, 8, bank);
    }

    /// Number of 16 KiB PRG banks
    pub fn prg_banks_16k(&self) -> usize {
        self.prg_rom.len() / 0x4000
    }

    /// Read PRG ROM through the current windows ($8000-$FFFF)
    pub fn read_prg_rom(&self, address: u16) -> u8 {
        let window = ((address - 0x8000) as usize) / PRG_WINDOW;
        let offset = address as usize & (PRG_WINDOW - 1);
        self.prg_rom
            .get(self.prg_slots[window] + offset)
            .copied()
            .unwrap_or(0)
    }

    /// Read work RAM ($6000-$7FFF); `None` when the board has none
    pub fn read_prg_ram(&self, address: u16) -> Option<u8> {
        if self.prg_ram.is_empty() {
            return None;
        }
        let index = (address as usize - 0x6000) % self.prg_ram.len();
        Some(self.prg_ram[index])
    }

    /// Write work RAM ($6000-$7FFF)
    pub fn write_prg_ram(&mut self, address: u16, value: u8) {
        if self.prg_ram.is_empty() {
            return;
        }
        let index = (address as usize - 0x6000) % self.prg_ram.len();
        self.prg_ram[index] = value;
    }

    /// Read pattern data through the current windows
    pub fn read_chr(&self, address: u16) -> u8 {
        let address = (address & 0x1FFF) as usize;
        let offset = self.chr_slots[address / CHR_WINDOW] + address % CHR_WINDOW;
        self.chr.get(offset).copied().unwrap_or(0)
    }

    /// Write pattern data when the board carries CHR RAM
    pub fn write_chr(&mut self, address: u16, value: u8) {
        if !self.chr_writable {
            return;
        }
        let address = (address & 0x1FFF) as usize;
        let offset = self.chr_slots[address / CHR_WINDOW] + address % CHR_WINDOW;
        if let Some(byte) = self.chr.get_mut(offset) {
            *byte = value;
        }
    }

    /// Work RAM contents
    pub fn prg_ram(&self) -> Option<&[u8]> {
        (!self.prg_ram.is_empty()).then_some(self.prg_ram.as_slice())
    }

    /// Mutable work RAM contents
    pub fn prg_ram_mut(&mut self) -> Option<&mut [u8]> {
        (!self.prg_ram.is_empty()).then_some(self.prg_ram.as_mut_slice())
    }

    /// Whether the work RAM is battery backed
    pub fn has_battery(&self) -> bool {
        self.battery
    }
}

impl fmt::Debug for Banks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Banks")
            .field("prg_rom", &self.prg_rom.len())
            .field("chr", &self.chr.len())
            .field("chr_writable", &self.chr_writable)
            .field("prg_ram", &self.prg_ram.len())
            .field("prg_slots", &self.prg_slots)
            .field("chr_slots", &self.chr_slots)
            .finish()
    }
}
