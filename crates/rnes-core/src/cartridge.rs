//! Cartridge loading
//!
//! Parses iNES (and NES 2.0) images and hands the PRG/CHR data to the board
//! selected by the header's mapper number.

use thiserror::Error;
use tracing::{info, warn};

use crate::mapper::{self, Mapper, Mirroring};
use crate::region::Region;

/// iNES header size
pub const HEADER_SIZE: usize = 16;

/// Trainer size when flags 6 bit 2 is set
pub const TRAINER_SIZE: usize = 512;

const PRG_ROM_UNIT: usize = 16 * 1024;
const CHR_ROM_UNIT: usize = 8 * 1024;

/// Cartridge loading errors
#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("invalid ROM header: {0}")]
    InvalidRomHeader(String),
    #[error("unsupported mapper {mapper}")]
    UnsupportedMapper { mapper: u16 },
}

/// iNES header structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InesHeader {
    /// PRG ROM size in 16KB units
    pub prg_rom_size: u16,
    /// CHR ROM size in 8KB units
    pub chr_rom_size: u16,
    /// Flags 6
    pub flags_6: u8,
    /// Flags 7
    pub flags_7: u8,
    /// Byte 8 (PRG RAM size for iNES, mapper MSB / submapper for NES 2.0)
    pub byte_8: u8,
    /// Byte 9
    pub byte_9: u8,
    /// Byte 10
    pub byte_10: u8,
    /// Byte 11 (NES 2.0 CHR RAM size)
    pub byte_11: u8,
    /// Byte 12 (NES 2.0 timing)
    pub byte_12: u8,
}

impl InesHeader {
    /// Parse an iNES header from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, CartridgeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CartridgeError::InvalidRomHeader(format!(
                "image is {} bytes, shorter than the header",
                bytes.len()
            )));
        }
        if bytes[0..4] != [b'N', b'E', b'S', 0x1A] {
            return Err(CartridgeError::InvalidRomHeader("missing NES<EOF> magic".into()));
        }

        let nes2 = bytes[7] & 0x0C == 0x08;
        let mut flags_7 = bytes[7];
        if !nes2 && bytes[12..16].iter().any(|&b| b != 0) {
            // Old dumps carry text such as "DiskDude!" in bytes 7-15
            warn!("garbage in header tail, ignoring flags 7");
            flags_7 = 0;
        }

        let (prg_rom_size, chr_rom_size) = if nes2 {
            (
                bytes[4] as u16 | ((bytes[9] as u16 & 0x0F) << 8),
                bytes[5] as u16 | ((bytes[9] as u16 & 0xF0) << 4),
            )
        } else {
            (bytes[4] as u16, bytes[5] as u16)
        };

        Ok(Self {
            prg_rom_size,
            chr_rom_size,
            flags_6: bytes[6],
            flags_7,
            byte_8: bytes[8],
            byte_9: bytes[9],
            byte_10: bytes[10],
            byte_11: bytes[11],
            byte_12: bytes[12],
        })
    }

    /// Whether the header uses the NES 2.0 layout
    pub fn is_nes2(&self) -> bool {
        self.flags_7 & 0x0C == 0x08
    }

    /// Get the mapper number from flags
    pub fn mapper_number(&self) -> u16 {
        let low = ((self.flags_6 >> 4) | (self.flags_7 & 0xF0)) as u16;
        if self.is_nes2() {
            low | ((self.byte_8 as u16 & 0x0F) << 8)
        } else {
            low
        }
    }

    /// NES 2.0 submapper, 0 otherwise
    pub fn submapper(&self) -> u8 {
        if self.is_nes2() {
            self.byte_8 >> 4
        } else {
            0
        }
    }

    /// Check if trainer is present
    pub fn has_trainer(&self) -> bool {
        (self.flags_6 & 0x04) != 0
    }

    /// Check if battery-backed RAM is present
    pub fn has_battery(&self) -> bool {
        (self.flags_6 & 0x02) != 0
    }

    /// Nametable arrangement wired on the board
    pub fn mirroring(&self) -> Mirroring {
        if self.flags_6 & 0x08 != 0 {
            Mirroring::FourScreen
        } else if self.flags_6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        }
    }

    /// PRG ROM length in bytes
    pub fn prg_rom_bytes(&self) -> usize {
        self.prg_rom_size as usize * PRG_ROM_UNIT
    }

    /// CHR ROM length in bytes
    pub fn chr_rom_bytes(&self) -> usize {
        self.chr_rom_size as usize * CHR_ROM_UNIT
    }

    /// Work RAM size in bytes; at least 8 KiB unless a NES 2.0 header says otherwise
    pub fn prg_ram_size(&self) -> usize {
        if self.is_nes2() {
            let volatile = shift_size(self.byte_10 & 0x0F);
            let battery = shift_size(self.byte_10 >> 4);
            volatile.max(battery)
        } else {
            (self.byte_8 as usize).max(1) * 8 * 1024
        }
    }

    /// CHR RAM size in bytes when no CHR ROM is present
    pub fn chr_ram_size(&self) -> usize {
        if self.is_nes2() {
            match shift_size(self.byte_11 & 0x0F) {
                0 => 8 * 1024,
                size => size,
            }
        } else {
            8 * 1024
        }
    }

    /// TV system declared by the header, if any
    pub fn region_hint(&self) -> Option<Region> {
        let pal = if self.is_nes2() {
            self.byte_12 & 0x03 == 1
        } else {
            self.byte_9 & 0x01 != 0
        };
        pal.then_some(Region::Pal)
    }
}

fn shift_size(shift: u8) -> usize {
    if shift == 0 {
        0
    } else {
        64 << shift
    }
}

/// Cartridge structure
#[derive(Debug)]
pub struct Cartridge {
    header: InesHeader,
    id: String,
    mapper: Box<dyn Mapper>,
}

impl Cartridge {
    /// Create a new cartridge from iNES ROM data
    pub fn from_rom(rom_data: &[u8]) -> Result<Self, CartridgeError> {
        let header = InesHeader::parse(rom_data)?;
        if header.prg_rom_size == 0 {
            return Err(CartridgeError::InvalidRomHeader("no PRG ROM declared".into()));
        }

        let mut offset = HEADER_SIZE;
        if header.has_trainer() {
            offset += TRAINER_SIZE;
        }

        let prg_end = offset + header.prg_rom_bytes();
        let chr_end = prg_end + header.chr_rom_bytes();
        if rom_data.len() < chr_end {
            return Err(CartridgeError::InvalidRomHeader(format!(
                "header declares {} bytes of ROM data, image holds {}",
                chr_end - HEADER_SIZE,
                rom_data.len().saturating_sub(HEADER_SIZE)
            )));
        }

        let prg_rom = rom_data[offset..prg_end].to_vec();
        let chr_rom = rom_data[prg_end..chr_end].to_vec();
        let id = format!("{:08x}", crc32fast::hash(&rom_data[offset..chr_end]));
        let mapper = mapper::create_mapper(&header, prg_rom, chr_rom)?;

        info!(
            mapper = header.mapper_number(),
            prg_kib = header.prg_rom_bytes() / 1024,
            chr_kib = header.chr_rom_bytes() / 1024,
            battery = header.has_battery(),
            %id,
            "cartridge loaded"
        );

        Ok(Self { header, id, mapper })
    }

    /// Get the iNES header
    pub fn header(&self) -> &InesHeader {
        &self.header
    }

    /// Stable identifier (CRC-32 of PRG+CHR) used as the battery RAM key
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the board
    pub fn mapper(&self) -> &dyn Mapper {
        self.mapper.as_ref()
    }

    /// Split into header, identifier and board
    pub fn into_parts(self) -> (InesHeader, String, Box<dyn Mapper>) {
        (self.header, self.id, self.mapper)
    }
}
