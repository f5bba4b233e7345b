//! CPU memory bus
//!
//! The NES memory map:
//! $0000-$07FF - 2KB Internal RAM
//! $0800-$1FFF - RAM mirroring (repeats every $0800 bytes)
//! $2000-$2007 - PPU registers
//! $2008-$3FFF - PPU register mirroring (every 8 bytes)
//! $4000-$4017 - APU and I/O registers
//! $4018-$401F - Disabled test registers (open bus)
//! $4020-$FFFF - Cartridge space
//!
//! Every access is one CPU cycle. After the access the bus advances the
//! PPU by the region's dot ratio, then the APU, then the board's cycle hook,
//! so the whole console stays phase-locked to the CPU.

use crate::apu::Apu;
use crate::config::AudioConfig;
use crate::cpu::{CpuBus, DmaRequest, Interrupt};
use crate::input::{InputPorts, Port};
use crate::mapper::{EmptySlot, Mapper};
use crate::ppu::VideoUnit;
use crate::region::Region;

/// RAM size in bytes
pub const RAM_SIZE: usize = 2048; // 2KB

const WORK_RAM_SIZE: usize = 0x2000;

/// How $6000-$7FFF is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryProfile {
    /// The board decides
    #[default]
    Standard,
    /// Always plain RAM, ignoring board enables and write protection
    RamEnabled,
}

/// Console-side bus: RAM, PPU, APU, controller ports and the cartridge slot
#[derive(Debug)]
pub struct SystemBus {
    ram: [u8; RAM_SIZE],
    video: Box<dyn VideoUnit>,
    apu: Apu,
    mapper: Box<dyn Mapper>,
    input: InputPorts,
    profile: MemoryProfile,
    /// Backing for `RamEnabled` when the board has no work RAM
    work_ram: Vec<u8>,
    ppu_ratio: (u32, u32),
    ppu_remainder: u32,
    open_bus: u8,
    oam_dma: Option<u8>,
    cycles: u64,
}

impl SystemBus {
    /// Create a bus with an empty cartridge slot and no devices
    pub fn new(region: Region, video: Box<dyn VideoUnit>, audio: AudioConfig) -> Self {
        Self {
            ram: [0; RAM_SIZE],
            video,
            apu: Apu::new(region, audio),
            mapper: Box::new(EmptySlot),
            input: InputPorts::new(),
            profile: MemoryProfile::Standard,
            work_ram: vec![0; WORK_RAM_SIZE],
            ppu_ratio: region.ppu_ratio(),
            ppu_remainder: 0,
            open_bus: 0,
            oam_dma: None,
            cycles: 0,
        }
    }

    /// Switch TV system, replacing the picture unit and rebuilding the APU
    pub fn set_region(&mut self, region: Region, video: Box<dyn VideoUnit>) {
        self.video = video;
        self.apu = Apu::new(region, self.apu.settings().clone());
        self.ppu_ratio = region.ppu_ratio();
        self.ppu_remainder = 0;
    }

    pub fn set_memory_profile(&mut self, profile: MemoryProfile) {
        self.profile = profile;
    }

    pub fn memory_profile(&self) -> MemoryProfile {
        self.profile
    }

    /// Insert a board, returning the previous one
    pub fn insert_mapper(&mut self, mapper: Box<dyn Mapper>) -> Box<dyn Mapper> {
        std::mem::replace(&mut self.mapper, mapper)
    }

    /// Remove the board, leaving the slot empty
    pub fn remove_mapper(&mut self) -> Box<dyn Mapper> {
        self.insert_mapper(Box::new(EmptySlot))
    }

    /// Power-up state of everything the bus owns except the board
    pub fn power_on(&mut self) {
        self.ram = [0; RAM_SIZE];
        self.work_ram.fill(0);
        self.video.power_on();
        self.apu.power_on();
        self.ppu_remainder = 0;
        self.open_bus = 0;
        self.oam_dma = None;
        self.cycles = 0;
    }

    /// Console reset: RAM survives, chips take their reset state
    pub fn reset(&mut self) {
        self.video.reset();
        self.apu.reset();
        self.mapper.reset();
        self.oam_dma = None;
    }

    /// Read without side effects (no register reads, no clocking)
    pub fn peek(&self, address: u16) -> u8 {
        match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize],
            0x6000..=0x7FFF if self.profile == MemoryProfile::RamEnabled => self.read_work_ram(address),
            0x4020..=0xFFFF => self.mapper.read_prg(address).unwrap_or(self.open_bus),
            _ => self.open_bus,
        }
    }

    fn read_work_ram(&self, address: u16) -> u8 {
        let offset = (address & 0x1FFF) as usize;
        match self.mapper.prg_ram() {
            Some(ram) => ram[offset % ram.len()],
            None => self.work_ram[offset],
        }
    }

    fn write_work_ram(&mut self, address: u16, value: u8) {
        let offset = (address & 0x1FFF) as usize;
        match self.mapper.prg_ram_mut() {
            Some(ram) => {
                let len = ram.len();
                ram[offset % len] = value;
            }
            None => self.work_ram[offset] = value,
        }
    }

    fn read_port(&mut self, port: Port) -> u8 {
        let video = &self.video;
        let bits = self.input.read(port, |x, y| video.light_at(x, y));
        bits | (self.open_bus & 0xE0)
    }

    /// One CPU cycle worth of PPU, APU and board clocking
    fn clock(&mut self) {
        self.cycles += 1;
        let (dots, per) = self.ppu_ratio;
        self.ppu_remainder += dots;
        while self.ppu_remainder >= per {
            self.ppu_remainder -= per;
            self.video.tick(self.mapper.as_mut());
        }
        self.apu.tick();
        self.mapper.cpu_clock();
    }

    pub fn video(&self) -> &dyn VideoUnit {
        self.video.as_ref()
    }

    pub fn video_mut(&mut self) -> &mut dyn VideoUnit {
        self.video.as_mut()
    }

    pub fn apu(&self) -> &Apu {
        &self.apu
    }

    pub fn apu_mut(&mut self) -> &mut Apu {
        &mut self.apu
    }

    pub fn mapper(&self) -> &dyn Mapper {
        self.mapper.as_ref()
    }

    pub fn mapper_mut(&mut self) -> &mut dyn Mapper {
        self.mapper.as_mut()
    }

    pub fn input(&self) -> &InputPorts {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputPorts {
        &mut self.input
    }

    /// Internal RAM
    pub fn ram(&self) -> &[u8; RAM_SIZE] {
        &self.ram
    }

    /// CPU cycles clocked through the bus since power-on
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

impl CpuBus for SystemBus {
    fn read(&mut self, address: u16) -> u8 {
        let value = match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize],
            0x2000..=0x3FFF => self
                .video
                .read_register(0x2000 | (address & 0x0007), self.mapper.as_mut()),
            // $4015 does not drive bit 5
            0x4015 => (self.apu.read_status() & !0x20) | (self.open_bus & 0x20),
            0x4016 => self.read_port(Port::One),
            0x4017 => self.read_port(Port::Two),
            0x4000..=0x401F => self.open_bus,
            0x6000..=0x7FFF if self.profile == MemoryProfile::RamEnabled => self.read_work_ram(address),
            _ => self.mapper.read_prg(address).unwrap_or(self.open_bus),
        };
        if address != 0x4015 {
            self.open_bus = value;
        }
        self.clock();
        value
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize] = value,
            0x2000..=0x3FFF => {
                self.video
                    .write_register(0x2000 | (address & 0x0007), value, self.mapper.as_mut())
            }
            0x4014 => self.oam_dma = Some(value),
            0x4016 => self.input.write_strobe(value),
            0x4000..=0x4017 => self.apu.write(address, value),
            0x4018..=0x401F => {}
            0x6000..=0x7FFF if self.profile == MemoryProfile::RamEnabled => {
                self.write_work_ram(address, value)
            }
            _ => self.mapper.write_prg(address, value),
        }
        self.open_bus = value;
        self.clock();
    }

    fn interrupt_lines(&self) -> Interrupt {
        let mut lines = Interrupt::empty();
        lines.set(Interrupt::NMI, self.video.nmi_line());
        lines.set(Interrupt::IRQ_FRAME, self.apu.frame_irq());
        lines.set(Interrupt::IRQ_DMC, self.apu.dmc_irq());
        lines.set(Interrupt::IRQ_MAPPER, self.mapper.irq_pending());
        lines
    }

    fn take_dma_request(&mut self) -> Option<DmaRequest> {
        if let Some(page) = self.oam_dma.take() {
            return Some(DmaRequest::Oam { page });
        }
        self.apu
            .dmc_fetch_address()
            .map(|address| DmaRequest::Dmc { address })
    }

    fn complete_dmc_fetch(&mut self, value: u8) {
        self.apu.complete_dmc_fetch(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;
    use crate::input::{Buttons, DeviceInput, DeviceKind};
    use crate::ppu::{DisabledPpu, Ppu};
    use crate::testing::nrom_image;

    fn bus(region: Region) -> SystemBus {
        let mut bus = SystemBus::new(region, Box::new(Ppu::new(region)), AudioConfig::default());
        let (_, _, mapper) = Cartridge::from_rom(&nrom_image(&[0xEA], 0x8000))
            .unwrap()
            .into_parts();
        bus.insert_mapper(mapper);
        bus
    }

    #[test]
    fn test_ram_mirroring() {
        let mut bus = bus(Region::Ntsc);
        bus.write(0x0001, 0x42);
        assert_eq!(bus.read(0x0801), 0x42);
        assert_eq!(bus.read(0x1801), 0x42);
    }

    #[test]
    fn test_each_access_clocks_three_dots_on_ntsc() {
        let mut bus = bus(Region::Ntsc);
        bus.read(0x0000);
        bus.read(0x0000);
        assert_eq!(bus.video().dot(), 6);
        assert_eq!(bus.cycles(), 2);
    }

    #[test]
    fn test_pal_clocks_sixteen_dots_per_five_cycles() {
        let mut bus = bus(Region::Pal);
        for _ in 0..5 {
            bus.read(0x0000);
        }
        assert_eq!(bus.video().dot(), 16);
    }

    #[test]
    fn test_unmapped_reads_return_open_bus() {
        let mut bus = bus(Region::Ntsc);
        bus.write(0x0000, 0x5A);
        bus.read(0x0000);
        assert_eq!(bus.read(0x4018), 0x5A);
        assert_eq!(bus.read(0x5000), 0x5A);
    }

    #[test]
    fn test_controller_read_keeps_upper_open_bus_bits() {
        let mut bus = bus(Region::Ntsc);
        bus.input_mut().set_device(1, Some(DeviceKind::Joypad)).unwrap();
        bus.input_mut().update(1, DeviceInput::Buttons(Buttons::A)).unwrap();
        bus.write(0x4016, 1);
        bus.write(0x4016, 0);
        // last bus value was the $4016 write of 0, so the upper bits are clear
        assert_eq!(bus.read(0x4016), 0x01);
        bus.write(0x0000, 0x40);
        bus.read(0x0000);
        assert_eq!(bus.read(0x4016), 0x40);
    }

    #[test]
    fn test_oam_dma_request() {
        let mut bus = bus(Region::Ntsc);
        assert_eq!(bus.take_dma_request(), None);
        bus.write(0x4014, 0x02);
        assert_eq!(bus.take_dma_request(), Some(DmaRequest::Oam { page: 0x02 }));
        assert_eq!(bus.take_dma_request(), None);
    }

    #[test]
    fn test_nmi_line_reported() {
        let mut bus = bus(Region::Ntsc);
        bus.write(0x2000, 0x80);
        while bus.video().scanline() != 241 || bus.video().dot() < 2 {
            bus.read(0x0000);
        }
        assert!(bus.interrupt_lines().contains(Interrupt::NMI));
    }

    #[test]
    fn test_ram_enabled_profile() {
        let video = Box::new(DisabledPpu::new(Region::Ntsc));
        let mut bus = SystemBus::new(Region::Ntsc, video, AudioConfig::default());
        bus.write(0x6000, 0x11);
        bus.read(0x0000);
        assert_eq!(bus.read(0x6000), 0x00);
        bus.set_memory_profile(MemoryProfile::RamEnabled);
        bus.write(0x6000, 0x11);
        assert_eq!(bus.read(0x6000), 0x11);
        assert_eq!(bus.peek(0x6000), 0x11);
    }
}
