//! NES System Integration
//!
//! [`Nes`] owns the CPU and the [`SystemBus`] (which in turn owns PPU, APU,
//! controller ports and the cartridge board) and drives them one CPU cycle
//! at a time. Hosts call [`Nes::run_frame`] once per video frame.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{MemoryProfile, SystemBus};
use crate::cartridge::{Cartridge, CartridgeError, InesHeader};
use crate::config::Config;
use crate::cpu::{Cpu, CpuError};
use crate::input::{Device, DeviceInput, DeviceKind, InputError, Port};
use crate::ppu::{Ppu, VideoUnit};
use crate::region::Region;
use crate::storage::{RamKind, Storage, StorageError};
use crate::testing::{self, ResultStatus, TestOutcome};

/// Console errors
#[derive(Debug, Error)]
pub enum NesError {
    #[error(transparent)]
    Cartridge(#[from] CartridgeError),
    #[error(transparent)]
    Cpu(#[from] CpuError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no cartridge loaded")]
    NoCartridge,
    #[error("no test result after {frames} frames")]
    TestTimeout { frames: u32 },
}

/// Receives each completed frame (palette indices) and the audio produced with it
pub type FrameCallback = Box<dyn FnMut(&[u8], &[f32]) + Send>;

/// Builds the picture unit for a region
pub type VideoFactory = Box<dyn Fn(Region) -> Box<dyn VideoUnit> + Send>;

#[derive(Debug)]
struct LoadedCartridge {
    header: InesHeader,
    id: String,
}

/// Builder for [`Nes`]
pub struct NesBuilder {
    config: Config,
    video: VideoFactory,
    profile: MemoryProfile,
}

impl NesBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            video: Box::new(|region| Box::new(Ppu::new(region))),
            profile: MemoryProfile::Standard,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Substitute the picture unit, e.g. with [`crate::ppu::DisabledPpu`]
    pub fn video<F>(mut self, factory: F) -> Self
    where
        F: Fn(Region) -> Box<dyn VideoUnit> + Send + 'static,
    {
        self.video = Box::new(factory);
        self
    }

    pub fn memory_profile(mut self, profile: MemoryProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn build(self) -> Nes {
        let region = self.config.region.resolve(None);
        let mut bus = SystemBus::new(region, (self.video)(region), self.config.audio.clone());
        bus.set_memory_profile(self.profile);
        bus.input_mut().plug(Port::One, self.config.devices.port1);
        bus.input_mut().plug(Port::Two, self.config.devices.port2);

        let mut cpu = Cpu::new();
        cpu.set_strict(self.config.strict_opcodes);

        Nes {
            config: self.config,
            region,
            cpu,
            bus,
            video_factory: self.video,
            cartridge: None,
            frame_callback: None,
            samples: Vec::new(),
            frames: 0,
        }
    }
}

impl Default for NesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The console
pub struct Nes {
    config: Config,
    region: Region,
    cpu: Cpu,
    bus: SystemBus,
    video_factory: VideoFactory,
    cartridge: Option<LoadedCartridge>,
    frame_callback: Option<FrameCallback>,
    samples: Vec<f32>,
    frames: u64,
}

impl Nes {
    /// Create a console with the standard PPU
    pub fn new(config: Config) -> Self {
        NesBuilder::new().config(config).build()
    }

    pub fn builder() -> NesBuilder {
        NesBuilder::new()
    }

    /// Load an iNES image and power the console on
    pub fn load_cartridge(&mut self, image: &[u8]) -> Result<(), NesError> {
        let (header, id, mapper) = Cartridge::from_rom(image)?.into_parts();
        let region = self.config.region.resolve(header.region_hint());
        self.switch_region(region);
        self.bus.insert_mapper(mapper);
        self.cartridge = Some(LoadedCartridge { header, id });
        self.power_on();
        Ok(())
    }

    /// Remove the cartridge; the slot reads as open bus afterwards
    pub fn eject_cartridge(&mut self) {
        if let Some(cartridge) = self.cartridge.take() {
            info!(id = %cartridge.id, "cartridge ejected");
        }
        self.bus.remove_mapper();
    }

    fn switch_region(&mut self, region: Region) {
        if region != self.region {
            info!(?region, "switching region");
            self.region = region;
            self.bus.set_region(region, (self.video_factory)(region));
        }
    }

    /// Power cycle: internal RAM cleared, every chip in power-up state
    pub fn power_on(&mut self) {
        self.bus.power_on();
        self.bus.mapper_mut().reset();
        self.cpu = Cpu::new();
        self.cpu.set_strict(self.config.strict_opcodes);
        self.cpu.power_on(&mut self.bus);
        self.samples.clear();
        self.frames = 0;
        info!(region = ?self.region, "power on");
    }

    /// Press the reset button
    pub fn reset(&mut self) {
        self.bus.reset();
        self.cpu.reset(&mut self.bus);
        info!("reset");
    }

    /// Execute a single instruction, returning the cycles it took
    pub fn step(&mut self) -> Result<u32, NesError> {
        if self.cartridge.is_none() {
            return Err(NesError::NoCartridge);
        }
        Ok(self.cpu.step(&mut self.bus)?)
    }

    /// Run until the PPU finishes the visible part of a frame
    ///
    /// The frame and its audio go to the frame callback when one is set;
    /// otherwise the samples are kept for [`Nes::take_audio_samples`].
    pub fn run_frame(&mut self) -> Result<(), NesError> {
        if self.cartridge.is_none() {
            return Err(NesError::NoCartridge);
        }
        loop {
            self.cpu.step(&mut self.bus)?;
            if self.bus.video_mut().take_frame_complete() {
                break;
            }
        }
        self.frames += 1;

        let samples = self.bus.apu_mut().take_samples();
        match self.frame_callback.as_mut() {
            Some(callback) => callback(self.bus.video().frame_buffer(), &samples),
            None => self.samples.extend_from_slice(&samples),
        }
        Ok(())
    }

    pub fn set_frame_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&[u8], &[f32]) + Send + 'static,
    {
        self.frame_callback = Some(Box::new(callback));
    }

    pub fn clear_frame_callback(&mut self) {
        self.frame_callback = None;
    }

    /// Last rendered frame as palette indices, see [`crate::palette`]
    pub fn frame_buffer(&self) -> &[u8] {
        self.bus.video().frame_buffer()
    }

    /// Audio produced since the last call (when no frame callback is set)
    pub fn take_audio_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    /// Plug a device into port 1 or 2, or unplug it with `None`
    pub fn set_device(&mut self, port: u8, kind: Option<DeviceKind>) -> Result<(), NesError> {
        Ok(self.bus.input_mut().set_device(port, kind)?)
    }

    pub fn device(&self, port: u8) -> Result<Option<DeviceKind>, NesError> {
        Ok(self.bus.input().device(port)?)
    }

    pub fn input_device(&self, port: u8) -> Result<Option<&Device>, NesError> {
        Ok(self.bus.input().input_device(port)?)
    }

    pub fn update_input(&mut self, port: u8, input: DeviceInput) -> Result<(), NesError> {
        Ok(self.bus.input_mut().update(port, input)?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Apply new settings
    ///
    /// Ports whose device kind is unchanged keep their device state. A region
    /// change power-cycles the console.
    pub fn apply_config(&mut self, config: Config) {
        self.cpu.set_strict(config.strict_opcodes);
        self.bus.apu_mut().set_settings(config.audio.clone());

        for (port, kind) in [(Port::One, config.devices.port1), (Port::Two, config.devices.port2)] {
            let index = if port == Port::One { 1 } else { 2 };
            if self.bus.input().device(index).ok().flatten() != kind {
                self.bus.input_mut().plug(port, kind);
            }
        }

        let hint = self.cartridge.as_ref().and_then(|c| c.header.region_hint());
        let region = config.region.resolve(hint);
        self.config = config;
        if region != self.region {
            self.switch_region(region);
            if self.cartridge.is_some() {
                self.power_on();
            }
        }
        debug!(config = ?self.config, "configuration applied");
    }

    /// Fill battery-backed work RAM from storage; returns whether a save was found
    pub fn load_battery_ram(&mut self, storage: &dyn Storage) -> Result<bool, NesError> {
        let id = self.cartridge_id().ok_or(NesError::NoCartridge)?.to_string();
        if !self.bus.mapper().has_battery() {
            return Ok(false);
        }
        let Some(ram) = self.bus.mapper_mut().prg_ram_mut() else {
            return Ok(false);
        };
        let found = storage.read_ram(RamKind::Battery, &id, ram)?;
        if found {
            info!(%id, "battery RAM restored");
        } else {
            warn!(%id, "no stored battery RAM");
        }
        Ok(found)
    }

    /// Write battery-backed work RAM to storage; returns whether anything was written
    pub fn save_battery_ram(&self, storage: &mut dyn Storage) -> Result<bool, NesError> {
        let id = self.cartridge_id().ok_or(NesError::NoCartridge)?;
        let mapper = self.bus.mapper();
        match mapper.prg_ram() {
            Some(ram) if mapper.has_battery() => {
                storage.write_ram(RamKind::Battery, id, ram)?;
                debug!(%id, bytes = ram.len(), "battery RAM saved");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Run a result-protocol test ROM until it reports, pressing reset when asked
    pub fn run_until_result(&mut self, max_frames: u32) -> Result<TestOutcome, NesError> {
        // The ROM wants at least 100 ms between the request and the reset
        let reset_delay = (self.region.frame_rate() / 10.0).ceil() as u32;
        let mut reset_due = None;
        for frame in 0..max_frames {
            self.run_frame()?;
            match testing::result_status(|address| self.bus.peek(address)) {
                ResultStatus::Done(outcome) => {
                    info!(code = outcome.code, message = %outcome.message, frame, "test finished");
                    return Ok(outcome);
                }
                ResultStatus::ResetRequested => {
                    let due = *reset_due.get_or_insert(frame + reset_delay);
                    if frame >= due {
                        debug!(frame, "test requested reset");
                        self.reset();
                        reset_due = None;
                    }
                }
                ResultStatus::Running | ResultStatus::Absent => {}
            }
        }
        Err(NesError::TestTimeout { frames: max_frames })
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &SystemBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut SystemBus {
        &mut self.bus
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// CRC-32 identifier of the loaded cartridge
    pub fn cartridge_id(&self) -> Option<&str> {
        self.cartridge.as_ref().map(|c| c.id.as_str())
    }

    pub fn cartridge_header(&self) -> Option<&InesHeader> {
        self.cartridge.as_ref().map(|c| &c.header)
    }

    /// Frames completed since power-on
    pub fn frame_count(&self) -> u64 {
        self.frames
    }
}

impl Default for Nes {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl fmt::Debug for Nes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nes")
            .field("region", &self.region)
            .field("cpu", &self.cpu)
            .field("cartridge", &self.cartridge)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppu::DisabledPpu;
    use crate::region::RegionSetting;
    use crate::storage::MemoryStorage;
    use crate::testing::nrom_image;

    // JMP $8000
    const SPIN: [u8; 3] = [0x4C, 0x00, 0x80];

    fn console() -> Nes {
        let mut nes = Nes::default();
        nes.load_cartridge(&nrom_image(&SPIN, 0x8000)).unwrap();
        nes
    }

    #[test]
    fn test_run_frame_requires_cartridge() {
        let mut nes = Nes::default();
        assert!(matches!(nes.run_frame(), Err(NesError::NoCartridge)));
    }

    #[test]
    fn test_frames_are_about_29780_cycles() {
        let mut nes = console();
        nes.run_frame().unwrap();
        let first = nes.cpu().cycles();
        nes.run_frame().unwrap();
        let frame = nes.cpu().cycles() - first;
        assert!((29776..=29786).contains(&frame), "{frame}");
    }

    #[test]
    fn test_callback_receives_frame_and_audio() {
        let mut nes = console();
        let (tx, rx) = std::sync::mpsc::channel();
        nes.set_frame_callback(move |frame, samples| {
            tx.send((frame.len(), samples.len())).unwrap();
        });
        nes.run_frame().unwrap();
        nes.run_frame().unwrap();
        let (pixels, samples) = rx.try_iter().last().unwrap();
        assert_eq!(pixels, 256 * 240);
        assert!((730..=740).contains(&samples), "{samples}");
        assert!(nes.take_audio_samples().is_empty());
    }

    #[test]
    fn test_power_on_discards_pending_audio() {
        let mut nes = console();
        nes.run_frame().unwrap();
        for _ in 0..1000 {
            nes.step().unwrap();
        }
        assert!(!nes.bus().apu().samples().is_empty());

        nes.power_on();
        assert!(nes.bus().apu().samples().is_empty());
        assert!(nes.take_audio_samples().is_empty());
    }

    #[test]
    fn test_header_hint_selects_pal() {
        let mut image = nrom_image(&SPIN, 0x8000);
        image[9] = 0x01;
        let mut nes = Nes::default();
        nes.load_cartridge(&image).unwrap();
        assert_eq!(nes.region(), Region::Pal);

        let config = Config { region: RegionSetting::Ntsc, ..Config::default() };
        nes.apply_config(config);
        assert_eq!(nes.region(), Region::Ntsc);
    }

    #[test]
    fn test_default_devices_and_config_update() {
        let mut nes = console();
        assert_eq!(nes.device(1).unwrap(), Some(DeviceKind::Joypad));
        assert_eq!(nes.device(2).unwrap(), Some(DeviceKind::Zapper));
        nes.update_input(2, DeviceInput::Pointer(Some((10, 20)))).unwrap();

        let mut config = nes.config().clone();
        config.devices.port1 = None;
        nes.apply_config(config);
        assert_eq!(nes.device(1).unwrap(), None);
        match nes.input_device(2).unwrap() {
            Some(Device::Zapper(zapper)) => assert_eq!(zapper.position(), Some((10, 20))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_battery_ram_round_trip() {
        // LDA #$5A; STA $6000; JMP *
        let program = [0xA9, 0x5A, 0x8D, 0x00, 0x60, 0x4C, 0x05, 0x80];
        let mut nes = Nes::default();
        nes.load_cartridge(&nrom_image(&program, 0x8000)).unwrap();
        nes.run_frame().unwrap();

        let mut storage = MemoryStorage::new();
        assert!(nes.save_battery_ram(&mut storage).unwrap());

        let mut other = Nes::default();
        other.load_cartridge(&nrom_image(&program, 0x8000)).unwrap();
        assert!(other.load_battery_ram(&storage).unwrap());
        assert_eq!(other.bus().peek(0x6000), 0x5A);
    }

    #[test]
    fn test_disabled_video_never_raises_nmi() {
        // Enable NMI then spin; the NMI handler would land on RTI at $FFF0
        let program = [0xA9, 0x80, 0x8D, 0x00, 0x20, 0x4C, 0x05, 0x80];
        let mut nes = Nes::builder()
            .video(|region| Box::new(DisabledPpu::new(region)))
            .build();
        nes.load_cartridge(&nrom_image(&program, 0x8000)).unwrap();
        for _ in 0..3 {
            nes.run_frame().unwrap();
            assert_eq!(nes.cpu().registers().pc, 0x8005);
        }
    }

    #[test]
    fn test_timeout_without_result() {
        let mut nes = console();
        assert!(matches!(
            nes.run_until_result(3),
            Err(NesError::TestTimeout { frames: 3 })
        ));
    }
}
