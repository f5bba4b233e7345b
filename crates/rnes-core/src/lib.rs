//! RNES Core - Pure Rust NES emulator library
//!
//! This crate provides the hardware emulation of the Nintendo Entertainment
//! System: the 2A03 CPU, the 2C02 PPU, the APU, the cartridge boards and the
//! controller ports, composed by [`Nes`] into one cycle-stepped console.
//! It has no windowing, audio-device or file-system dependencies; hosts
//! drive it frame by frame and persist data through [`storage::Storage`].

#![forbid(unsafe_code)]

/// APU (Audio Processing Unit): channels, frame sequencer and mixer
pub mod apu;
/// CPU memory bus and address decoding
pub mod bus;
/// iNES / NES 2.0 image parsing
pub mod cartridge;
/// Emulator settings
pub mod config;
/// CPU module containing the 2A03 (6502 variant) implementation
pub mod cpu;
/// Controller ports and devices
pub mod input;
/// Cartridge boards
pub mod mapper;
/// Master palette
pub mod palette;
/// PPU (Picture Processing Unit) implementation
pub mod ppu;
/// NTSC / PAL timing
pub mod region;
/// Persistent storage collaborator
pub mod storage;
/// Console composition and scheduling
pub mod system;
/// Conformance-testing helpers
pub mod testing;

pub use cartridge::{Cartridge, CartridgeError};
pub use config::Config;
pub use cpu::{Cpu, CpuError};
pub use input::{Buttons, DeviceInput, DeviceKind, InputError};
pub use region::{Region, RegionSetting};
pub use storage::{MemoryStorage, RamKind, Storage, StorageError};
pub use system::{Nes, NesBuilder, NesError};
