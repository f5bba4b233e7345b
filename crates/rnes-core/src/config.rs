//! Emulator settings
//!
//! `Config` is built by the host (usually loaded through a [`crate::storage::Storage`])
//! and handed to the console at construction. Nothing in the core reads
//! settings from anywhere else.

use serde::{Deserialize, Serialize};

use crate::input::DeviceKind;
use crate::region::RegionSetting;

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TV system, or follow the cartridge header
    pub region: RegionSetting,
    /// Fail on unofficial opcodes instead of executing them
    pub strict_opcodes: bool,
    pub audio: AudioConfig,
    pub devices: DeviceConfig,
}

/// Audio output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Produce samples at all
    pub enabled: bool,
    /// Output rate in Hz
    pub sample_rate: u32,
    /// Master volume, 0.0 to 1.0
    pub volume: f32,
    pub channels: AudioChannels,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 44_100,
            volume: 1.0,
            channels: AudioChannels::default(),
        }
    }
}

/// Per-channel enable switches, applied before mixing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioChannels {
    pub pulse1: bool,
    pub pulse2: bool,
    pub triangle: bool,
    pub noise: bool,
    pub dmc: bool,
}

impl Default for AudioChannels {
    fn default() -> Self {
        Self {
            pulse1: true,
            pulse2: true,
            triangle: true,
            noise: true,
            dmc: true,
        }
    }
}

/// Devices plugged in at power-on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub port1: Option<DeviceKind>,
    pub port2: Option<DeviceKind>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port1: Some(DeviceKind::Joypad),
            port2: Some(DeviceKind::Zapper),
        }
    }
}
