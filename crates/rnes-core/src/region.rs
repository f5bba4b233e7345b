//! TV-system timing
//!
//! NTSC and PAL consoles differ in CPU clock, scanline count and in the
//! ratio between PPU dots and CPU cycles. Everything region-dependent is
//! looked up from here so the rest of the core stays region-agnostic.

use serde::{Deserialize, Serialize};

/// Console region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Ntsc,
    Pal,
}

impl Region {
    /// CPU clock in Hz
    pub fn cpu_clock_rate(self) -> u32 {
        match self {
            Region::Ntsc => 1_789_773,
            Region::Pal => 1_662_607,
        }
    }

    /// PPU dots per CPU cycle as a (numerator, denominator) pair
    pub fn ppu_ratio(self) -> (u32, u32) {
        match self {
            Region::Ntsc => (3, 1),
            Region::Pal => (16, 5),
        }
    }

    /// Total scanlines per frame, including pre-render
    pub fn scanlines_per_frame(self) -> u16 {
        match self {
            Region::Ntsc => 262,
            Region::Pal => 312,
        }
    }

    /// Scanline on which the vblank flag is raised
    pub fn vblank_scanline(self) -> u16 {
        241
    }

    /// Index of the pre-render scanline
    pub fn pre_render_scanline(self) -> u16 {
        self.scanlines_per_frame() - 1
    }

    /// Whether the pre-render line is one dot shorter on odd frames
    pub fn skips_odd_frame_dot(self) -> bool {
        matches!(self, Region::Ntsc)
    }

    /// Frames per second (approximate)
    pub fn frame_rate(self) -> f64 {
        match self {
            Region::Ntsc => 60.0988,
            Region::Pal => 50.0070,
        }
    }
}

/// Region selection as stored in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionSetting {
    /// Follow the cartridge header hint
    #[default]
    Auto,
    Ntsc,
    Pal,
}

impl RegionSetting {
    /// Resolve to a concrete region, using `hint` when set to auto
    pub fn resolve(self, hint: Option<Region>) -> Region {
        match self {
            RegionSetting::Auto => hint.unwrap_or_default(),
            RegionSetting::Ntsc => Region::Ntsc,
            RegionSetting::Pal => Region::Pal,
        }
    }
}
