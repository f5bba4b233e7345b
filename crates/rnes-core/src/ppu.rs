//! PPU (Picture Processing Unit) implementation
//!
//! The 2C02 is modelled dot by dot: 341 dots per scanline, background tiles
//! fetched two tiles ahead into 16-bit shift registers, sprites evaluated at
//! the end of each visible line and fetched during dots 257-320. Every
//! pattern and nametable fetch is announced to the cartridge board so boards
//! that watch PPU A12 see the real address sequence.
//!
//! The frame buffer holds 6-bit palette indices; see [`crate::palette`].

use std::fmt;

use bitflags::bitflags;

use crate::mapper::Mapper;
use crate::palette;
use crate::region::Region;

/// Visible width in pixels
pub const SCREEN_WIDTH: usize = 256;
/// Visible height in pixels
pub const SCREEN_HEIGHT: usize = 240;
/// Dots per scanline
pub const DOTS_PER_SCANLINE: u16 = 341;

bitflags! {
    /// $2000 PPUCTRL
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PpuCtrl: u8 {
        const NAMETABLE_X = 0x01;
        const NAMETABLE_Y = 0x02;
        const INCREMENT_32 = 0x04;
        const SPRITE_TABLE = 0x08;
        const BACKGROUND_TABLE = 0x10;
        const SPRITE_16 = 0x20;
        const MASTER_SLAVE = 0x40;
        const NMI_ENABLE = 0x80;
    }
}

bitflags! {
    /// $2001 PPUMASK
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PpuMask: u8 {
        const GRAYSCALE = 0x01;
        const SHOW_BACKGROUND_LEFT = 0x02;
        const SHOW_SPRITES_LEFT = 0x04;
        const SHOW_BACKGROUND = 0x08;
        const SHOW_SPRITES = 0x10;
        const EMPHASIZE_RED = 0x20;
        const EMPHASIZE_GREEN = 0x40;
        const EMPHASIZE_BLUE = 0x80;
    }
}

bitflags! {
    /// $2002 PPUSTATUS
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PpuStatus: u8 {
        const SPRITE_OVERFLOW = 0x20;
        const SPRITE_ZERO_HIT = 0x40;
        const VBLANK = 0x80;
    }
}

/// Picture unit as seen by the rest of the console
///
/// `Ppu` is the full renderer; `DisabledPpu` keeps frame timing only and is
/// used to run CPU/APU conformance programs without video.
pub trait VideoUnit: fmt::Debug + Send {
    /// Return to power-up state
    fn power_on(&mut self);

    /// Console reset
    fn reset(&mut self);

    /// CPU read of $2000-$3FFF
    fn read_register(&mut self, address: u16, mapper: &mut dyn Mapper) -> u8;

    /// CPU write of $2000-$3FFF
    fn write_register(&mut self, address: u16, value: u8, mapper: &mut dyn Mapper);

    /// Advance one dot
    fn tick(&mut self, mapper: &mut dyn Mapper);

    /// Level of the NMI output
    fn nmi_line(&self) -> bool;

    /// Returns true once after the post-render line of a frame has completed
    fn take_frame_complete(&mut self) -> bool;

    /// Palette indices, one per visible pixel
    fn frame_buffer(&self) -> &[u8];

    /// Current scanline (pre-render is the region's last line)
    fn scanline(&self) -> u16;

    /// Current dot within the scanline
    fn dot(&self) -> u16;

    /// Frames started since power-on
    fn frame_number(&self) -> u64;

    /// Whether the beam has recently lit the pixel at (x, y) brightly
    fn light_at(&self, _x: u16, _y: u16) -> bool {
        false
    }
}

/// Scanlines a lit pixel keeps the light gun's sensor triggered
const LIGHT_PERSISTENCE: u16 = 26;

#[derive(Debug, Clone, Copy, Default)]
struct SpriteSlot {
    pattern_lo: u8,
    pattern_hi: u8,
    attributes: u8,
    x: u8,
}

/// 2C02 PPU
#[derive(Clone)]
pub struct Ppu {
    region: Region,
    ctrl: PpuCtrl,
    mask: PpuMask,
    status: PpuStatus,
    oam_addr: u8,
    oam: [u8; 256],
    /// Current VRAM address (loopy v)
    v: u16,
    /// Temporary VRAM address (loopy t)
    t: u16,
    /// Fine X scroll
    fine_x: u8,
    /// First/second write toggle
    w: bool,
    read_buffer: u8,
    io_latch: u8,
    nametables: [u8; 4096],
    palette: [u8; 32],

    scanline: u16,
    dot: u16,
    frame: u64,
    odd_frame: bool,
    suppress_vblank: bool,
    frame_complete: bool,

    // background pipeline
    next_tile: u8,
    next_attribute: u8,
    next_pattern_lo: u8,
    next_pattern_hi: u8,
    pattern_shift_lo: u16,
    pattern_shift_hi: u16,
    attribute_shift_lo: u16,
    attribute_shift_hi: u16,

    // sprite pipeline
    /// OAM indices found by evaluation for the next line
    evaluated: [u8; 8],
    evaluated_count: usize,
    sprites: [SpriteSlot; 8],
    sprite_count: usize,
    sprite_zero_next: bool,
    sprite_zero_current: bool,

    frame_buffer: Vec<u8>,
}

impl Ppu {
    /// Create a new PPU for the given region
    pub fn new(region: Region) -> Self {
        Self {
            region,
            ctrl: PpuCtrl::empty(),
            mask: PpuMask::empty(),
            status: PpuStatus::empty(),
            oam_addr: 0,
            oam: [0; 256],
            v: 0,
            t: 0,
            fine_x: 0,
            w: false,
            read_buffer: 0,
            io_latch: 0,
            nametables: [0; 4096],
            palette: [0x0F; 32],
            scanline: 0,
            dot: 0,
            frame: 0,
            odd_frame: false,
            suppress_vblank: false,
            frame_complete: false,
            next_tile: 0,
            next_attribute: 0,
            next_pattern_lo: 0,
            next_pattern_hi: 0,
            pattern_shift_lo: 0,
            pattern_shift_hi: 0,
            attribute_shift_lo: 0,
            attribute_shift_hi: 0,
            evaluated: [0; 8],
            evaluated_count: 0,
            sprites: [SpriteSlot::default(); 8],
            sprite_count: 0,
            sprite_zero_next: false,
            sprite_zero_current: false,
            frame_buffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
        }
    }

    /// PPUCTRL
    pub fn ctrl(&self) -> PpuCtrl {
        self.ctrl
    }

    /// PPUMASK
    pub fn mask(&self) -> PpuMask {
        self.mask
    }

    /// PPUSTATUS without side effects
    pub fn status(&self) -> PpuStatus {
        self.status
    }

    /// Current VRAM address
    pub fn vram_address(&self) -> u16 {
        self.v
    }

    /// Object attribute memory
    pub fn oam(&self) -> &[u8; 256] {
        &self.oam
    }

    /// Palette RAM
    pub fn palette_ram(&self) -> &[u8; 32] {
        &self.palette
    }

    fn rendering_enabled(&self) -> bool {
        self.mask
            .intersects(PpuMask::SHOW_BACKGROUND | PpuMask::SHOW_SPRITES)
    }

    fn pre_render_line(&self) -> u16 {
        self.region.pre_render_scanline()
    }

    fn on_render_line(&self) -> bool {
        self.scanline < SCREEN_HEIGHT as u16 || self.scanline == self.pre_render_line()
    }

    // ---- PPU address space ----

    fn palette_index(address: u16) -> usize {
        let index = (address & 0x1F) as usize;
        // $3F10/$3F14/$3F18/$3F1C mirror the backdrop entries
        if index & 0x13 == 0x10 {
            index & !0x10
        } else {
            index
        }
    }

    fn fetch(&mut self, mapper: &mut dyn Mapper, address: u16) -> u8 {
        mapper.on_ppu_address(address);
        self.peek(mapper, address)
    }

    fn peek(&self, mapper: &dyn Mapper, address: u16) -> u8 {
        let address = address & 0x3FFF;
        match address {
            0x0000..=0x1FFF => mapper.read_chr(address),
            0x2000..=0x3EFF => self.nametables[mapper.mirroring().nametable_offset(address)],
            _ => self.palette[Self::palette_index(address)],
        }
    }

    fn store(&mut self, mapper: &mut dyn Mapper, address: u16, value: u8) {
        let address = address & 0x3FFF;
        match address {
            0x0000..=0x1FFF => mapper.write_chr(address, value),
            0x2000..=0x3EFF => {
                let offset = mapper.mirroring().nametable_offset(address);
                self.nametables[offset] = value;
            }
            _ => self.palette[Self::palette_index(address)] = value & 0x3F,
        }
    }

    // ---- loopy register helpers ----

    fn increment_coarse_x(&mut self) {
        if self.v & 0x001F == 31 {
            self.v &= !0x001F;
            self.v ^= 0x0400;
        } else {
            self.v += 1;
        }
    }

    fn increment_y(&mut self) {
        if self.v & 0x7000 != 0x7000 {
            self.v += 0x1000;
            return;
        }
        self.v &= !0x7000;
        let mut coarse_y = (self.v & 0x03E0) >> 5;
        if coarse_y == 29 {
            coarse_y = 0;
            self.v ^= 0x0800;
        } else if coarse_y == 31 {
            coarse_y = 0;
        } else {
            coarse_y += 1;
        }
        self.v = (self.v & !0x03E0) | (coarse_y << 5);
    }

    fn copy_horizontal(&mut self) {
        self.v = (self.v & !0x041F) | (self.t & 0x041F);
    }

    fn copy_vertical(&mut self) {
        self.v = (self.v & !0x7BE0) | (self.t & 0x7BE0);
    }

    fn increment_after_data_access(&mut self, mapper: &mut dyn Mapper) {
        if self.rendering_enabled() && self.on_render_line() {
            // $2007 access during rendering bumps both scroll counters
            self.increment_coarse_x();
            self.increment_y();
        } else {
            let step = if self.ctrl.contains(PpuCtrl::INCREMENT_32) { 32 } else { 1 };
            self.v = self.v.wrapping_add(step) & 0x7FFF;
            mapper.on_ppu_address(self.v & 0x3FFF);
        }
    }

    // ---- background ----

    fn load_background_shifters(&mut self) {
        self.pattern_shift_lo = (self.pattern_shift_lo & 0xFF00) | self.next_pattern_lo as u16;
        self.pattern_shift_hi = (self.pattern_shift_hi & 0xFF00) | self.next_pattern_hi as u16;
        let lo = if self.next_attribute & 0x01 != 0 { 0xFF } else { 0x00 };
        let hi = if self.next_attribute & 0x02 != 0 { 0xFF } else { 0x00 };
        self.attribute_shift_lo = (self.attribute_shift_lo & 0xFF00) | lo;
        self.attribute_shift_hi = (self.attribute_shift_hi & 0xFF00) | hi;
    }

    fn shift_background(&mut self) {
        self.pattern_shift_lo <<= 1;
        self.pattern_shift_hi <<= 1;
        self.attribute_shift_lo <<= 1;
        self.attribute_shift_hi <<= 1;
    }

    fn background_fetch(&mut self, mapper: &mut dyn Mapper) {
        match (self.dot - 1) % 8 {
            0 => {
                self.load_background_shifters();
                self.next_tile = self.fetch(mapper, 0x2000 | (self.v & 0x0FFF));
            }
            2 => {
                let v = self.v;
                let address = 0x23C0 | (v & 0x0C00) | ((v >> 4) & 0x38) | ((v >> 2) & 0x07);
                let shift = ((v >> 4) & 0x04) | (v & 0x02);
                self.next_attribute = (self.fetch(mapper, address) >> shift) & 0x03;
            }
            4 => {
                let address = self.background_pattern_address();
                self.next_pattern_lo = self.fetch(mapper, address);
            }
            6 => {
                let address = self.background_pattern_address() + 8;
                self.next_pattern_hi = self.fetch(mapper, address);
            }
            7 => self.increment_coarse_x(),
            _ => {}
        }
    }

    fn background_pattern_address(&self) -> u16 {
        let table = if self.ctrl.contains(PpuCtrl::BACKGROUND_TABLE) { 0x1000 } else { 0 };
        table + ((self.next_tile as u16) << 4) + ((self.v >> 12) & 0x07)
    }

    // ---- sprites ----

    fn sprite_height(&self) -> u16 {
        if self.ctrl.contains(PpuCtrl::SPRITE_16) { 16 } else { 8 }
    }

    /// Scan OAM for sprites on the line after the current one
    fn evaluate_sprites(&mut self) {
        let height = self.sprite_height() as i32;
        let line = self.scanline as i32;
        let in_range = |y: u8| {
            let row = line - y as i32;
            (0..height).contains(&row)
        };

        self.evaluated_count = 0;
        self.sprite_zero_next = false;
        let mut n = 0;
        while n < 64 && self.evaluated_count < 8 {
            if in_range(self.oam[n * 4]) {
                if n == 0 {
                    self.sprite_zero_next = true;
                }
                self.evaluated[self.evaluated_count] = n as u8;
                self.evaluated_count += 1;
            }
            n += 1;
        }

        // Overflow search with the hardware's diagonal byte-index bug
        let mut m = 0;
        while n < 64 {
            if in_range(self.oam[n * 4 + m]) {
                self.status.insert(PpuStatus::SPRITE_OVERFLOW);
                break;
            }
            n += 1;
            m = (m + 1) & 3;
        }
    }

    fn sprite_fetch(&mut self, mapper: &mut dyn Mapper) {
        let step = self.dot - 257;
        let slot = (step / 8) as usize;
        match step % 8 {
            0 => {
                self.fetch(mapper, 0x2000 | (self.v & 0x0FFF));
            }
            2 => {
                self.fetch(mapper, 0x2000 | (self.v & 0x0FFF));
            }
            4 => {
                let address = self.sprite_pattern_address(slot);
                let value = self.fetch(mapper, address);
                self.sprites[slot].pattern_lo = value;
            }
            6 => {
                let address = self.sprite_pattern_address(slot) + 8;
                let value = self.fetch(mapper, address);
                let sprite = &mut self.sprites[slot];
                sprite.pattern_hi = value;
                if sprite.attributes & 0x40 != 0 {
                    sprite.pattern_lo = sprite.pattern_lo.reverse_bits();
                    sprite.pattern_hi = sprite.pattern_hi.reverse_bits();
                }
                if slot >= self.evaluated_count {
                    // Unused slots fetch tile $FF and stay transparent
                    sprite.pattern_lo = 0;
                    sprite.pattern_hi = 0;
                }
            }
            _ => {}
        }
    }

    fn sprite_pattern_address(&mut self, slot: usize) -> u16 {
        let height = self.sprite_height();
        let (y, tile, attributes, x) = if slot < self.evaluated_count {
            let base = self.evaluated[slot] as usize * 4;
            (self.oam[base], self.oam[base + 1], self.oam[base + 2], self.oam[base + 3])
        } else {
            (0xFF, 0xFF, 0xFF, 0xFF)
        };
        self.sprites[slot].attributes = attributes;
        self.sprites[slot].x = x;

        let mut row = self.scanline.wrapping_sub(y as u16) & (height - 1);
        if attributes & 0x80 != 0 {
            row = height - 1 - row;
        }
        if height == 16 {
            let table = (tile as u16 & 0x01) * 0x1000;
            let mut index = tile as u16 & 0xFE;
            if row >= 8 {
                index += 1;
                row -= 8;
            }
            table + (index << 4) + row
        } else {
            let table = if self.ctrl.contains(PpuCtrl::SPRITE_TABLE) { 0x1000 } else { 0 };
            table + ((tile as u16) << 4) + row
        }
    }

    // ---- pixel output ----

    fn render_pixel(&mut self, mapper: &dyn Mapper) {
        let x = (self.dot - 1) as usize;
        let y = self.scanline as usize;

        let mut background = 0u8;
        let mut background_palette = 0u8;
        if self.mask.contains(PpuMask::SHOW_BACKGROUND)
            && (x >= 8 || self.mask.contains(PpuMask::SHOW_BACKGROUND_LEFT))
        {
            let bit = 0x8000 >> self.fine_x;
            background = ((self.pattern_shift_hi & bit != 0) as u8) << 1
                | (self.pattern_shift_lo & bit != 0) as u8;
            background_palette = ((self.attribute_shift_hi & bit != 0) as u8) << 1
                | (self.attribute_shift_lo & bit != 0) as u8;
        }

        let mut sprite = 0u8;
        let mut sprite_palette = 0u8;
        let mut sprite_behind = false;
        let mut sprite_zero = false;
        if self.mask.contains(PpuMask::SHOW_SPRITES)
            && (x >= 8 || self.mask.contains(PpuMask::SHOW_SPRITES_LEFT))
        {
            for (i, slot) in self.sprites[..self.sprite_count].iter().enumerate() {
                let offset = x as i32 - slot.x as i32;
                if !(0..8).contains(&offset) {
                    continue;
                }
                let bit = 7 - offset;
                let pixel = ((slot.pattern_hi >> bit) & 1) << 1 | ((slot.pattern_lo >> bit) & 1);
                if pixel != 0 {
                    sprite = pixel;
                    sprite_palette = (slot.attributes & 0x03) + 4;
                    sprite_behind = slot.attributes & 0x20 != 0;
                    sprite_zero = i == 0 && self.sprite_zero_current;
                    break;
                }
            }
        }

        if sprite_zero && background != 0 && sprite != 0 && x != 255 {
            self.status.insert(PpuStatus::SPRITE_ZERO_HIT);
        }

        let address = match (background, sprite) {
            (0, 0) => 0x3F00,
            (0, _) => 0x3F00 | (sprite_palette << 2 | sprite) as u16,
            (_, 0) => 0x3F00 | (background_palette << 2 | background) as u16,
            _ if sprite_behind => 0x3F00 | (background_palette << 2 | background) as u16,
            _ => 0x3F00 | (sprite_palette << 2 | sprite) as u16,
        };
        let mut color = self.peek(mapper, address);
        if self.mask.contains(PpuMask::GRAYSCALE) {
            color &= 0x30;
        }
        self.frame_buffer[y * SCREEN_WIDTH + x] = color;
    }

    fn render_dot(&mut self, mapper: &mut dyn Mapper) {
        let visible = self.scanline < SCREEN_HEIGHT as u16;
        let dot = self.dot;

        if matches!(dot, 2..=257 | 321..=337) {
            self.shift_background();
            self.background_fetch(mapper);
        }
        if dot == 256 {
            self.increment_y();
        }
        if dot == 257 {
            self.load_background_shifters();
            self.copy_horizontal();
            if visible {
                self.evaluate_sprites();
            } else {
                self.evaluated_count = 0;
                self.sprite_zero_next = false;
            }
            self.sprite_count = self.evaluated_count;
            self.sprite_zero_current = self.sprite_zero_next;
        }
        if (257..=320).contains(&dot) {
            self.oam_addr = 0;
            self.sprite_fetch(mapper);
        }
        if dot == 338 || dot == 340 {
            self.next_tile = self.fetch(mapper, 0x2000 | (self.v & 0x0FFF));
        }
        if !visible && (280..=304).contains(&dot) {
            self.copy_vertical();
        }

        if visible && (1..=256).contains(&dot) {
            self.render_pixel(mapper);
        }
    }

    fn advance(&mut self) {
        let pre_render = self.pre_render_line();
        if self.scanline == pre_render
            && self.dot == 339
            && self.odd_frame
            && self.rendering_enabled()
            && self.region.skips_odd_frame_dot()
        {
            self.dot = 340;
        }

        self.dot += 1;
        if self.dot < DOTS_PER_SCANLINE {
            return;
        }
        self.dot = 0;
        self.scanline += 1;
        if self.scanline == SCREEN_HEIGHT as u16 + 1 {
            self.frame_complete = true;
        } else if self.scanline > pre_render {
            self.scanline = 0;
            self.frame += 1;
            self.odd_frame = !self.odd_frame;
        }
    }
}

impl VideoUnit for Ppu {
    fn power_on(&mut self) {
        *self = Self::new(self.region);
    }

    fn reset(&mut self) {
        self.ctrl = PpuCtrl::empty();
        self.mask = PpuMask::empty();
        self.w = false;
        self.fine_x = 0;
        self.t = 0;
        self.read_buffer = 0;
        self.odd_frame = false;
        self.suppress_vblank = false;
    }

    fn read_register(&mut self, address: u16, mapper: &mut dyn Mapper) -> u8 {
        let value = match address & 0x0007 {
            2 => {
                if self.scanline == self.region.vblank_scanline() && self.dot == 1 {
                    // Reading just before the flag is raised loses it and its NMI
                    self.suppress_vblank = true;
                }
                let value = (self.status.bits() & 0xE0) | (self.io_latch & 0x1F);
                self.status.remove(PpuStatus::VBLANK);
                self.w = false;
                value
            }
            4 => {
                let value = self.oam[self.oam_addr as usize];
                if self.oam_addr & 0x03 == 0x02 {
                    value & 0xE3
                } else {
                    value
                }
            }
            7 => {
                let address = self.v & 0x3FFF;
                let value = if address >= 0x3F00 {
                    // Palette reads are immediate; the buffer takes the nametable byte beneath
                    self.read_buffer = self.peek(mapper, address - 0x1000);
                    (self.peek(mapper, address) & 0x3F) | (self.io_latch & 0xC0)
                } else {
                    let buffered = self.read_buffer;
                    self.read_buffer = self.fetch(mapper, address);
                    buffered
                };
                self.increment_after_data_access(mapper);
                value
            }
            _ => self.io_latch,
        };
        self.io_latch = value;
        value
    }

    fn write_register(&mut self, address: u16, value: u8, mapper: &mut dyn Mapper) {
        self.io_latch = value;
        match address & 0x0007 {
            0 => {
                self.ctrl = PpuCtrl::from_bits_retain(value);
                self.t = (self.t & !0x0C00) | ((value as u16 & 0x03) << 10);
            }
            1 => self.mask = PpuMask::from_bits_retain(value),
            3 => self.oam_addr = value,
            4 => {
                if self.rendering_enabled() && self.on_render_line() {
                    // Writes during rendering are dropped but still bump the high six bits
                    self.oam_addr = self.oam_addr.wrapping_add(4);
                } else {
                    self.oam[self.oam_addr as usize] = value;
                    self.oam_addr = self.oam_addr.wrapping_add(1);
                }
            }
            5 => {
                if !self.w {
                    self.t = (self.t & !0x001F) | (value as u16 >> 3);
                    self.fine_x = value & 0x07;
                } else {
                    self.t = (self.t & 0x8C1F) | ((value as u16 & 0x07) << 12) | ((value as u16 & 0xF8) << 2);
                }
                self.w = !self.w;
            }
            6 => {
                if !self.w {
                    self.t = (self.t & 0x00FF) | ((value as u16 & 0x3F) << 8);
                } else {
                    self.t = (self.t & 0xFF00) | value as u16;
                    self.v = self.t;
                    mapper.on_ppu_address(self.v & 0x3FFF);
                }
                self.w = !self.w;
            }
            7 => {
                let address = self.v & 0x3FFF;
                if address < 0x2000 {
                    mapper.on_ppu_address(address);
                }
                self.store(mapper, address, value);
                self.increment_after_data_access(mapper);
            }
            _ => {}
        }
    }

    fn tick(&mut self, mapper: &mut dyn Mapper) {
        debug_assert!(self.dot < DOTS_PER_SCANLINE);
        debug_assert!(self.scanline <= self.pre_render_line());

        if self.scanline == self.pre_render_line() && self.dot == 1 {
            self.status.remove(
                PpuStatus::VBLANK | PpuStatus::SPRITE_ZERO_HIT | PpuStatus::SPRITE_OVERFLOW,
            );
        }
        if self.scanline == self.region.vblank_scanline() && self.dot == 1 {
            if !self.suppress_vblank {
                self.status.insert(PpuStatus::VBLANK);
            }
            self.suppress_vblank = false;
        }
        if self.rendering_enabled() && self.on_render_line() {
            self.render_dot(mapper);
        }
        self.advance();
    }

    fn nmi_line(&self) -> bool {
        self.ctrl.contains(PpuCtrl::NMI_ENABLE) && self.status.contains(PpuStatus::VBLANK)
    }

    fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    fn frame_buffer(&self) -> &[u8] {
        &self.frame_buffer
    }

    fn scanline(&self) -> u16 {
        self.scanline
    }

    fn dot(&self) -> u16 {
        self.dot
    }

    fn frame_number(&self) -> u64 {
        self.frame
    }

    fn light_at(&self, x: u16, y: u16) -> bool {
        if x as usize >= SCREEN_WIDTH || y as usize >= SCREEN_HEIGHT {
            return false;
        }
        let drawn = self.scanline > y || (self.scanline == y && self.dot > x + 1);
        if !drawn || self.scanline - y >= LIGHT_PERSISTENCE {
            return false;
        }
        palette::is_bright(self.frame_buffer[y as usize * SCREEN_WIDTH + x as usize])
    }
}

impl fmt::Debug for Ppu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ppu")
            .field("region", &self.region)
            .field("ctrl", &self.ctrl)
            .field("mask", &self.mask)
            .field("status", &self.status)
            .field("v", &format_args!("{:04X}", self.v))
            .field("t", &format_args!("{:04X}", self.t))
            .field("scanline", &self.scanline)
            .field("dot", &self.dot)
            .field("frame", &self.frame)
            .finish()
    }
}

/// Timing-only picture unit
///
/// Keeps scanline/dot counting and frame completion but renders nothing,
/// never asserts NMI and ignores register writes.
#[derive(Debug, Clone)]
pub struct DisabledPpu {
    region: Region,
    scanline: u16,
    dot: u16,
    frame: u64,
    frame_complete: bool,
    frame_buffer: Vec<u8>,
}

impl DisabledPpu {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            scanline: 0,
            dot: 0,
            frame: 0,
            frame_complete: false,
            frame_buffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
        }
    }
}

impl VideoUnit for DisabledPpu {
    fn power_on(&mut self) {
        *self = Self::new(self.region);
    }

    fn reset(&mut self) {}

    fn read_register(&mut self, _address: u16, _mapper: &mut dyn Mapper) -> u8 {
        0
    }

    fn write_register(&mut self, _address: u16, _value: u8, _mapper: &mut dyn Mapper) {}

    fn tick(&mut self, _mapper: &mut dyn Mapper) {
        self.dot += 1;
        if self.dot < DOTS_PER_SCANLINE {
            return;
        }
        self.dot = 0;
        self.scanline += 1;
        if self.scanline == SCREEN_HEIGHT as u16 + 1 {
            self.frame_complete = true;
        } else if self.scanline > self.region.pre_render_scanline() {
            self.scanline = 0;
            self.frame += 1;
        }
    }

    fn nmi_line(&self) -> bool {
        false
    }

    fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    fn frame_buffer(&self) -> &[u8] {
        &self.frame_buffer
    }

    fn scanline(&self) -> u16 {
        self.scanline
    }

    fn dot(&self) -> u16 {
        self.dot
    }

    fn frame_number(&self) -> u64 {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;
    use crate::testing::nrom_image;

    fn board() -> Box<dyn Mapper> {
        let (_, _, mapper) = Cartridge::from_rom(&nrom_image(&[0xEA], 0x8000))
            .unwrap()
            .into_parts();
        mapper
    }

    fn run_dots(ppu: &mut Ppu, mapper: &mut dyn Mapper, dots: u32) {
        for _ in 0..dots {
            ppu.tick(mapper);
        }
    }

    #[test]
    fn test_vblank_set_at_scanline_241_dot_1() {
        let mut mapper = board();
        let mut ppu = Ppu::new(Region::Ntsc);
        run_dots(&mut ppu, mapper.as_mut(), 241 * 341 + 1);
        assert_eq!((ppu.scanline(), ppu.dot()), (241, 1));
        assert!(!ppu.status().contains(PpuStatus::VBLANK));
        ppu.tick(mapper.as_mut());
        assert!(ppu.status().contains(PpuStatus::VBLANK));
    }

    #[test]
    fn test_status_read_clears_vblank_and_toggle() {
        let mut mapper = board();
        let mut ppu = Ppu::new(Region::Ntsc);
        run_dots(&mut ppu, mapper.as_mut(), 241 * 341 + 10);
        ppu.write_register(0x2005, 0x10, mapper.as_mut());
        let status = ppu.read_register(0x2002, mapper.as_mut());
        assert_eq!(status & 0x80, 0x80);
        assert_eq!(ppu.read_register(0x2002, mapper.as_mut()) & 0x80, 0);
        assert!(!ppu.w);
    }

    #[test]
    fn test_nmi_line_follows_ctrl() {
        let mut mapper = board();
        let mut ppu = Ppu::new(Region::Ntsc);
        run_dots(&mut ppu, mapper.as_mut(), 241 * 341 + 5);
        assert!(!ppu.nmi_line());
        ppu.write_register(0x2000, 0x80, mapper.as_mut());
        assert!(ppu.nmi_line());
    }

    #[test]
    fn test_read_on_set_dot_suppresses_vblank() {
        let mut mapper = board();
        let mut ppu = Ppu::new(Region::Ntsc);
        run_dots(&mut ppu, mapper.as_mut(), 241 * 341 + 1);
        assert_eq!(ppu.read_register(0x2002, mapper.as_mut()) & 0x80, 0);
        ppu.tick(mapper.as_mut());
        assert!(!ppu.status().contains(PpuStatus::VBLANK));
    }

    #[test]
    fn test_vram_buffered_read() {
        let mut mapper = board();
        let mut ppu = Ppu::new(Region::Ntsc);
        ppu.write_register(0x2006, 0x20, mapper.as_mut());
        ppu.write_register(0x2006, 0x00, mapper.as_mut());
        ppu.write_register(0x2007, 0xAB, mapper.as_mut());
        ppu.write_register(0x2006, 0x20, mapper.as_mut());
        ppu.write_register(0x2006, 0x00, mapper.as_mut());
        ppu.read_register(0x2007, mapper.as_mut());
        assert_eq!(ppu.read_register(0x2007, mapper.as_mut()), 0xAB);
    }

    #[test]
    fn test_palette_mirrors_backdrop() {
        let mut mapper = board();
        let mut ppu = Ppu::new(Region::Ntsc);
        ppu.write_register(0x2006, 0x3F, mapper.as_mut());
        ppu.write_register(0x2006, 0x10, mapper.as_mut());
        ppu.write_register(0x2007, 0x21, mapper.as_mut());
        assert_eq!(ppu.palette_ram()[0], 0x21);
    }

    #[test]
    fn test_frame_complete_after_post_render_line() {
        let mut mapper = board();
        let mut ppu = Ppu::new(Region::Ntsc);
        run_dots(&mut ppu, mapper.as_mut(), 241 * 341 - 1);
        assert!(!ppu.take_frame_complete());
        ppu.tick(mapper.as_mut());
        assert!(ppu.take_frame_complete());
        assert!(!ppu.take_frame_complete());
    }

    #[test]
    fn test_odd_frame_is_one_dot_shorter_when_rendering() {
        let mut mapper = board();
        let mut ppu = Ppu::new(Region::Ntsc);
        ppu.write_register(0x2001, 0x08, mapper.as_mut());
        let full = 262 * 341;
        run_dots(&mut ppu, mapper.as_mut(), full);
        assert_eq!((ppu.scanline(), ppu.dot()), (0, 0));
        run_dots(&mut ppu, mapper.as_mut(), full - 1);
        assert_eq!((ppu.scanline(), ppu.dot()), (0, 0));
        assert_eq!(ppu.frame_number(), 2);
    }

    #[test]
    fn test_disabled_ppu_keeps_frame_timing() {
        let mut mapper = board();
        let mut ppu = DisabledPpu::new(Region::Pal);
        let mut frames = 0;
        for _ in 0..(312 * 341 * 2) {
            ppu.tick(mapper.as_mut());
            if ppu.take_frame_complete() {
                frames += 1;
            }
        }
        assert_eq!(frames, 2);
        assert!(!ppu.nmi_line());
    }
}
