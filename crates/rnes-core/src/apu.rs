//! APU (Audio Processing Unit)
//!
//! Two pulse channels, a triangle, an LFSR noise channel and the delta
//! modulation channel, driven by the frame sequencer and clocked once per
//! CPU cycle. The DMC reads its samples through the CPU bus: it raises a
//! fetch request that the CPU services as a short DMA stall.
//!
//! Output is combined with the non-linear mixer tables and box-filtered
//! down to the configured sample rate.

use tracing::trace;

use crate::config::AudioConfig;
use crate::region::Region;

#[rustfmt::skip]
const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14,
    12, 16, 24, 18, 48, 20, 96, 22, 192, 24, 72, 26, 16, 28, 32, 30,
];

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

#[rustfmt::skip]
const TRIANGLE_SEQUENCE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0,
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
];

#[rustfmt::skip]
const NOISE_PERIODS_NTSC: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

#[rustfmt::skip]
const NOISE_PERIODS_PAL: [u16; 16] = [
    4, 8, 14, 30, 60, 88, 118, 148, 188, 236, 354, 472, 708, 944, 1890, 3778,
];

#[rustfmt::skip]
const DMC_RATES_NTSC: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

#[rustfmt::skip]
const DMC_RATES_PAL: [u16; 16] = [
    398, 354, 316, 298, 276, 236, 210, 198, 176, 148, 132, 118, 98, 78, 66, 50,
];

/// Frame sequencer step points in CPU cycles, 4-step then 5-step
const FRAME_STEPS_NTSC: [[u32; 6]; 2] = [
    [7457, 14913, 22371, 29828, 29829, 29830],
    [7457, 14913, 22371, 29829, 37281, 37282],
];

const FRAME_STEPS_PAL: [[u32; 6]; 2] = [
    [8313, 16627, 24939, 33252, 33253, 33254],
    [8313, 16627, 24939, 33253, 41565, 41566],
];

/// Volume envelope shared by pulse and noise
#[derive(Debug, Clone, Default)]
struct Envelope {
    start: bool,
    looping: bool,
    constant: bool,
    volume: u8,
    divider: u8,
    decay: u8,
}

impl Envelope {
    fn write(&mut self, value: u8) {
        self.looping = value & 0x20 != 0;
        self.constant = value & 0x10 != 0;
        self.volume = value & 0x0F;
    }

    fn clock(&mut self) {
        if self.start {
            self.start = false;
            self.decay = 15;
            self.divider = self.volume;
        } else if self.divider == 0 {
            self.divider = self.volume;
            if self.decay > 0 {
                self.decay -= 1;
            } else if self.looping {
                self.decay = 15;
            }
        } else {
            self.divider -= 1;
        }
    }

    fn output(&self) -> u8 {
        if self.constant {
            self.volume
        } else {
            self.decay
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LengthCounter {
    enabled: bool,
    halt: bool,
    value: u8,
}

impl LengthCounter {
    fn load(&mut self, index: u8) {
        if self.enabled {
            self.value = LENGTH_TABLE[(index & 0x1F) as usize];
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.value = 0;
        }
    }

    fn clock(&mut self) {
        if !self.halt && self.value > 0 {
            self.value -= 1;
        }
    }

    fn active(&self) -> bool {
        self.value > 0
    }
}

/// Square wave channel
#[derive(Debug, Clone, Default)]
pub struct PulseChannel {
    /// Pulse 1 negates its sweep with ones' complement
    ones_complement: bool,
    duty: u8,
    step: u8,
    timer_period: u16,
    timer: u16,
    envelope: Envelope,
    length: LengthCounter,
    sweep_enabled: bool,
    sweep_period: u8,
    sweep_negate: bool,
    sweep_shift: u8,
    sweep_reload: bool,
    sweep_divider: u8,
}

impl PulseChannel {
    fn new(ones_complement: bool) -> Self {
        Self {
            ones_complement,
            ..Self::default()
        }
    }

    fn write(&mut self, register: u16, value: u8) {
        match register {
            0 => {
                self.duty = value >> 6;
                self.length.halt = value & 0x20 != 0;
                self.envelope.write(value);
            }
            1 => {
                self.sweep_enabled = value & 0x80 != 0;
                self.sweep_period = (value >> 4) & 0x07;
                self.sweep_negate = value & 0x08 != 0;
                self.sweep_shift = value & 0x07;
                self.sweep_reload = true;
            }
            2 => self.timer_period = (self.timer_period & 0x0700) | value as u16,
            _ => {
                self.timer_period = (self.timer_period & 0x00FF) | ((value as u16 & 0x07) << 8);
                self.length.load(value >> 3);
                self.step = 0;
                self.envelope.start = true;
            }
        }
    }

    fn sweep_target(&self) -> u16 {
        let change = self.timer_period >> self.sweep_shift;
        if self.sweep_negate {
            let target = self.timer_period.saturating_sub(change);
            if self.ones_complement {
                target.saturating_sub(1)
            } else {
                target
            }
        } else {
            self.timer_period + change
        }
    }

    fn muted(&self) -> bool {
        self.timer_period < 8 || self.sweep_target() > 0x07FF
    }

    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            self.step = (self.step + 1) & 0x07;
        } else {
            self.timer -= 1;
        }
    }

    fn clock_sweep(&mut self) {
        if self.sweep_divider == 0 && self.sweep_enabled && self.sweep_shift > 0 && !self.muted() {
            self.timer_period = self.sweep_target();
        }
        if self.sweep_divider == 0 || self.sweep_reload {
            self.sweep_divider = self.sweep_period;
            self.sweep_reload = false;
        } else {
            self.sweep_divider -= 1;
        }
    }

    fn output(&self) -> u8 {
        if self.muted() || !self.length.active() || DUTY_TABLE[self.duty as usize][self.step as usize] == 0 {
            0
        } else {
            self.envelope.output()
        }
    }
}

/// Triangle channel
#[derive(Debug, Clone, Default)]
pub struct TriangleChannel {
    timer_period: u16,
    timer: u16,
    step: u8,
    length: LengthCounter,
    control: bool,
    linear_reload_value: u8,
    linear_counter: u8,
    linear_reload: bool,
}

impl TriangleChannel {
    fn write(&mut self, register: u16, value: u8) {
        match register {
            0 => {
                self.control = value & 0x80 != 0;
                self.length.halt = self.control;
                self.linear_reload_value = value & 0x7F;
            }
            1 => {}
            2 => self.timer_period = (self.timer_period & 0x0700) | value as u16,
            _ => {
                self.timer_period = (self.timer_period & 0x00FF) | ((value as u16 & 0x07) << 8);
                self.length.load(value >> 3);
                self.linear_reload = true;
            }
        }
    }

    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            if self.length.active() && self.linear_counter > 0 {
                self.step = (self.step + 1) & 0x1F;
            }
        } else {
            self.timer -= 1;
        }
    }

    fn clock_linear(&mut self) {
        if self.linear_reload {
            self.linear_counter = self.linear_reload_value;
        } else if self.linear_counter > 0 {
            self.linear_counter -= 1;
        }
        if !self.control {
            self.linear_reload = false;
        }
    }

    fn output(&self) -> u8 {
        TRIANGLE_SEQUENCE[self.step as usize]
    }
}

/// Pseudo-random noise channel
#[derive(Debug, Clone)]
pub struct NoiseChannel {
    periods: &'static [u16; 16],
    short_mode: bool,
    timer_period: u16,
    timer: u16,
    shift: u16,
    envelope: Envelope,
    length: LengthCounter,
}

impl NoiseChannel {
    fn new(region: Region) -> Self {
        let periods = match region {
            Region::Ntsc => &NOISE_PERIODS_NTSC,
            Region::Pal => &NOISE_PERIODS_PAL,
        };
        Self {
            periods,
            short_mode: false,
            timer_period: periods[0] - 1,
            timer: 0,
            shift: 1,
            envelope: Envelope::default(),
            length: LengthCounter::default(),
        }
    }

    fn write(&mut self, register: u16, value: u8) {
        match register {
            0 => {
                self.length.halt = value & 0x20 != 0;
                self.envelope.write(value);
            }
            1 => {}
            2 => {
                self.short_mode = value & 0x80 != 0;
                self.timer_period = self.periods[(value & 0x0F) as usize] - 1;
            }
            _ => {
                self.length.load(value >> 3);
                self.envelope.start = true;
            }
        }
    }

    fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.timer_period;
            let tap = if self.short_mode { 6 } else { 1 };
            let feedback = (self.shift ^ (self.shift >> tap)) & 1;
            self.shift = (self.shift >> 1) | (feedback << 14);
        } else {
            self.timer -= 1;
        }
    }

    fn output(&self) -> u8 {
        if self.shift & 1 != 0 || !self.length.active() {
            0
        } else {
            self.envelope.output()
        }
    }
}

/// Delta modulation channel
#[derive(Debug, Clone)]
pub struct DmcChannel {
    rates: &'static [u16; 16],
    irq_enabled: bool,
    looping: bool,
    timer_period: u16,
    timer: u16,
    output_level: u8,
    sample_address: u16,
    sample_length: u16,
    current_address: u16,
    bytes_remaining: u16,
    sample_buffer: Option<u8>,
    shift: u8,
    bits_remaining: u8,
    silence: bool,
    irq_flag: bool,
}

impl DmcChannel {
    fn new(region: Region) -> Self {
        let rates = match region {
            Region::Ntsc => &DMC_RATES_NTSC,
            Region::Pal => &DMC_RATES_PAL,
        };
        Self {
            rates,
            irq_enabled: false,
            looping: false,
            timer_period: rates[0] - 1,
            timer: 0,
            output_level: 0,
            sample_address: 0xC000,
            sample_length: 1,
            current_address: 0xC000,
            bytes_remaining: 0,
            sample_buffer: None,
            shift: 0,
            bits_remaining: 8,
            silence: true,
            irq_flag: false,
        }
    }

    fn write(&mut self, register: u16, value: u8) {
        match register {
            0 => {
                self.irq_enabled = value & 0x80 != 0;
                if !self.irq_enabled {
                    self.irq_flag = false;
                }
                self.looping = value & 0x40 != 0;
                self.timer_period = self.rates[(value & 0x0F) as usize] - 1;
            }
            1 => self.output_level = value & 0x7F,
            2 => self.sample_address = 0xC000 | ((value as u16) << 6),
            _ => self.sample_length = ((value as u16) << 4) | 1,
        }
    }

    fn restart(&mut self) {
        self.current_address = self.sample_address;
        self.bytes_remaining = self.sample_length;
    }

    fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.bytes_remaining = 0;
        } else if self.bytes_remaining == 0 {
            self.restart();
        }
    }

    fn fetch_address(&self) -> Option<u16> {
        (self.sample_buffer.is_none() && self.bytes_remaining > 0).then_some(self.current_address)
    }

    fn fill(&mut self, value: u8) {
        self.sample_buffer = Some(value);
        self.current_address = if self.current_address == 0xFFFF {
            0x8000
        } else {
            self.current_address + 1
        };
        self.bytes_remaining = self.bytes_remaining.saturating_sub(1);
        if self.bytes_remaining == 0 {
            if self.looping {
                self.restart();
            } else if self.irq_enabled {
                self.irq_flag = true;
            }
        }
    }

    fn clock_timer(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
            return;
        }
        self.timer = self.timer_period;

        if !self.silence {
            if self.shift & 1 != 0 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }
        }
        self.shift >>= 1;
        self.bits_remaining -= 1;
        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            match self.sample_buffer.take() {
                Some(sample) => {
                    self.shift = sample;
                    self.silence = false;
                }
                None => self.silence = true,
            }
        }
    }

    fn output(&self) -> u8 {
        self.output_level
    }
}

/// Frame sequencer
#[derive(Debug, Clone)]
struct FrameCounter {
    steps: &'static [[u32; 6]; 2],
    five_step: bool,
    /// Mode written to $4017, applied when the sequence restarts
    pending_five_step: bool,
    irq_inhibit: bool,
    irq_flag: bool,
    cycle: u32,
    /// CPU cycles until a $4017 write restarts the sequence
    reset_delay: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct FrameClocks {
    quarter: bool,
    half: bool,
}

impl FrameCounter {
    fn new(region: Region) -> Self {
        Self {
            steps: match region {
                Region::Ntsc => &FRAME_STEPS_NTSC,
                Region::Pal => &FRAME_STEPS_PAL,
            },
            five_step: false,
            pending_five_step: false,
            irq_inhibit: false,
            irq_flag: false,
            cycle: 0,
            reset_delay: 0,
        }
    }

    fn write(&mut self, value: u8, odd_cycle: bool) {
        self.pending_five_step = value & 0x80 != 0;
        self.irq_inhibit = value & 0x40 != 0;
        if self.irq_inhibit {
            self.irq_flag = false;
        }
        self.reset_delay = if odd_cycle { 4 } else { 3 };
    }

    fn tick(&mut self) -> FrameClocks {
        let mut clocks = FrameClocks::default();

        if self.reset_delay > 0 {
            self.reset_delay -= 1;
            if self.reset_delay == 0 {
                self.cycle = 0;
                self.five_step = self.pending_five_step;
                if self.five_step {
                    clocks.quarter = true;
                    clocks.half = true;
                }
                return clocks;
            }
        }

        self.cycle += 1;
        let steps = &self.steps[self.five_step as usize];
        let raise_irq = |counter: &mut Self| {
            if !counter.irq_inhibit {
                counter.irq_flag = true;
            }
        };
        if self.five_step {
            match self.cycle {
                c if c == steps[0] || c == steps[2] => clocks.quarter = true,
                c if c == steps[1] || c == steps[4] => {
                    clocks.quarter = true;
                    clocks.half = true;
                }
                c if c == steps[5] => self.cycle = 0,
                _ => {}
            }
        } else {
            match self.cycle {
                c if c == steps[0] || c == steps[2] => clocks.quarter = true,
                c if c == steps[1] => {
                    clocks.quarter = true;
                    clocks.half = true;
                }
                c if c == steps[3] => raise_irq(self),
                c if c == steps[4] => {
                    clocks.quarter = true;
                    clocks.half = true;
                    raise_irq(self);
                }
                c if c == steps[5] => {
                    raise_irq(self);
                    self.cycle = 0;
                }
                _ => {}
            }
        }
        clocks
    }
}

/// Non-linear mixer lookup tables
#[derive(Debug, Clone)]
struct Mixer {
    pulse: [f32; 31],
    tnd: [f32; 203],
}

impl Mixer {
    fn new() -> Self {
        let mut pulse = [0.0; 31];
        for (n, entry) in pulse.iter_mut().enumerate().skip(1) {
            *entry = 95.52 / (8128.0 / n as f32 + 100.0);
        }
        let mut tnd = [0.0; 203];
        for (n, entry) in tnd.iter_mut().enumerate().skip(1) {
            *entry = 163.67 / (24329.0 / n as f32 + 100.0);
        }
        Self { pulse, tnd }
    }

    fn mix(&self, pulse1: u8, pulse2: u8, triangle: u8, noise: u8, dmc: u8) -> f32 {
        let pulse = self.pulse[(pulse1 + pulse2) as usize];
        let tnd = self.tnd[3 * triangle as usize + 2 * noise as usize + dmc as usize];
        pulse + tnd
    }
}

/// 2A03 APU
#[derive(Debug, Clone)]
pub struct Apu {
    region: Region,
    settings: AudioConfig,
    pulse1: PulseChannel,
    pulse2: PulseChannel,
    triangle: TriangleChannel,
    noise: NoiseChannel,
    dmc: DmcChannel,
    frame_counter: FrameCounter,
    /// Last value written to $4017, replayed on reset
    frame_counter_value: u8,
    mixer: Mixer,
    cycles: u64,
    cycles_per_sample: f64,
    sample_clock: f64,
    sample_sum: f32,
    sample_count: u32,
    samples: Vec<f32>,
}

impl Apu {
    /// Create a new APU in power-up state
    pub fn new(region: Region, settings: AudioConfig) -> Self {
        let cycles_per_sample = region.cpu_clock_rate() as f64 / settings.sample_rate.max(1) as f64;
        Self {
            region,
            settings,
            pulse1: PulseChannel::new(true),
            pulse2: PulseChannel::new(false),
            triangle: TriangleChannel::default(),
            noise: NoiseChannel::new(region),
            dmc: DmcChannel::new(region),
            frame_counter: FrameCounter::new(region),
            frame_counter_value: 0,
            mixer: Mixer::new(),
            cycles: 0,
            cycles_per_sample,
            sample_clock: 0.0,
            sample_sum: 0.0,
            sample_count: 0,
            samples: Vec::new(),
        }
    }

    /// Power-up state, keeping region and audio settings
    pub fn power_on(&mut self) {
        *self = Self::new(self.region, self.settings.clone());
    }

    /// Console reset: silence channels and replay the last $4017 write
    pub fn reset(&mut self) {
        self.write_status(0x00);
        self.dmc.irq_flag = false;
        self.dmc.output_level &= 0x01;
        self.frame_counter.irq_flag = false;
        let value = self.frame_counter_value;
        self.frame_counter.write(value, self.cycles & 1 == 1);
    }

    /// Audio output settings
    pub fn settings(&self) -> &AudioConfig {
        &self.settings
    }

    /// Replace the audio output settings
    pub fn set_settings(&mut self, settings: AudioConfig) {
        self.cycles_per_sample = self.region.cpu_clock_rate() as f64 / settings.sample_rate.max(1) as f64;
        self.settings = settings;
    }

    /// Read $4015
    pub fn read_status(&mut self) -> u8 {
        let value = self.peek_status();
        self.frame_counter.irq_flag = false;
        value
    }

    /// $4015 without clearing the frame interrupt
    pub fn peek_status(&self) -> u8 {
        let mut value = 0;
        value |= self.pulse1.length.active() as u8;
        value |= (self.pulse2.length.active() as u8) << 1;
        value |= (self.triangle.length.active() as u8) << 2;
        value |= (self.noise.length.active() as u8) << 3;
        value |= ((self.dmc.bytes_remaining > 0) as u8) << 4;
        value |= (self.frame_counter.irq_flag as u8) << 6;
        value |= (self.dmc.irq_flag as u8) << 7;
        value
    }

    /// CPU write to $4000-$4013, $4015 or $4017
    pub fn write(&mut self, address: u16, value: u8) {
        trace!(address, value, "apu write");
        match address {
            0x4000..=0x4003 => self.pulse1.write(address & 0x03, value),
            0x4004..=0x4007 => self.pulse2.write(address & 0x03, value),
            0x4008..=0x400B => self.triangle.write(address & 0x03, value),
            0x400C..=0x400F => self.noise.write(address & 0x03, value),
            0x4010..=0x4013 => self.dmc.write(address & 0x03, value),
            0x4015 => self.write_status(value),
            0x4017 => {
                self.frame_counter_value = value;
                self.frame_counter.write(value, self.cycles & 1 == 1);
            }
            _ => {}
        }
    }

    fn write_status(&mut self, value: u8) {
        self.pulse1.length.set_enabled(value & 0x01 != 0);
        self.pulse2.length.set_enabled(value & 0x02 != 0);
        self.triangle.length.set_enabled(value & 0x04 != 0);
        self.noise.length.set_enabled(value & 0x08 != 0);
        self.dmc.set_enabled(value & 0x10 != 0);
        self.dmc.irq_flag = false;
    }

    /// Advance one CPU cycle
    pub fn tick(&mut self) {
        self.cycles += 1;

        let clocks = self.frame_counter.tick();
        if clocks.quarter {
            self.pulse1.envelope.clock();
            self.pulse2.envelope.clock();
            self.noise.envelope.clock();
            self.triangle.clock_linear();
        }
        if clocks.half {
            self.pulse1.length.clock();
            self.pulse2.length.clock();
            self.triangle.length.clock();
            self.noise.length.clock();
            self.pulse1.clock_sweep();
            self.pulse2.clock_sweep();
        }

        if self.cycles & 1 == 0 {
            self.pulse1.clock_timer();
            self.pulse2.clock_timer();
        }
        self.triangle.clock_timer();
        self.noise.clock_timer();
        self.dmc.clock_timer();

        if self.settings.enabled {
            self.accumulate_sample();
        }
    }

    fn accumulate_sample(&mut self) {
        let channels = &self.settings.channels;
        let gate = |enabled: bool, value: u8| if enabled { value } else { 0 };
        let level = self.mixer.mix(
            gate(channels.pulse1, self.pulse1.output()),
            gate(channels.pulse2, self.pulse2.output()),
            gate(channels.triangle, self.triangle.output()),
            gate(channels.noise, self.noise.output()),
            gate(channels.dmc, self.dmc.output()),
        );
        self.sample_sum += level;
        self.sample_count += 1;
        self.sample_clock += 1.0;
        if self.sample_clock >= self.cycles_per_sample {
            self.sample_clock -= self.cycles_per_sample;
            let average = self.sample_sum / self.sample_count as f32;
            self.samples.push(average * self.settings.volume);
            self.sample_sum = 0.0;
            self.sample_count = 0;
        }
    }

    /// Address the DMC wants fetched, if its sample buffer is empty
    pub fn dmc_fetch_address(&self) -> Option<u16> {
        self.dmc.fetch_address()
    }

    /// Hand the DMC the byte read for its request
    pub fn complete_dmc_fetch(&mut self, value: u8) {
        self.dmc.fill(value);
    }

    /// Frame sequencer interrupt flag
    pub fn frame_irq(&self) -> bool {
        self.frame_counter.irq_flag
    }

    /// DMC end-of-sample interrupt flag
    pub fn dmc_irq(&self) -> bool {
        self.dmc.irq_flag
    }

    /// Move accumulated samples out
    pub fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    /// Samples accumulated since the last take
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// CPU cycles since power-on
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}
