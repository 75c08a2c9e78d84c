//! The four "legacy" sound channels inherited from the Gameboy: two square waves (the first with a frequency sweep),
//! a 4-bit wave table and an LFSR noise generator. They behave the same as on the Gameboy, but are clocked 16x faster
//! since the GBA runs at 16.78MHz, and the wave channel grew a second bank of wave RAM.
//! Channel outputs are unipolar 4-bit levels (0 - 15), the mixer takes care of the rest.

use serde::{Deserialize, Serialize};

#[rustfmt::skip]
const DUTY_PATTERNS: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0], // 12.5%
    [0, 1, 1, 0, 0, 0, 0, 0], // 25%
    [0, 1, 1, 1, 1, 0, 0, 0], // 50%
    [1, 0, 0, 1, 1, 1, 1, 1], // 75%
];
const NOISE_DIVISORS: [u32; 8] = [8, 16, 32, 48, 64, 80, 96, 112];

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Envelope {
    pub initial: u8,
    pub increase: bool,
    pub period: u8,
    pub volume: u8,
    timer: u8,
}

impl Envelope {
    fn write(&mut self, v: u8) {
        self.period = v & 0b0000_0111;
        self.increase = v & 0b0000_1000 != 0;
        self.initial = v >> 4;
    }

    fn read(&self) -> u8 {
        self.period | if self.increase { 0b0000_1000 } else { 0 } | (self.initial << 4)
    }

    fn trigger(&mut self) {
        self.volume = self.initial;
        self.timer = self.period;
    }

    pub fn step(&mut self) {
        if self.period == 0 {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer == 0 {
            self.timer = self.period;
            if self.increase && self.volume < 15 {
                self.volume += 1;
            } else if !self.increase && self.volume > 0 {
                self.volume -= 1;
            }
        }
    }
}

/// Length counters count down from the value written, the channel turns itself off when it hits zero.
fn step_length(enabled: &mut bool, length_enabled: bool, length: &mut u16) {
    if length_enabled && *length > 0 {
        *length -= 1;
        if *length == 0 {
            *enabled = false;
        }
    }
}

/// Square wave channel. Channel 1 has a frequency sweep unit, channel 2 leaves it zeroed.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Pulse {
    pub enabled: bool,
    pub envelope: Envelope,
    pub duty: u8,
    pub length: u16,
    pub length_enabled: bool,
    pub freq: u16,

    pub sweep_period: u8,
    pub sweep_negate: bool,
    pub sweep_shift: u8,
    sweep_timer: u8,
    sweep_enabled: bool,
    shadow_freq: u16,

    timer: i32,
    phase: usize,
}

impl Pulse {
    fn period(&self) -> i32 {
        (2048 - i32::from(self.freq)) * 16
    }

    pub fn write_sweep(&mut self, v: u8) {
        self.sweep_shift = v & 0b0000_0111;
        self.sweep_negate = v & 0b0000_1000 != 0;
        self.sweep_period = (v >> 4) & 0b111;
    }

    pub fn read_sweep(&self) -> u8 {
        self.sweep_shift | if self.sweep_negate { 0b0000_1000 } else { 0 } | (self.sweep_period << 4)
    }

    pub fn write_duty_length(&mut self, v: u8) {
        self.duty = v >> 6;
        self.length = 64 - u16::from(v & 0x3F);
    }

    pub fn read_duty(&self) -> u8 {
        self.duty << 6
    }

    pub fn write_envelope(&mut self, v: u8) {
        self.envelope.write(v);
    }

    pub fn read_envelope(&self) -> u8 {
        self.envelope.read()
    }

    pub fn write_freq_lo(&mut self, v: u8) {
        self.freq = (self.freq & 0x700) | u16::from(v);
    }

    pub fn write_freq_hi(&mut self, v: u8) {
        self.freq = (self.freq & 0xFF) | (u16::from(v & 7) << 8);
        self.length_enabled = v & 0x40 != 0;
        if v & 0x80 != 0 {
            self.trigger();
        }
    }

    pub fn read_freq_hi(&self) -> u8 {
        if self.length_enabled {
            0x40
        } else {
            0
        }
    }

    fn trigger(&mut self) {
        self.enabled = true;
        if self.length == 0 {
            self.length = 64;
        }
        self.timer = self.period();
        self.envelope.trigger();

        self.shadow_freq = self.freq;
        self.sweep_timer = self.sweep_period;
        self.sweep_enabled = self.sweep_period > 0 || self.sweep_shift > 0;
        if self.sweep_shift > 0 && self.next_sweep_freq() > 2047 {
            self.enabled = false;
        }
    }

    fn next_sweep_freq(&self) -> u16 {
        let delta = self.shadow_freq >> self.sweep_shift;
        if self.sweep_negate {
            self.shadow_freq.saturating_sub(delta)
        } else {
            self.shadow_freq + delta
        }
    }

    pub fn step(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }
        self.timer -= cycles as i32;
        while self.timer <= 0 {
            self.timer += self.period();
            self.phase = (self.phase + 1) % 8;
        }
    }

    pub fn step_length(&mut self) {
        step_length(&mut self.enabled, self.length_enabled, &mut self.length);
    }

    pub fn step_sweep(&mut self) {
        if !self.sweep_enabled || self.sweep_period == 0 {
            return;
        }
        self.sweep_timer = self.sweep_timer.saturating_sub(1);
        if self.sweep_timer > 0 {
            return;
        }
        self.sweep_timer = self.sweep_period;

        let freq = self.next_sweep_freq();
        if freq > 2047 {
            self.enabled = false;
        } else if self.sweep_shift > 0 {
            self.shadow_freq = freq;
            self.freq = freq;
        }
    }

    pub fn output(&self) -> u8 {
        if self.enabled && DUTY_PATTERNS[self.duty as usize][self.phase] == 1 {
            self.envelope.volume
        } else {
            0
        }
    }
}

/// Plays back 4-bit samples from wave RAM. The GBA has two 16 byte banks: one is played while the CPU accesses the
/// other, or both can be chained together into a single 64 sample wave.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Wave {
    pub enabled: bool,
    pub dac_enabled: bool,
    pub two_banks: bool,
    pub bank: usize,
    pub length: u16,
    pub length_enabled: bool,
    pub volume_shift: u8,
    pub force_volume: bool,
    pub freq: u16,
    pub ram: [u8; 32],

    timer: i32,
    position: usize,
    sample: u8,
}

impl Wave {
    fn period(&self) -> i32 {
        (2048 - i32::from(self.freq)) * 8
    }

    pub fn write_control(&mut self, v: u8) {
        self.two_banks = v & 0x20 != 0;
        self.bank = usize::from((v >> 6) & 1);
        self.dac_enabled = v & 0x80 != 0;
        if !self.dac_enabled {
            self.enabled = false;
        }
    }

    pub fn read_control(&self) -> u8 {
        (if self.two_banks { 0x20 } else { 0 }) | ((self.bank as u8) << 6) | if self.dac_enabled { 0x80 } else { 0 }
    }

    pub fn write_length(&mut self, v: u8) {
        self.length = 256 - u16::from(v);
    }

    pub fn write_volume(&mut self, v: u8) {
        self.volume_shift = (v >> 5) & 3;
        self.force_volume = v & 0x80 != 0;
    }

    pub fn read_volume(&self) -> u8 {
        (self.volume_shift << 5) | if self.force_volume { 0x80 } else { 0 }
    }

    pub fn write_freq_lo(&mut self, v: u8) {
        self.freq = (self.freq & 0x700) | u16::from(v);
    }

    pub fn write_freq_hi(&mut self, v: u8) {
        self.freq = (self.freq & 0xFF) | (u16::from(v & 7) << 8);
        self.length_enabled = v & 0x40 != 0;
        if v & 0x80 != 0 {
            self.trigger();
        }
    }

    pub fn read_freq_hi(&self) -> u8 {
        if self.length_enabled {
            0x40
        } else {
            0
        }
    }

    /// The CPU sees whichever bank isn't selected for playback.
    pub fn read_ram(&self, offset: usize) -> u8 {
        self.ram[(self.bank ^ 1) * 16 + (offset & 0xF)]
    }

    pub fn write_ram(&mut self, offset: usize, v: u8) {
        self.ram[(self.bank ^ 1) * 16 + (offset & 0xF)] = v;
    }

    fn trigger(&mut self) {
        if !self.dac_enabled {
            return;
        }
        self.enabled = true;
        if self.length == 0 {
            self.length = 256;
        }
        self.timer = self.period();
        self.position = 0;
    }

    pub fn step(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }
        self.timer -= cycles as i32;
        while self.timer <= 0 {
            self.timer += self.period();
            let samples = if self.two_banks { 64 } else { 32 };
            self.position = (self.position + 1) % samples;

            let bank = if self.two_banks {
                (self.bank + self.position / 32) & 1
            } else {
                self.bank
            };
            let byte = self.ram[bank * 16 + (self.position % 32) / 2];
            self.sample = if self.position % 2 == 0 { byte >> 4 } else { byte & 0xF };
        }
    }

    pub fn step_length(&mut self) {
        step_length(&mut self.enabled, self.length_enabled, &mut self.length);
    }

    pub fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        if self.force_volume {
            return self.sample * 3 / 4;
        }
        match self.volume_shift {
            0 => 0,
            shift => self.sample >> (shift - 1),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Noise {
    pub enabled: bool,
    pub envelope: Envelope,
    pub length: u16,
    pub length_enabled: bool,
    pub divisor_code: u8,
    pub narrow: bool, // 7 bit LFSR
    pub clock_shift: u8,

    lfsr: u16,
    timer: i32,
}

impl Default for Noise {
    fn default() -> Noise {
        Noise {
            enabled: false,
            envelope: Default::default(),
            length: 0,
            length_enabled: false,
            divisor_code: 0,
            narrow: false,
            clock_shift: 0,
            lfsr: 0x7FFF,
            timer: 0,
        }
    }
}

impl Noise {
    fn period(&self) -> i32 {
        ((NOISE_DIVISORS[self.divisor_code as usize] << self.clock_shift) * 4) as i32
    }

    pub fn write_length(&mut self, v: u8) {
        self.length = 64 - u16::from(v & 0x3F);
    }

    pub fn write_envelope(&mut self, v: u8) {
        self.envelope.write(v);
    }

    pub fn read_envelope(&self) -> u8 {
        self.envelope.read()
    }

    pub fn write_poly(&mut self, v: u8) {
        self.divisor_code = v & 7;
        self.narrow = v & 0x08 != 0;
        self.clock_shift = v >> 4;
    }

    pub fn read_poly(&self) -> u8 {
        self.divisor_code | if self.narrow { 0x08 } else { 0 } | (self.clock_shift << 4)
    }

    pub fn write_control(&mut self, v: u8) {
        self.length_enabled = v & 0x40 != 0;
        if v & 0x80 != 0 {
            self.trigger();
        }
    }

    pub fn read_control(&self) -> u8 {
        if self.length_enabled {
            0x40
        } else {
            0
        }
    }

    fn trigger(&mut self) {
        self.enabled = true;
        if self.length == 0 {
            self.length = 64;
        }
        self.timer = self.period();
        self.envelope.trigger();
        self.lfsr = 0x7FFF;
    }

    pub fn step(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }
        self.timer -= cycles as i32;
        while self.timer <= 0 {
            self.timer += self.period();
            let feedback = (self.lfsr ^ (self.lfsr >> 1)) & 1;
            self.lfsr = (self.lfsr >> 1) | (feedback << 14);
            if self.narrow {
                self.lfsr = (self.lfsr & !(1 << 6)) | (feedback << 6);
            }
        }
    }

    pub fn step_length(&mut self) {
        step_length(&mut self.enabled, self.length_enabled, &mut self.length);
    }

    pub fn output(&self) -> u8 {
        if self.enabled && self.lfsr & 1 == 0 {
            self.envelope.volume
        } else {
            0
        }
    }
}
