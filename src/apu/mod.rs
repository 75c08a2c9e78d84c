//! The GBA sound hardware. On top of the four Gameboy channels there are two "Direct Sound" channels, each fed by a
//! 32 byte FIFO of signed 8-bit PCM samples. The FIFOs are topped up by DMA and drained at a rate set by timer 0 or 1:
//! every time the selected timer overflows, the next sample is played.
//! Everything is mixed down here into mono f32 samples at the host's sample rate.

pub mod channel;

use crate::dma::{self, DmaController};
use channel::{Noise, Pulse, Wave};
use serde::{Deserialize, Serialize};

pub const CLOCK_RATE: f64 = 16_777_216.0;
const FRAME_SEQUENCER_PERIOD: u32 = 32768; // 512Hz
const FIFO_SIZE: usize = 32;
const FIFO_REFILL_THRESHOLD: usize = 16;
const SOUND_MAX: f32 = 2047.0;

/// One of the two Direct Sound FIFOs.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Fifo {
    data: [i8; FIFO_SIZE],
    head: usize,
    len: usize,
    pub sample: i8, // The sample currently being played.
}

impl Fifo {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, v: i8) {
        if self.len < FIFO_SIZE {
            self.data[(self.head + self.len) % FIFO_SIZE] = v;
            self.len += 1;
        }
    }

    fn pop(&mut self) {
        if self.len > 0 {
            self.sample = self.data[self.head];
            self.head = (self.head + 1) % FIFO_SIZE;
            self.len -= 1;
        }
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct Apu {
    pub enabled: bool,     // SOUNDCNT_X bit 7
    pub soundcnt_l: u16,   // 0x4000080, legacy channel volume and routing
    pub soundcnt_h: u16,   // 0x4000082, mixing ratios and Direct Sound control
    pub soundbias: u16,    // 0x4000088

    pub pulse1: Pulse,
    pub pulse2: Pulse,
    pub wave: Wave,
    pub noise: Noise,
    pub fifo_a: Fifo,
    pub fifo_b: Fifo,

    sample_rate: u32,
    sample_cycles: f64,
    seq_cycles: u32,
    seq_step: u8,
}

impl Apu {
    pub fn new(sample_rate: u32) -> Apu {
        Apu {
            enabled: false,
            soundcnt_l: 0,
            soundcnt_h: 0,
            soundbias: 0x200,
            pulse1: Default::default(),
            pulse2: Default::default(),
            wave: Default::default(),
            noise: Default::default(),
            fifo_a: Default::default(),
            fifo_b: Default::default(),
            sample_rate: sample_rate.max(1),
            sample_cycles: 0.0,
            seq_cycles: 0,
            seq_step: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Apu::new(self.sample_rate);
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
    }

    /// Advances the sound hardware by some number of cycles, pushing any generated samples onto `out`.
    pub fn step(&mut self, cycles: u32, out: &mut Vec<f32>) {
        if !self.enabled {
            return;
        }

        self.pulse1.step(cycles);
        self.pulse2.step(cycles);
        self.wave.step(cycles);
        self.noise.step(cycles);

        self.seq_cycles += cycles;
        while self.seq_cycles >= FRAME_SEQUENCER_PERIOD {
            self.seq_cycles -= FRAME_SEQUENCER_PERIOD;
            self.clock_frame_sequencer();
        }

        self.sample_cycles += f64::from(cycles);
        let cycles_per_sample = CLOCK_RATE / f64::from(self.sample_rate);
        while self.sample_cycles >= cycles_per_sample {
            self.sample_cycles -= cycles_per_sample;
            out.push(self.mix());
        }
    }

    fn clock_frame_sequencer(&mut self) {
        if self.seq_step % 2 == 0 {
            self.pulse1.step_length();
            self.pulse2.step_length();
            self.wave.step_length();
            self.noise.step_length();
        }
        if self.seq_step == 2 || self.seq_step == 6 {
            self.pulse1.step_sweep();
        }
        if self.seq_step == 7 {
            self.pulse1.envelope.step();
            self.pulse2.envelope.step();
            self.noise.envelope.step();
        }
        self.seq_step = (self.seq_step + 1) % 8;
    }

    /// Mixes the current output of every channel into a single mono sample in the range -1.0 - 1.0.
    pub fn mix(&self) -> f32 {
        let ratio = [0.25, 0.5, 1.0, 1.0][(self.soundcnt_h & 3) as usize];
        let legacy = [
            self.pulse1.output(),
            self.pulse2.output(),
            self.wave.output(),
            self.noise.output(),
        ];

        let (mut left, mut right) = (0.0, 0.0);
        for (i, out) in legacy.iter().enumerate() {
            let v = f32::from(*out) * ratio;
            if self.soundcnt_l & (0x100 << i) != 0 {
                right += v;
            }
            if self.soundcnt_l & (0x1000 << i) != 0 {
                left += v;
            }
        }
        right *= f32::from(self.soundcnt_l & 7) + 1.0;
        left *= f32::from((self.soundcnt_l >> 4) & 7) + 1.0;

        // Direct Sound is 8-bit PCM on a 10-bit scale, at either 50% or 100% volume.
        let a = f32::from(self.fifo_a.sample) * if self.soundcnt_h & 0x04 != 0 { 4.0 } else { 2.0 };
        let b = f32::from(self.fifo_b.sample) * if self.soundcnt_h & 0x08 != 0 { 4.0 } else { 2.0 };
        if self.soundcnt_h & 0x0100 != 0 {
            right += a;
        }
        if self.soundcnt_h & 0x0200 != 0 {
            left += a;
        }
        if self.soundcnt_h & 0x1000 != 0 {
            right += b;
        }
        if self.soundcnt_h & 0x2000 != 0 {
            left += b;
        }

        let left = left.max(-2048.0).min(2047.0);
        let right = right.max(-2048.0).min(2047.0);
        (left + right) / 2.0 / SOUND_MAX
    }

    fn fifo_timer(&self, fifo: dma::Fifo) -> usize {
        let bit = match fifo {
            dma::Fifo::A => 0x0400,
            dma::Fifo::B => 0x4000,
        };
        if self.soundcnt_h & bit != 0 {
            1
        } else {
            0
        }
    }

    /// Called when timer 0 or 1 overflows. Each FIFO clocked by that timer moves on to its next sample, and asks for
    /// a refill from DMA once it's half empty.
    pub fn on_timer_overflow(&mut self, timer: usize, dma: &mut DmaController) {
        if !self.enabled {
            return;
        }
        for &which in &[dma::Fifo::A, dma::Fifo::B] {
            if self.fifo_timer(which) != timer {
                continue;
            }
            let fifo = match which {
                dma::Fifo::A => &mut self.fifo_a,
                dma::Fifo::B => &mut self.fifo_b,
            };
            fifo.pop();
            if fifo.len() <= FIFO_REFILL_THRESHOLD {
                dma.on_fifo_request(which);
            }
        }
    }

    /// Read from the 0x4000060 - 0x40000A7 register range.
    pub fn read_register(&self, addr: u32) -> u8 {
        match addr {
            0x60 => self.pulse1.read_sweep(),
            0x62 => self.pulse1.read_duty(),
            0x63 => self.pulse1.read_envelope(),
            0x65 => self.pulse1.read_freq_hi(),
            0x68 => self.pulse2.read_duty(),
            0x69 => self.pulse2.read_envelope(),
            0x6D => self.pulse2.read_freq_hi(),
            0x70 => self.wave.read_control(),
            0x73 => self.wave.read_volume(),
            0x75 => self.wave.read_freq_hi(),
            0x79 => self.noise.read_envelope(),
            0x7C => self.noise.read_poly(),
            0x7D => self.noise.read_control(),
            0x80 => self.soundcnt_l as u8,
            0x81 => (self.soundcnt_l >> 8) as u8,
            0x82 => self.soundcnt_h as u8,
            0x83 => ((self.soundcnt_h >> 8) as u8) & 0x77, // FIFO reset bits read back as 0
            0x84 => {
                (if self.enabled { 0x80 } else { 0 })
                    | (self.pulse1.enabled as u8)
                    | ((self.pulse2.enabled as u8) << 1)
                    | ((self.wave.enabled as u8) << 2)
                    | ((self.noise.enabled as u8) << 3)
            }
            0x88 => self.soundbias as u8,
            0x89 => (self.soundbias >> 8) as u8,
            0x90..=0x9F => self.wave.read_ram((addr - 0x90) as usize),
            _ => 0,
        }
    }

    /// Write to the 0x4000060 - 0x40000A7 register range.
    pub fn write_register(&mut self, addr: u32, v: u8) {
        // While the master enable is off, only the control registers, wave RAM and FIFOs can be written.
        if !self.enabled && addr < 0x80 {
            return;
        }

        match addr {
            0x60 => self.pulse1.write_sweep(v),
            0x62 => self.pulse1.write_duty_length(v),
            0x63 => self.pulse1.write_envelope(v),
            0x64 => self.pulse1.write_freq_lo(v),
            0x65 => self.pulse1.write_freq_hi(v),
            0x68 => self.pulse2.write_duty_length(v),
            0x69 => self.pulse2.write_envelope(v),
            0x6C => self.pulse2.write_freq_lo(v),
            0x6D => self.pulse2.write_freq_hi(v),
            0x70 => self.wave.write_control(v),
            0x72 => self.wave.write_length(v),
            0x73 => self.wave.write_volume(v),
            0x74 => self.wave.write_freq_lo(v),
            0x75 => self.wave.write_freq_hi(v),
            0x78 => self.noise.write_length(v),
            0x79 => self.noise.write_envelope(v),
            0x7C => self.noise.write_poly(v),
            0x7D => self.noise.write_control(v),
            0x80 => self.soundcnt_l = (self.soundcnt_l & 0xFF00) | u16::from(v),
            0x81 => self.soundcnt_l = (self.soundcnt_l & 0x00FF) | (u16::from(v) << 8),
            0x82 => self.soundcnt_h = (self.soundcnt_h & 0xFF00) | u16::from(v),
            0x83 => {
                if v & 0x08 != 0 {
                    self.fifo_a.clear();
                }
                if v & 0x80 != 0 {
                    self.fifo_b.clear();
                }
                self.soundcnt_h = (self.soundcnt_h & 0x00FF) | (u16::from(v & 0x77) << 8);
            }
            0x84 => {
                let enabled = v & 0x80 != 0;
                if !enabled {
                    // Powering off the sound hardware clears every register. Wave RAM is left alone.
                    let ram = self.wave.ram;
                    let bias = self.soundbias;
                    self.reset();
                    self.wave.ram = ram;
                    self.soundbias = bias;
                } else if !self.enabled {
                    self.seq_cycles = 0;
                    self.seq_step = 0;
                }
                self.enabled = enabled;
            }
            0x88 => self.soundbias = (self.soundbias & 0xFF00) | u16::from(v),
            0x89 => self.soundbias = (self.soundbias & 0x00FF) | (u16::from(v) << 8),
            0x90..=0x9F => self.wave.write_ram((addr - 0x90) as usize, v),
            0xA0..=0xA3 => self.fifo_a.push(v as i8),
            0xA4..=0xA7 => self.fifo_b.push(v as i8),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_apu() -> Apu {
        let mut apu = Apu::new(44100);
        apu.write_register(0x84, 0x80);
        apu
    }

    #[test]
    fn channel_writes_need_master_enable() {
        let mut apu = Apu::new(44100);
        apu.write_register(0x63, 0xF0);
        assert_eq!(apu.read_register(0x63), 0);
        apu.write_register(0x84, 0x80);
        apu.write_register(0x63, 0xF0);
        assert_eq!(apu.read_register(0x63), 0xF0);
    }

    #[test]
    fn master_disable_resets() {
        let mut apu = enabled_apu();
        apu.write_register(0x80, 0x77);
        apu.write_register(0x69, 0xF0);
        apu.write_register(0x6D, 0x80);
        assert_eq!(apu.read_register(0x84), 0x82);
        apu.write_register(0x84, 0);
        assert_eq!(apu.read_register(0x84), 0);
        assert_eq!(apu.read_register(0x80), 0);
    }

    #[test]
    fn sample_rate() {
        let mut apu = enabled_apu();
        let mut out = Vec::new();
        apu.step(280_896, &mut out);
        // 16777216 / 44100 ~= 380.4 cycles per sample.
        assert_eq!(out.len(), 738);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn fifo_drains_and_requests_dma() {
        let mut apu = enabled_apu();
        let mut dma = DmaController::new();
        // DMA1 -> FIFO A, special timing, repeat, 32 bit.
        for (i, b) in dma::FIFO_A_ADDR.to_le_bytes().iter().enumerate() {
            dma.write_register(0xBC + 4 + i as u32, *b);
        }
        dma.write_register(0xBC + 11, 0xB6);

        apu.write_register(0x83, 0x0B); // FIFO A: left + right, timer 0, reset
        for i in 0..20 {
            apu.write_register(0xA0, i);
        }
        assert_eq!(apu.fifo_a.len(), 20);

        for _ in 0..3 {
            apu.on_timer_overflow(0, &mut dma);
        }
        assert_eq!(apu.fifo_a.sample, 2);
        assert!(!dma.pending());

        apu.on_timer_overflow(1, &mut dma);
        assert_eq!(apu.fifo_a.len(), 17);
        apu.on_timer_overflow(0, &mut dma);
        assert_eq!(apu.fifo_a.len(), 16);
        assert!(dma.pending());
    }

    #[test]
    fn fifo_mix() {
        let mut apu = enabled_apu();
        apu.write_register(0x82, 0x04); // FIFO A 100%
        apu.write_register(0x83, 0x03); // FIFO A left + right
        apu.write_register(0xA0, 100);
        let mut dma = DmaController::new();
        apu.on_timer_overflow(0, &mut dma);
        assert_eq!(apu.mix(), 400.0 / 2047.0);

        apu.write_register(0x82, 0x00); // 50%
        assert_eq!(apu.mix(), 200.0 / 2047.0);
    }

    #[test]
    fn fifo_overflow_is_dropped() {
        let mut apu = enabled_apu();
        for _ in 0..40 {
            apu.write_register(0xA4, 1);
        }
        assert_eq!(apu.fifo_b.len(), 32);
        apu.write_register(0x83, 0x80);
        assert!(apu.fifo_b.is_empty());
    }
}
