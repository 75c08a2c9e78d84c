//! The whole machine. `Gba` owns every component by value and acts as the scheduler: it services DMA, steps the CPU,
//! and lets the cycles charged on the bus drive the rest of the hardware. A `GbaBus` borrows the components for the
//! duration of a single step.

use crate::apu::Apu;
use crate::backup::SaveDataError;
use crate::bus::{Bios, Ewram, GbaBus, Iwram, SystemControl, BIOS_LATCH_AFTER_BOOT};
use crate::cartridge::{Cartridge, MAX_ROM_SIZE};
use crate::cpu::{Bus, Cpu, DEFAULT_LOG_LIMIT};
use crate::dma::DmaController;
use crate::interrupt::InterruptController;
use crate::joypad::{Button, Joypad};
use crate::ppu::{Ppu, FRAME_CYCLES, SCREEN_SIZE};
use crate::serial::Serial;
use crate::snapshot::{self, Snapshot, SnapshotError};
use crate::timer::Timers;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Cycles a halted CPU lets pass between checks of the wake condition.
const HALT_CYCLES: u32 = 4;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Output rate of the audio stream, in Hz.
    pub sample_rate: u32,
    /// Start executing the cartridge right away, with the register state the BIOS would have left behind.
    pub skip_bios: bool,
    /// How many serial output characters are kept before the oldest get dropped.
    pub serial_buffer_limit: usize,
    /// How many consecutive unhandled opcodes get logged.
    pub unhandled_opcode_log_limit: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            sample_rate: 44100,
            skip_bios: false,
            serial_buffer_limit: 4096,
            unhandled_opcode_log_limit: DEFAULT_LOG_LIMIT,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LoadError {
    #[error("no BIOS image provided")]
    MissingBios,
    #[error("BIOS image is {0} bytes, the most that fits is 16384")]
    BiosTooLarge(usize),
    #[error("cartridge ROM is empty")]
    EmptyRom,
    #[error("cartridge ROM is {0} bytes, the most that fits is 32MB")]
    RomTooLarge(usize),
}

/// Host facing output of the emulation. None of this is part of the emulated machine, so none of it is snapshotted.
pub struct Context {
    pub framebuffer: Vec<u32>,
    pub frame_ready: bool,
    pub audio: Vec<f32>,
    serial: VecDeque<u8>,
    serial_limit: usize,
}

impl Default for Context {
    fn default() -> Context {
        Context {
            framebuffer: vec![0; SCREEN_SIZE],
            frame_ready: false,
            audio: Vec::new(),
            serial: VecDeque::new(),
            serial_limit: Config::default().serial_buffer_limit,
        }
    }
}

impl Context {
    pub fn push_serial(&mut self, byte: u8) {
        if self.serial_limit == 0 {
            return;
        }
        while self.serial.len() >= self.serial_limit {
            self.serial.pop_front();
        }
        self.serial.push_back(byte);
    }
}

#[derive(Deserialize, Serialize)]
pub struct Gba {
    pub cycle_count: u64, // The total number of cycles that have elapsed since emulation began
    pub frame_count: u64, // The total number of frames we've rendered since emulation began
    frame_deadline: u64,  // Cycle count at which the current run_frame budget ends

    pub cpu: Cpu,
    pub bios: Bios,   // 0x0000000 - 0x0003FFF
    pub ewram: Ewram, // 0x2000000 - 0x203FFFF
    pub iwram: Iwram, // 0x3000000 - 0x3007FFF
    pub system: SystemControl,

    pub apu: Apu,
    pub cart: Cartridge,
    pub dma: DmaController,
    pub interrupts: InterruptController,
    pub joypad: Joypad,
    pub ppu: Ppu,
    pub serial: Serial,
    pub timers: Timers,

    #[serde(skip)]
    ctx: Context,
    #[serde(skip)]
    config: Config,
}

impl Gba {
    pub fn new(bios: &[u8], rom: Vec<u8>) -> Result<Gba, LoadError> {
        Gba::with_config(bios, rom, Config::default())
    }

    pub fn with_config(bios: &[u8], rom: Vec<u8>, config: Config) -> Result<Gba, LoadError> {
        if bios.is_empty() {
            return Err(LoadError::MissingBios);
        }
        if bios.len() > Bios::SIZE {
            return Err(LoadError::BiosTooLarge(bios.len()));
        }
        if rom.is_empty() {
            return Err(LoadError::EmptyRom);
        }
        if rom.len() > MAX_ROM_SIZE {
            return Err(LoadError::RomTooLarge(rom.len()));
        }

        let mut bios_segment = Bios::default();
        bios_segment[..bios.len()].copy_from_slice(bios);

        let mut cpu = Cpu::new();
        cpu.set_log_limit(config.unhandled_opcode_log_limit);

        let mut gba = Gba {
            cycle_count: 0,
            frame_count: 0,
            frame_deadline: 0,

            cpu,
            bios: bios_segment,
            ewram: Default::default(),
            iwram: Default::default(),
            system: Default::default(),

            apu: Apu::new(config.sample_rate),
            cart: Cartridge::from_rom(rom),
            dma: DmaController::new(),
            interrupts: InterruptController::new(),
            joypad: Joypad::new(),
            ppu: Ppu::new(),
            serial: Serial::new(),
            timers: Timers::new(),

            ctx: Context {
                serial_limit: config.serial_buffer_limit,
                ..Default::default()
            },
            config,
        };

        gba.reset();
        if gba.config.skip_bios {
            gba.skip_bios();
        }
        Ok(gba)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&mut self) -> (&mut Cpu, GbaBus) {
        (
            &mut self.cpu,
            GbaBus {
                ctx: &mut self.ctx,
                cycle_count: &mut self.cycle_count,
                frame_count: &mut self.frame_count,

                bios: &self.bios,
                ewram: &mut self.ewram,
                iwram: &mut self.iwram,
                system: &mut self.system,

                apu: &mut self.apu,
                cart: &mut self.cart,
                dma: &mut self.dma,
                interrupts: &mut self.interrupts,
                joypad: &mut self.joypad,
                ppu: &mut self.ppu,
                serial: &mut self.serial,
                timers: &mut self.timers,
            },
        )
    }

    /// Hard reset. Everything but the BIOS, the cartridge and its save data goes back to its power-on state.
    pub fn reset(&mut self) {
        self.cycle_count = 0;
        self.frame_count = 0;
        self.frame_deadline = 0;
        self.ewram.clear();
        self.iwram.clear();
        self.system.reset();
        self.apu.reset();
        self.dma.reset();
        self.interrupts.reset();
        self.joypad.reset();
        self.ppu.reset();
        self.serial.reset();
        self.timers.reset();
        self.ctx.frame_ready = false;

        let (cpu, mut bus) = self.bus();
        cpu.reset(&mut bus);
    }

    /// Skips the BIOS boot animation and starts executing the cartridge right away.
    pub fn skip_bios(&mut self) {
        self.system.postflg = 1;
        let (cpu, mut bus) = self.bus();
        cpu.skip_bios(&mut bus);
        self.system.bios_latch = BIOS_LATCH_AFTER_BOOT;
    }

    /// Advances the machine by one scheduling unit: a DMA transfer if one is queued, a halted wait, or one instruction.
    pub fn step(&mut self) {
        let (cpu, mut bus) = self.bus();
        if bus.service_dma() {
            return;
        }

        if bus.system.halted {
            if bus.interrupts.pending() {
                bus.system.halted = false;
            } else {
                bus.tick(HALT_CYCLES);
                return;
            }
        }

        cpu.step(&mut bus);
    }

    /// Runs one frame worth of cycles, and returns the frame if the PPU delivered one along the way. Whatever the last
    /// step overshoots the budget by is taken off the next frame, so frames stay FRAME_CYCLES apart on average.
    pub fn run_frame(&mut self) -> Option<&[u32]> {
        let budget = u64::from(FRAME_CYCLES);
        // Cycles run outside of run_frame (single stepping) beyond a whole frame aren't carried over.
        if self.cycle_count >= self.frame_deadline + budget {
            self.frame_deadline = self.cycle_count;
        }
        self.frame_deadline += budget;

        self.ctx.frame_ready = false;
        while self.cycle_count < self.frame_deadline {
            self.step();
        }

        if self.ctx.frame_ready {
            Some(&self.ctx.framebuffer)
        } else {
            None
        }
    }

    /// The most recently rendered frame, as 0x00RRGGBB pixels.
    pub fn framebuffer(&self) -> &[u32] {
        &self.ctx.framebuffer
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.joypad.set_button(button, pressed, &mut self.interrupts);
    }

    pub fn save_data(&self) -> Option<&[u8]> {
        self.cart.save.data()
    }

    pub fn load_save_data(&mut self, data: &[u8]) -> Result<(), SaveDataError> {
        self.cart.save.load(data)
    }

    /// Takes everything written to the serial port since the last call.
    pub fn drain_serial(&mut self) -> String {
        let bytes: Vec<u8> = self.ctx.serial.drain(..).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Takes every audio sample generated since the last call.
    pub fn drain_audio(&mut self) -> Vec<f32> {
        std::mem::replace(&mut self.ctx.audio, Vec::new())
    }

    pub fn state_dump(&self) -> String {
        self.to_string()
    }

    pub fn capture_snapshot(&self) -> Result<Snapshot, SnapshotError> {
        snapshot::encode(self)
    }

    /// Replaces the whole machine state with the one in `snapshot`. Host side state (pending audio and serial output,
    /// the configuration) is kept. On error, the current state is left untouched.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let mut restored = snapshot::decode(snapshot)?;
        if restored.cart.is_empty() {
            return Err(SnapshotError::MissingCartridge);
        }

        std::mem::swap(&mut restored.ctx, &mut self.ctx);
        std::mem::swap(&mut restored.config, &mut self.config);
        restored.apu.set_sample_rate(restored.config.sample_rate);
        restored.cpu.set_log_limit(restored.config.unhandled_opcode_log_limit);
        *self = restored;
        info!("Restored snapshot at frame {}", self.frame_count);
        Ok(())
    }
}
