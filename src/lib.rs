//! oxidegba emulates the Game Boy Advance: an ARM7TDMI CPU with its memory bus, the PPU and APU, DMA, timers, the
//! interrupt controller and cartridge save chips. Presentation, audio output and input mapping are left to the host,
//! which drives a `Gba` one frame at a time and drains its video, audio and serial output.

pub mod apu;
pub mod backup;
pub mod bios;
pub mod bus;
pub mod cartridge;
pub mod cpu;
pub mod dma;
pub mod dump;
pub mod gba;
pub mod interrupt;
pub mod joypad;
pub mod pacer;
pub mod ppu;
pub mod serial;
pub mod snapshot;
pub mod timer;
pub mod util;

pub use backup::{SaveDataError, SaveType};
pub use gba::{Config, Gba, LoadError};
pub use joypad::Button;
pub use pacer::FramePacer;
pub use ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
pub use snapshot::{Snapshot, SnapshotError};
