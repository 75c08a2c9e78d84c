//! GBA interrupt controller.
//! Fourteen hardware sources can request an interrupt by setting their bit in IF (0x4000202). A request is only
//! *eligible* if the matching bit in IE (0x4000200) is also set. An eligible request is enough to wake the CPU from a
//! halt, even with IME (0x4000208) cleared. Actually taking the IRQ exception additionally needs IME set and the I bit
//! in CPSR clear, that last part is checked by the CPU itself.
//! Software acknowledges a request by writing a 1 to its bit in IF.

use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct InterruptController {
    pub master_enable: bool, // 0x4000208 IME register bit 0
    pub enable: u16,         // 0x4000200 IE register
    pub request: u16,        // 0x4000202 IF register
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[rustfmt::skip]
pub enum Interrupt {
    VBlank  = 1 << 0,
    HBlank  = 1 << 1,
    VCount  = 1 << 2,
    Timer0  = 1 << 3,
    Timer1  = 1 << 4,
    Timer2  = 1 << 5,
    Timer3  = 1 << 6,
    Serial  = 1 << 7,
    Dma0    = 1 << 8,
    Dma1    = 1 << 9,
    Dma2    = 1 << 10,
    Dma3    = 1 << 11,
    Keypad  = 1 << 12,
    GamePak = 1 << 13,
}
use Interrupt::*;

pub const ALL_INTERRUPTS: [Interrupt; 14] = [
    VBlank, HBlank, VCount, Timer0, Timer1, Timer2, Timer3, Serial, Dma0, Dma1, Dma2, Dma3, Keypad, GamePak,
];

impl Interrupt {
    pub fn timer(id: usize) -> Interrupt {
        [Timer0, Timer1, Timer2, Timer3][id & 3]
    }

    pub fn dma(id: usize) -> Interrupt {
        [Dma0, Dma1, Dma2, Dma3][id & 3]
    }

    pub fn name(self) -> &'static str {
        match self {
            VBlank => "VBlank",
            HBlank => "HBlank",
            VCount => "VCount",
            Timer0 => "Timer0",
            Timer1 => "Timer1",
            Timer2 => "Timer2",
            Timer3 => "Timer3",
            Serial => "Serial",
            Dma0 => "DMA0",
            Dma1 => "DMA1",
            Dma2 => "DMA2",
            Dma3 => "DMA3",
            Keypad => "Keypad",
            GamePak => "GamePak",
        }
    }
}

impl InterruptController {
    pub fn new() -> InterruptController {
        Default::default()
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }

    /// Request an interrupt.
    pub fn request(&mut self, intr: Interrupt) {
        self.request |= intr as u16;
    }

    /// True if any requested interrupt is also enabled. This is the condition that wakes a halted CPU.
    pub fn pending(&self) -> bool {
        self.enable & self.request & 0x3FFF != 0
    }

    /// True if the IRQ exception should be taken, ignoring the CPSR I bit (the CPU checks that).
    pub fn irq_line(&self) -> bool {
        self.master_enable && self.pending()
    }

    pub fn reg_ie_read(&self) -> u16 {
        self.enable
    }

    pub fn reg_ie_write(&mut self, v: u16) {
        self.enable = v & 0x3FFF;
    }

    pub fn reg_if_read(&self) -> u16 {
        self.request
    }

    // Writing a 1 to a bit in IF acknowledges (clears) it.
    pub fn reg_if_write(&mut self, v: u16) {
        self.request &= !v;
    }

    pub fn reg_ime_read(&self) -> u16 {
        self.master_enable as u16
    }

    pub fn reg_ime_write(&mut self, v: u16) {
        self.master_enable = v & 1 == 1;
    }

    /// Names of all currently requested interrupts, for diagnostics.
    pub fn requested_names(&self) -> Vec<&'static str> {
        ALL_INTERRUPTS
            .iter()
            .filter(|i| self.request & (**i as u16) != 0)
            .map(|i| i.name())
            .collect()
    }
}
