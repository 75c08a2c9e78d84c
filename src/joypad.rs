//! The GBA has 10 buttons, the 8 from the Gameboy plus two shoulder buttons. Their state is read from KEYINPUT
//! (0x4000130), where a cleared bit means pressed. KEYCNT (0x4000132) can request the keypad interrupt when either
//! any (OR mode) or all (AND mode) of a selected group of buttons are held down.

use crate::interrupt::{Interrupt, InterruptController};
use serde::{Deserialize, Serialize};

const ALL_KEYS: u16 = 0x03FF;

#[derive(Clone, Copy, Deserialize, Serialize)]
pub struct Joypad {
    pub keyinput: u16,
    pub keycnt: u16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[rustfmt::skip]
pub enum Button {
    A       = 1 << 0,
    B       = 1 << 1,
    Select  = 1 << 2,
    Start   = 1 << 3,
    Right   = 1 << 4,
    Left    = 1 << 5,
    Up      = 1 << 6,
    Down    = 1 << 7,
    R       = 1 << 8,
    L       = 1 << 9,
}

impl Default for Joypad {
    fn default() -> Joypad {
        // Nothing is pressed at power on, which means all bits are set.
        Joypad {
            keyinput: ALL_KEYS,
            keycnt: 0,
        }
    }
}

impl Joypad {
    pub fn new() -> Joypad {
        Default::default()
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }

    pub fn set_button(&mut self, button: Button, pressed: bool, interrupts: &mut InterruptController) {
        if pressed {
            self.keyinput &= !(button as u16);
            self.check_interrupt(interrupts);
        } else {
            self.keyinput |= button as u16;
        }
    }

    fn check_interrupt(&self, interrupts: &mut InterruptController) {
        if self.keycnt & 0x4000 == 0 {
            return;
        }
        let held = !self.keyinput & ALL_KEYS;
        let selected = self.keycnt & ALL_KEYS;
        let hit = if self.keycnt & 0x8000 != 0 {
            held & selected == selected
        } else {
            held & selected != 0
        };
        if hit {
            interrupts.request(Interrupt::Keypad);
        }
    }

    /// Read from the 0x4000130 - 0x4000133 register range.
    pub fn read_register(&self, addr: u32) -> u8 {
        match addr & 3 {
            0 => self.keyinput as u8,
            1 => (self.keyinput >> 8) as u8,
            2 => self.keycnt as u8,
            _ => (self.keycnt >> 8) as u8,
        }
    }

    /// Write to the 0x4000130 - 0x4000133 register range. KEYINPUT is read only.
    pub fn write_register(&mut self, addr: u32, v: u8) {
        match addr & 3 {
            2 => self.keycnt = (self.keycnt & 0xFF00) | u16::from(v),
            3 => self.keycnt = (self.keycnt & 0x00FF) | (u16::from(v) << 8),
            _ => {}
        }
    }
}
