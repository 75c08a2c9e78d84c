//! The serial (link cable) port. There's no link partner emulated here, but homebrew and test ROMs commonly use the
//! port in 8-bit normal mode as a debug UART: a byte is written to SIODATA8 (0x400012A) and a transfer is kicked off
//! by writing 0x81 (start, internal clock) to SIOCNT (0x4000128). Those bytes are handed back to the caller so they
//! can be surfaced as a text stream.

use crate::interrupt::{Interrupt, InterruptController};
use serde::{Deserialize, Serialize};

const SIOCNT: usize = 0x08;
const SIODATA8: usize = 0x0A;
const START_INTERNAL_CLOCK: u8 = 0x81;

/// The 0x4000120 - 0x400012B register block, stored as raw bytes.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Serial {
    regs: [u8; 12],
}

impl Serial {
    pub fn new() -> Serial {
        Default::default()
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }

    pub fn read_register(&self, addr: u32) -> u8 {
        self.regs.get(addr.wrapping_sub(0x120) as usize).copied().unwrap_or(0)
    }

    /// Write to the serial register block. Returns the byte that was shifted out if this write started a transfer.
    pub fn write_register(&mut self, addr: u32, v: u8, interrupts: &mut InterruptController) -> Option<u8> {
        let offset = addr.wrapping_sub(0x120) as usize;
        if offset >= self.regs.len() {
            return None;
        }
        self.regs[offset] = v;

        if offset != SIOCNT || v != START_INTERNAL_CLOCK {
            return None;
        }

        // The transfer completes instantly: clear the start bit, and fire the IRQ if it's enabled.
        self.regs[SIOCNT] &= !0x80;
        if self.regs[SIOCNT + 1] & 0x40 != 0 {
            interrupts.request(Interrupt::Serial);
        }
        Some(self.regs[SIODATA8])
    }
}
