//! The four GBA timers. Each one is a 16-bit up-counter clocked either by the system clock through a prescaler
//! (1, 64, 256 or 1024 cycles per tick), or in "cascade" mode by overflows of the timer before it. When a counter
//! overflows it's reloaded from its reload register and can optionally raise an interrupt. Timers 0 and 1 are also
//! the sample clocks for the two DMA sound FIFOs, so overflows are reported back out to the caller.

use crate::interrupt::{Interrupt, InterruptController};
use serde::{Deserialize, Serialize};

const PRESCALERS: [u32; 4] = [1, 64, 256, 1024];

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Timer {
    pub counter: u16, // 0x4000100 + n*4, read side
    pub reload: u16,  // 0x4000100 + n*4, write side
    pub control: u8,  // 0x4000102 + n*4
    cycles: u32,      // Cycles accumulated towards the next prescaler tick.
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Timers {
    pub timers: [Timer; 4],
}

impl Timer {
    fn enabled(&self) -> bool {
        self.control & 0x80 != 0
    }

    fn irq_enabled(&self) -> bool {
        self.control & 0x40 != 0
    }

    fn prescaler(&self) -> u32 {
        PRESCALERS[(self.control & 3) as usize]
    }

    /// Advances the counter by some number of ticks, returns how many times it overflowed.
    fn add_ticks(&mut self, mut ticks: u32) -> u32 {
        let mut overflows = 0;
        while ticks > 0 {
            let until_overflow = 0x1_0000 - u32::from(self.counter);
            if ticks >= until_overflow {
                ticks -= until_overflow;
                self.counter = self.reload;
                overflows += 1;
            } else {
                self.counter += ticks as u16;
                ticks = 0;
            }
        }
        overflows
    }
}

impl Timers {
    pub fn new() -> Timers {
        Default::default()
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }

    fn cascading(&self, id: usize) -> bool {
        id > 0 && self.timers[id].control & 0x04 != 0
    }

    /// Advances all timers by the given number of system clock cycles. Returns the number of overflows each timer
    /// had, so the APU can pull samples out of its FIFOs.
    pub fn step(&mut self, cycles: u32, interrupts: &mut InterruptController) -> [u32; 4] {
        let mut overflows = [0; 4];

        for id in 0..4 {
            if !self.timers[id].enabled() {
                continue;
            }

            let ticks = if self.cascading(id) {
                overflows[id - 1]
            } else {
                let timer = &mut self.timers[id];
                timer.cycles += cycles;
                let prescaler = timer.prescaler();
                let ticks = timer.cycles / prescaler;
                timer.cycles %= prescaler;
                ticks
            };

            if ticks == 0 {
                continue;
            }
            let timer = &mut self.timers[id];
            overflows[id] = timer.add_ticks(ticks);
            if overflows[id] > 0 && timer.irq_enabled() {
                interrupts.request(Interrupt::timer(id));
            }
        }

        overflows
    }

    /// Read from the 0x4000100 - 0x400010F register range.
    pub fn read_register(&self, addr: u32) -> u8 {
        let timer = &self.timers[((addr >> 2) & 3) as usize];
        match addr & 3 {
            0 => timer.counter as u8,
            1 => (timer.counter >> 8) as u8,
            2 => timer.control,
            _ => 0,
        }
    }

    /// Write to the 0x4000100 - 0x400010F register range.
    pub fn write_register(&mut self, addr: u32, v: u8) {
        let timer = &mut self.timers[((addr >> 2) & 3) as usize];
        match addr & 3 {
            0 => timer.reload = (timer.reload & 0xFF00) | u16::from(v),
            1 => timer.reload = (timer.reload & 0x00FF) | (u16::from(v) << 8),
            2 => {
                let was_enabled = timer.enabled();
                timer.control = v & 0xC7;
                if !was_enabled && timer.enabled() {
                    timer.counter = timer.reload;
                    timer.cycles = 0;
                }
            }
            _ => {}
        }
    }
}
