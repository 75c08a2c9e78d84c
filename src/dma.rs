//! The GBA has four DMA channels that can copy memory around much faster than the CPU can. Channel 0 has the highest
//! priority and channel 3 the lowest. A channel starts either immediately when it's enabled, or at the start of
//! HBlank/VBlank, or (channels 1 and 2 only) when one of the sound FIFOs is running low.
//! Triggers are queued up here as events and serviced one at a time by the bus: each event starts the highest priority
//! channel armed for it. While a transfer runs the CPU is stalled, so the
//! whole copy happens in one go.
//! Because of Rust borrowing rules the copy itself can't happen inside the controller: instead the next pending
//! transfer is handed out as a `Transfer`, which the bus runs against itself and then hands back.

use crate::cpu::Bus;
use crate::interrupt::{Interrupt, InterruptController};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const FIFO_A_ADDR: u32 = 0x0400_00A0;
pub const FIFO_B_ADDR: u32 = 0x0400_00A4;

/// The start timing of a channel, bits 12-13 of the control register.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Timing {
    Immediate,
    VBlank,
    HBlank,
    Special,
}

/// How the source or destination address moves after each unit.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AddressControl {
    Increment,
    Decrement,
    Fixed,
    IncrementReload,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Fifo {
    A,
    B,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
enum Trigger {
    Timing(Timing),
    Fifo(Fifo),
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct DmaChannel {
    pub source: u32,  // 0x40000B0 + n*12, write only
    pub dest: u32,    // 0x40000B4 + n*12, write only
    pub count: u16,   // 0x40000B8 + n*12, write only
    pub control: u16, // 0x40000BA + n*12

    // The working copies of the address registers. These are latched when the channel is enabled and carry on
    // from where they left off across repeats.
    internal_source: u32,
    internal_dest: u32,
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct DmaController {
    pub channels: [DmaChannel; 4],
    queue: VecDeque<Trigger>,
}

/// A transfer that's ready to be run against the bus.
#[derive(Debug)]
pub struct Transfer {
    pub channel: usize,
    pub source: u32,
    pub dest: u32,
    pub units: u32,
    pub word: bool,
    source_control: AddressControl,
    dest_control: AddressControl,
    fifo: Option<u32>, // Sound FIFO register the destination wraps within, for increment/reload FIFO transfers.
}

impl AddressControl {
    fn from_bits(v: u16) -> AddressControl {
        match v & 3 {
            0 => AddressControl::Increment,
            1 => AddressControl::Decrement,
            2 => AddressControl::Fixed,
            _ => AddressControl::IncrementReload,
        }
    }

    fn step(self, addr: u32, size: u32) -> u32 {
        match self {
            AddressControl::Increment | AddressControl::IncrementReload => addr.wrapping_add(size),
            AddressControl::Decrement => addr.wrapping_sub(size),
            AddressControl::Fixed => addr,
        }
    }
}

impl DmaChannel {
    pub fn enabled(&self) -> bool {
        self.control & 0x8000 != 0
    }

    pub fn timing(&self) -> Timing {
        match (self.control >> 12) & 3 {
            0 => Timing::Immediate,
            1 => Timing::VBlank,
            2 => Timing::HBlank,
            _ => Timing::Special,
        }
    }

    fn repeat(&self) -> bool {
        self.control & 0x0200 != 0
    }

    fn irq(&self) -> bool {
        self.control & 0x4000 != 0
    }

    fn word(&self) -> bool {
        self.control & 0x0400 != 0
    }

    pub fn dest_control(&self) -> AddressControl {
        AddressControl::from_bits(self.control >> 5)
    }

    pub fn source_control(&self) -> AddressControl {
        AddressControl::from_bits(self.control >> 7)
    }

    pub fn internal_source(&self) -> u32 {
        self.internal_source
    }

    pub fn internal_dest(&self) -> u32 {
        self.internal_dest
    }

    fn units(&self, id: usize) -> u32 {
        match (self.count, id) {
            (0, 3) => 0x1_0000,
            (0, _) => 0x4000,
            (n, 3) => u32::from(n),
            (n, _) => u32::from(n & 0x3FFF),
        }
    }
}

impl Trigger {
    /// Whether channel `id` is armed for this trigger. Only channels 1 and 2 can feed the sound FIFOs.
    fn starts(self, id: usize, ch: &DmaChannel) -> bool {
        if !ch.enabled() {
            return false;
        }
        match self {
            Trigger::Timing(timing) => ch.timing() == timing,
            Trigger::Fifo(fifo) => {
                let addr = match fifo {
                    Fifo::A => FIFO_A_ADDR,
                    Fifo::B => FIFO_B_ADDR,
                };
                (id == 1 || id == 2) && ch.timing() == Timing::Special && ch.dest == addr
            }
        }
    }
}

impl DmaController {
    pub fn new() -> DmaController {
        Default::default()
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }

    /// Read from the 0x40000B0 - 0x40000DF register range. Only the control registers are readable.
    pub fn read_register(&self, addr: u32) -> u8 {
        let offset = addr.wrapping_sub(0xB0);
        let (id, reg) = ((offset / 12) as usize, offset % 12);
        match (self.channels.get(id), reg) {
            (Some(ch), 10) => ch.control as u8,
            (Some(ch), 11) => (ch.control >> 8) as u8,
            _ => 0,
        }
    }

    /// Write to the 0x40000B0 - 0x40000DF register range.
    pub fn write_register(&mut self, addr: u32, v: u8) {
        let offset = addr.wrapping_sub(0xB0);
        let (id, reg) = ((offset / 12) as usize, offset % 12);
        if id > 3 {
            return;
        }

        let source_mask = if id == 0 { 0x07FF_FFFF } else { 0x0FFF_FFFF };
        let dest_mask = if id == 3 { 0x0FFF_FFFF } else { 0x07FF_FFFF };
        let ch = &mut self.channels[id];
        let v32 = u32::from(v);
        match reg {
            0..=3 => {
                let shift = reg * 8;
                ch.source = ((ch.source & !(0xFF << shift)) | (v32 << shift)) & source_mask;
            }
            4..=7 => {
                let shift = (reg - 4) * 8;
                ch.dest = ((ch.dest & !(0xFF << shift)) | (v32 << shift)) & dest_mask;
            }
            8 => ch.count = (ch.count & 0xFF00) | u16::from(v),
            9 => ch.count = (ch.count & 0x00FF) | (u16::from(v) << 8),
            10 => ch.control = (ch.control & 0xFF00) | u16::from(v),
            11 => {
                let was_enabled = ch.enabled();
                ch.control = (ch.control & 0x00FF) | (u16::from(v) << 8);
                if !was_enabled && ch.enabled() {
                    ch.internal_source = ch.source;
                    ch.internal_dest = ch.dest;
                    if ch.timing() == Timing::Immediate {
                        self.queue.push_back(Trigger::Timing(Timing::Immediate));
                    }
                }
            }
            _ => {}
        }
    }

    /// Queues one event for `trigger`, if any channel is armed for it.
    fn trigger(&mut self, trigger: Trigger) {
        if self.channels.iter().enumerate().any(|(id, ch)| trigger.starts(id, ch)) {
            self.queue.push_back(trigger);
        }
    }

    pub fn on_vblank(&mut self) {
        self.trigger(Trigger::Timing(Timing::VBlank));
    }

    pub fn on_hblank(&mut self) {
        self.trigger(Trigger::Timing(Timing::HBlank));
    }

    /// Called by the APU when one of its FIFOs wants refilling.
    pub fn on_fifo_request(&mut self, fifo: Fifo) {
        self.trigger(Trigger::Fifo(fifo));
    }

    pub fn pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Pops the next queued event and returns the transfer of the highest priority channel armed for it. At most one
    /// event is consumed per call, and it's dropped if no channel is armed for it anymore.
    pub fn next_transfer(&mut self) -> Option<Transfer> {
        let trigger = self.queue.pop_front()?;
        let (id, ch) = self.channels.iter().enumerate().find(|(id, ch)| trigger.starts(*id, ch))?;

        let dest_control = ch.dest_control();
        let fifo = match trigger {
            Trigger::Fifo(_) if dest_control == AddressControl::IncrementReload => Some(ch.dest),
            _ => None,
        };
        let transfer = Transfer {
            channel: id,
            source: ch.internal_source,
            dest: ch.internal_dest,
            units: ch.units(id),
            word: ch.word(),
            source_control: ch.source_control(),
            dest_control,
            fifo,
        };

        debug!(
            "DMA{} {:?}: {:#010X} -> {:#010X}, {} x {}",
            id,
            trigger,
            transfer.source,
            transfer.dest,
            transfer.units,
            if transfer.word { 32 } else { 16 }
        );
        Some(transfer)
    }

    /// Writes back the channel state after a transfer has been run, raising the completion IRQ if requested.
    pub fn finish(&mut self, transfer: &Transfer, interrupts: &mut InterruptController) {
        let ch = &mut self.channels[transfer.channel];
        ch.internal_source = transfer.source;
        ch.internal_dest = if transfer.dest_control == AddressControl::IncrementReload {
            ch.dest
        } else {
            transfer.dest
        };

        if ch.irq() {
            interrupts.request(Interrupt::dma(transfer.channel));
        }
        if !ch.repeat() || ch.timing() == Timing::Immediate {
            ch.control &= !0x8000;
        }
    }
}

impl Transfer {
    /// Copies every unit of the transfer, charging one internal cycle per unit on top of the bus access costs.
    pub fn run<B: Bus>(&mut self, bus: &mut B) {
        let size = if self.word { 4 } else { 2 };
        for _ in 0..self.units {
            if self.word {
                let v = bus.read32(self.source & !3);
                bus.write32(self.dest & !3, v);
            } else {
                let v = bus.read16(self.source & !1);
                bus.write16(self.dest & !1, v);
            }
            bus.tick(1);

            self.source = self.source_control.step(self.source, size);
            self.dest = self.dest_control.step(self.dest, size);
            if let Some(base) = self.fifo {
                self.dest = base + (self.dest.wrapping_sub(base) & 3);
            }
        }
    }
}
