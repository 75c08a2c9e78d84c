//! The system bus. Every CPU and DMA memory access comes through here, gets decoded to the component that owns the
//! address, and is charged its wait states. Charging cycles is what drives the rest of the machine: each tick runs
//! the timers, the PPU and the APU forward by the same amount.
//!
//! Memory map:
//!   0x00000000 - 0x00003FFF  BIOS (only readable while executing from it)
//!   0x02000000 - 0x0203FFFF  EWRAM, 256KB, 16 bit bus, mirrored across the region
//!   0x03000000 - 0x03007FFF  IWRAM, 32KB, mirrored
//!   0x04000000 - 0x040003FF  I/O registers
//!   0x05000000 - 0x050003FF  Palette RAM
//!   0x06000000 - 0x06017FFF  VRAM
//!   0x07000000 - 0x070003FF  OAM
//!   0x08000000 - 0x0DFFFFFF  Game Pak ROM, in three wait state windows
//!   0x0E000000 - 0x0E00FFFF  Game Pak SRAM/Flash

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::cpu::Bus;
use crate::dma::DmaController;
use crate::gba::Context;
use crate::interrupt::InterruptController;
use crate::joypad::Joypad;
use crate::memory_segment;
use crate::ppu::Ppu;
use crate::serial::Serial;
use crate::timer::Timers;
use serde::{Deserialize, Serialize};

memory_segment! { Bios; 0x4000 }
memory_segment! { Ewram; 0x4_0000 }
memory_segment! { Iwram; 0x8000 }

/// What an ARM CPU sees reading BIOS right after the firmware hands control to the cartridge.
pub const BIOS_LATCH_AFTER_BOOT: u32 = 0xE129_F000;

const ROM_FIRST_ACCESS: [u32; 4] = [4, 3, 2, 8];

/// System control registers (WAITCNT, POSTFLG, HALTCNT), plus the bus state the hardware keeps between accesses.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct SystemControl {
    pub waitcnt: u16, // 0x4000204
    pub postflg: u8,  // 0x4000300
    pub halted: bool, // Set through HALTCNT (0x4000301) or the Halt firmware call.

    pub executing_bios: bool,
    pub bios_latch: u32, // The last opcode fetched from BIOS.
    pub open_bus: u32,   // The last opcode fetched from anywhere.
    next_sequential: u32,
}

impl SystemControl {
    pub fn reset(&mut self) {
        *self = Default::default();
    }

    /// Access cycles for one 16 bit access to a Game Pak window: 0, 1 or 2 for ROM, 3 for SRAM.
    fn gamepak_cycles(&self, window: usize, sequential: bool) -> u32 {
        let w = u32::from(self.waitcnt);
        if window == 3 {
            return 1 + ROM_FIRST_ACCESS[(w & 3) as usize];
        }
        let shift = window as u32 * 3;
        if sequential {
            let fast = (w >> (4 + shift)) & 1 != 0;
            1 + if fast { 1 } else { [2, 4, 8][window] }
        } else {
            1 + ROM_FIRST_ACCESS[((w >> (2 + shift)) & 3) as usize]
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }
}

/// A short lived view over every component of the machine other than the CPU, handed to the CPU for a step.
pub struct GbaBus<'a> {
    pub(crate) ctx: &'a mut Context,
    pub(crate) cycle_count: &'a mut u64,
    pub(crate) frame_count: &'a mut u64,

    pub(crate) bios: &'a Bios,
    pub(crate) ewram: &'a mut Ewram,
    pub(crate) iwram: &'a mut Iwram,
    pub(crate) system: &'a mut SystemControl,

    pub(crate) apu: &'a mut Apu,
    pub(crate) cart: &'a mut Cartridge,
    pub(crate) dma: &'a mut DmaController,
    pub(crate) interrupts: &'a mut InterruptController,
    pub(crate) joypad: &'a mut Joypad,
    pub(crate) ppu: &'a mut Ppu,
    pub(crate) serial: &'a mut Serial,
    pub(crate) timers: &'a mut Timers,
}

impl<'a> GbaBus<'a> {
    /// Runs the next queued DMA transfer to completion, if there is one. Returns whether a transfer ran.
    pub fn service_dma(&mut self) -> bool {
        match self.dma.next_transfer() {
            Some(mut transfer) => {
                transfer.run(self);
                self.dma.finish(&transfer, self.interrupts);
                true
            }
            None => false,
        }
    }

    fn access_cycles(&mut self, addr: u32, width: Width) -> u32 {
        let sequential = addr == self.system.next_sequential;
        self.system.next_sequential = addr.wrapping_add(width.bytes());
        let wide = width == Width::Word;

        match addr >> 24 {
            0x02 => {
                if wide {
                    6
                } else {
                    3
                }
            }
            0x05 | 0x06 => {
                if wide {
                    2
                } else {
                    1
                }
            }
            0x08..=0x0D => {
                let window = ((addr >> 25) - 4) as usize;
                let first = self.system.gamepak_cycles(window, sequential);
                if wide {
                    first + self.system.gamepak_cycles(window, true)
                } else {
                    first
                }
            }
            0x0E | 0x0F => self.system.gamepak_cycles(3, false),
            _ => 1,
        }
    }

    fn open_bus(&self, addr: u32) -> u32 {
        self.system.open_bus.rotate_right((addr & 3) * 8)
    }

    fn bios_read32(&self, addr: u32) -> u32 {
        if self.system.executing_bios {
            self.bios.read32((addr & 0x3FFC) as usize)
        } else {
            self.system.bios_latch
        }
    }

    /// Reads a byte without charging any cycles.
    pub fn peek8(&mut self, addr: u32) -> u8 {
        match addr >> 24 {
            0x00 if addr < 0x4000 => (self.bios_read32(addr) >> ((addr & 3) * 8)) as u8,
            0x02 => self.ewram[(addr & 0x3_FFFF) as usize],
            0x03 => self.iwram[(addr & 0x7FFF) as usize],
            0x04 => self.io_read8(addr & 0x00FF_FFFF),
            0x05 => self.ppu.read_palette8(addr),
            0x06 => self.ppu.read_vram8(addr),
            0x07 => self.ppu.read_oam8(addr),
            0x08..=0x0D => self.cart.read8(addr),
            0x0E | 0x0F => self.cart.save.read8(addr & 0xFFFF),
            _ => self.open_bus(addr) as u8,
        }
    }

    /// Reads an aligned halfword without charging any cycles.
    pub fn peek16(&mut self, addr: u32) -> u16 {
        match addr >> 24 {
            0x00 if addr < 0x4000 => (self.bios_read32(addr) >> ((addr & 2) * 8)) as u16,
            0x02 => self.ewram.read16((addr & 0x3_FFFE) as usize),
            0x03 => self.iwram.read16((addr & 0x7FFE) as usize),
            0x04 => u16::from(self.peek8(addr)) | (u16::from(self.peek8(addr | 1)) << 8),
            0x05 => self.ppu.read_palette16(addr),
            0x06 => self.ppu.read_vram16(addr),
            0x07 => self.ppu.read_oam16(addr),
            0x08..=0x0D if self.cart.is_eeprom_access(addr) => self.cart.save.eeprom_read(),
            0x08..=0x0D => self.cart.read16(addr),
            0x0E | 0x0F => u16::from(self.peek8(addr)) * 0x0101,
            _ => self.open_bus(addr) as u16,
        }
    }

    /// Reads an aligned word without charging any cycles.
    pub fn peek32(&mut self, addr: u32) -> u32 {
        match addr >> 24 {
            0x00 if addr < 0x4000 => self.bios_read32(addr),
            0x02 => self.ewram.read32((addr & 0x3_FFFC) as usize),
            0x03 => self.iwram.read32((addr & 0x7FFC) as usize),
            0x05 => self.ppu.read_palette32(addr),
            0x06 => self.ppu.read_vram32(addr),
            0x07 => self.ppu.read_oam32(addr),
            0x08..=0x0D if !self.cart.is_eeprom_access(addr) => self.cart.read32(addr),
            0x0E | 0x0F => u32::from(self.peek8(addr)) * 0x0101_0101,
            0x04 | 0x08..=0x0D => u32::from(self.peek16(addr)) | (u32::from(self.peek16(addr | 2)) << 16),
            _ => self.open_bus(addr),
        }
    }

    pub fn poke8(&mut self, addr: u32, v: u8) {
        match addr >> 24 {
            0x02 => self.ewram[(addr & 0x3_FFFF) as usize] = v,
            0x03 => self.iwram[(addr & 0x7FFF) as usize] = v,
            0x04 => self.io_write8(addr & 0x00FF_FFFF, v),
            0x05 => self.ppu.write_palette8(addr, v),
            0x06 => self.ppu.write_vram8(addr, v),
            0x0E | 0x0F => self.cart.save.write8(addr & 0xFFFF, v),
            // BIOS and ROM are read only, and OAM ignores byte writes.
            _ => {}
        }
    }

    pub fn poke16(&mut self, addr: u32, v: u16) {
        match addr >> 24 {
            0x02 => self.ewram.write16((addr & 0x3_FFFE) as usize, v),
            0x03 => self.iwram.write16((addr & 0x7FFE) as usize, v),
            0x04 => {
                self.io_write8(addr & 0x00FF_FFFE, v as u8);
                self.io_write8((addr & 0x00FF_FFFE) | 1, (v >> 8) as u8);
            }
            0x05 => self.ppu.write_palette16(addr, v),
            0x06 => self.ppu.write_vram16(addr, v),
            0x07 => self.ppu.write_oam16(addr, v),
            0x08..=0x0D if self.cart.is_eeprom_access(addr) => self.cart.save.eeprom_write(v),
            0x0E | 0x0F => self.poke8(addr, (v >> ((addr & 1) * 8)) as u8),
            _ => {}
        }
    }

    pub fn poke32(&mut self, addr: u32, v: u32) {
        match addr >> 24 {
            0x02 => self.ewram.write32((addr & 0x3_FFFC) as usize, v),
            0x03 => self.iwram.write32((addr & 0x7FFC) as usize, v),
            0x05 => self.ppu.write_palette32(addr, v),
            0x06 => self.ppu.write_vram32(addr, v),
            0x07 => self.ppu.write_oam32(addr, v),
            0x0E | 0x0F => self.poke8(addr, (v >> ((addr & 3) * 8)) as u8),
            _ => {
                self.poke16(addr, v as u16);
                self.poke16(addr | 2, (v >> 16) as u16);
            }
        }
    }

    fn io_read8(&self, addr: u32) -> u8 {
        match addr {
            0x000..=0x05F => self.ppu.read_register(addr),
            0x060..=0x0AF => self.apu.read_register(addr),
            0x0B0..=0x0DF => self.dma.read_register(addr),
            0x100..=0x10F => self.timers.read_register(addr),
            0x120..=0x12F => self.serial.read_register(addr),
            0x130..=0x133 => self.joypad.read_register(addr),
            0x200 => self.interrupts.reg_ie_read() as u8,
            0x201 => (self.interrupts.reg_ie_read() >> 8) as u8,
            0x202 => self.interrupts.reg_if_read() as u8,
            0x203 => (self.interrupts.reg_if_read() >> 8) as u8,
            0x204 => self.system.waitcnt as u8,
            0x205 => (self.system.waitcnt >> 8) as u8,
            0x208 => self.interrupts.reg_ime_read() as u8,
            0x300 => self.system.postflg,
            _ => 0,
        }
    }

    fn io_write8(&mut self, addr: u32, v: u8) {
        let lo = u16::from(v);
        let hi = u16::from(v) << 8;
        match addr {
            0x000..=0x05F => self.ppu.write_register(addr, v),
            0x060..=0x0AF => self.apu.write_register(addr, v),
            0x0B0..=0x0DF => self.dma.write_register(addr, v),
            0x100..=0x10F => self.timers.write_register(addr, v),
            0x120..=0x12F => {
                if let Some(byte) = self.serial.write_register(addr, v, self.interrupts) {
                    self.ctx.push_serial(byte);
                }
            }
            0x130..=0x133 => self.joypad.write_register(addr, v),
            0x200 => {
                let ie = self.interrupts.reg_ie_read();
                self.interrupts.reg_ie_write((ie & 0xFF00) | lo);
            }
            0x201 => {
                let ie = self.interrupts.reg_ie_read();
                self.interrupts.reg_ie_write((ie & 0x00FF) | hi);
            }
            0x202 => self.interrupts.reg_if_write(lo),
            0x203 => self.interrupts.reg_if_write(hi),
            0x204 => self.system.waitcnt = (self.system.waitcnt & 0xFF00) | lo,
            0x205 => self.system.waitcnt = (self.system.waitcnt & 0x00FF) | (hi & 0x5F00),
            0x208 => self.interrupts.reg_ime_write(lo),
            0x300 => self.system.postflg = v & 1,
            0x301 => {
                // Bit 7 selects Stop rather than Halt. Both just wait for an interrupt here.
                self.system.halted = true;
            }
            _ => {}
        }
    }
}

impl<'a> Bus for GbaBus<'a> {
    fn read8(&mut self, addr: u32) -> u8 {
        let cycles = self.access_cycles(addr, Width::Byte);
        self.tick(cycles);
        self.peek8(addr)
    }

    fn read16(&mut self, addr: u32) -> u16 {
        let addr = addr & !1;
        let cycles = self.access_cycles(addr, Width::Half);
        self.tick(cycles);
        self.peek16(addr)
    }

    fn read32(&mut self, addr: u32) -> u32 {
        let addr = addr & !3;
        let cycles = self.access_cycles(addr, Width::Word);
        self.tick(cycles);
        self.peek32(addr)
    }

    fn write8(&mut self, addr: u32, v: u8) {
        let cycles = self.access_cycles(addr, Width::Byte);
        self.tick(cycles);
        self.poke8(addr, v);
    }

    fn write16(&mut self, addr: u32, v: u16) {
        let addr = addr & !1;
        let cycles = self.access_cycles(addr, Width::Half);
        self.tick(cycles);
        self.poke16(addr, v);
    }

    fn write32(&mut self, addr: u32, v: u32) {
        let addr = addr & !3;
        let cycles = self.access_cycles(addr, Width::Word);
        self.tick(cycles);
        self.poke32(addr, v);
    }

    fn tick(&mut self, cycles: u32) {
        *self.cycle_count += u64::from(cycles);

        let overflows = self.timers.step(cycles, self.interrupts);
        for (timer, &count) in overflows.iter().enumerate().take(2) {
            for _ in 0..count {
                self.apu.on_timer_overflow(timer, self.dma);
            }
        }

        if self.ppu.step(cycles, self.interrupts, self.dma, &mut self.ctx.framebuffer) {
            self.ctx.frame_ready = true;
            *self.frame_count += 1;
        }
        self.apu.step(cycles, &mut self.ctx.audio);
    }

    fn interrupt_controller(&mut self) -> &mut InterruptController {
        self.interrupts
    }

    fn fetch16(&mut self, addr: u32) -> u16 {
        self.system.executing_bios = addr < 0x4000;
        let v = self.read16(addr);
        let latch = u32::from(v) * 0x0001_0001;
        if self.system.executing_bios {
            self.system.bios_latch = latch;
        }
        self.system.open_bus = latch;
        v
    }

    fn fetch32(&mut self, addr: u32) -> u32 {
        self.system.executing_bios = addr < 0x4000;
        let v = self.read32(addr);
        if self.system.executing_bios {
            self.system.bios_latch = v;
        }
        self.system.open_bus = v;
        v
    }

    fn halt(&mut self) {
        self.system.halted = true;
    }

    /// RegisterRamReset. Bit 1 leaves the top 0x200 bytes of IWRAM alone, that's where the firmware keeps its stacks.
    fn clear_memory(&mut self, flags: u32) {
        if flags & 0x01 != 0 {
            self.ewram.clear();
        }
        if flags & 0x02 != 0 {
            for b in self.iwram[..0x7E00].iter_mut() {
                *b = 0;
            }
        }
        if flags & 0x04 != 0 {
            self.ppu.palette.clear();
        }
        if flags & 0x08 != 0 {
            self.ppu.vram.clear();
        }
        if flags & 0x10 != 0 {
            self.ppu.oam.clear();
        }
        if flags & 0x20 != 0 {
            self.serial.reset();
        }
        if flags & 0x40 != 0 {
            self.apu.reset();
        }
        if flags & 0x80 != 0 {
            self.dma.reset();
            self.timers.reset();
            self.interrupts.reset();
            self.system.waitcnt = 0;
        }
    }
}
