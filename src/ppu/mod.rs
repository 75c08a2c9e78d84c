//! The PPU turns VRAM, OAM and palette RAM into a 240x160 picture, one scanline at a time. Each line spends 960
//! cycles in HDraw followed by 272 cycles of HBlank; 160 visible lines are followed by 68 lines of VBlank, for a total
//! of 280896 cycles per frame.
//! Lines are rendered in one go when HBlank begins, which means mid-line register changes aren't visible. Very few
//! games care.

mod background;
pub mod compose;
mod sprite;

use crate::dma::DmaController;
use crate::interrupt::{Interrupt, InterruptController};
use crate::memory_segment;
use crate::util::sign_extend;
use compose::{to_argb, LineLayers};
use serde::{Deserialize, Serialize};

pub const SCREEN_WIDTH: usize = 240;
pub const SCREEN_HEIGHT: usize = 160;
pub const SCREEN_SIZE: usize = SCREEN_WIDTH * SCREEN_HEIGHT;

pub const HDRAW_CYCLES: u32 = 960;
pub const HBLANK_CYCLES: u32 = 272;
pub const LINE_CYCLES: u32 = HDRAW_CYCLES + HBLANK_CYCLES;
const TOTAL_LINES: u16 = 228;
pub const FRAME_CYCLES: u32 = LINE_CYCLES * TOTAL_LINES as u32;

memory_segment! { Vram; 0x18000 }
memory_segment! { Oam; 0x400 }
memory_segment! { Palette; 0x400 }

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Phase {
    HDraw,
    HBlank,
}

impl Default for Phase {
    fn default() -> Phase {
        Phase::HDraw
    }
}

/// One of the two BG2/BG3 rotation and scaling parameter sets.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct AffineParams {
    pub pa: i16,
    pub pb: i16,
    pub pc: i16,
    pub pd: i16,
    /// Reference point as written, 20.8 fixed point.
    pub x: i32,
    pub y: i32,
    /// The reference point as it advances down the frame.
    pub internal_x: i32,
    pub internal_y: i32,
}

impl AffineParams {
    fn reload(&mut self) {
        self.internal_x = self.x;
        self.internal_y = self.y;
    }

    fn advance(&mut self) {
        self.internal_x = self.internal_x.wrapping_add(i32::from(self.pb));
        self.internal_y = self.internal_y.wrapping_add(i32::from(self.pd));
    }
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Ppu {
    pub vram: Vram,       // 0x6000000 - 0x6017FFF
    pub oam: Oam,         // 0x7000000 - 0x70003FF
    pub palette: Palette, // 0x5000000 - 0x50003FF

    pub dispcnt: u16,     // 0x4000000
    dispstat: u16,        // 0x4000004, only the writable bits. Status flags are derived.
    pub vcount: u16,      // 0x4000006
    pub bgcnt: [u16; 4],  // 0x4000008 - 0x400000F
    pub bghofs: [u16; 4], // 0x4000010 - 0x400001F
    pub bgvofs: [u16; 4],
    pub affine: [AffineParams; 2], // 0x4000020 - 0x400003F
    pub winh: [u16; 2],            // 0x4000040
    pub winv: [u16; 2],            // 0x4000044
    pub winin: u16,                // 0x4000048
    pub winout: u16,               // 0x400004A
    pub mosaic: u16,               // 0x400004C
    pub bldcnt: u16,               // 0x4000050
    pub bldalpha: u16,             // 0x4000052
    pub bldy: u8,                  // 0x4000054

    pub phase: Phase,
    pub cycles: u32,
    vcount_match: bool,
}

impl Ppu {
    pub fn new() -> Ppu {
        Default::default()
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }

    pub fn in_vblank(&self) -> bool {
        self.vcount >= SCREEN_HEIGHT as u16 && self.vcount < TOTAL_LINES - 1
    }

    fn drawing(&self) -> bool {
        self.phase == Phase::HDraw && (self.vcount as usize) < SCREEN_HEIGHT
    }

    fn forced_blank(&self) -> bool {
        self.dispcnt & 0x80 != 0
    }

    /// Whether the CPU and DMA may currently touch VRAM.
    pub fn vram_accessible(&self) -> bool {
        !self.drawing() || self.forced_blank()
    }

    /// Whether the CPU and DMA may currently touch OAM.
    pub fn oam_accessible(&self) -> bool {
        !self.drawing()
    }

    /// Advances the PPU by the given number of cycles. Completed scanlines are written into `framebuffer`, and true is
    /// returned when the last visible line of a frame was just finished.
    pub fn step(
        &mut self,
        cycles: u32,
        interrupts: &mut InterruptController,
        dma: &mut DmaController,
        framebuffer: &mut [u32],
    ) -> bool {
        self.cycles += cycles;
        let mut frame_done = false;
        loop {
            match self.phase {
                Phase::HDraw => {
                    if self.cycles < HDRAW_CYCLES {
                        break;
                    }
                    self.cycles -= HDRAW_CYCLES;
                    self.phase = Phase::HBlank;
                    if (self.vcount as usize) < SCREEN_HEIGHT {
                        self.render_line(framebuffer);
                        dma.on_hblank();
                    }
                    if self.dispstat & 0x10 != 0 {
                        interrupts.request(Interrupt::HBlank);
                    }
                }
                Phase::HBlank => {
                    if self.cycles < HBLANK_CYCLES {
                        break;
                    }
                    self.cycles -= HBLANK_CYCLES;
                    self.phase = Phase::HDraw;
                    if self.next_line(interrupts, dma) {
                        frame_done = true;
                    }
                }
            }
        }
        frame_done
    }

    fn next_line(&mut self, interrupts: &mut InterruptController, dma: &mut DmaController) -> bool {
        let mut frame_done = false;
        self.vcount += 1;
        if self.vcount < SCREEN_HEIGHT as u16 {
            for params in self.affine.iter_mut() {
                params.advance();
            }
        } else if self.vcount == SCREEN_HEIGHT as u16 {
            if self.dispstat & 0x08 != 0 {
                interrupts.request(Interrupt::VBlank);
            }
            dma.on_vblank();
            frame_done = true;
        } else if self.vcount >= TOTAL_LINES {
            self.vcount = 0;
            for params in self.affine.iter_mut() {
                params.reload();
            }
        }
        self.update_vcount_match(interrupts);
        frame_done
    }

    fn update_vcount_match(&mut self, interrupts: &mut InterruptController) {
        self.vcount_match = self.vcount == self.dispstat >> 8;
        if self.vcount_match && self.dispstat & 0x20 != 0 {
            interrupts.request(Interrupt::VCount);
        }
    }

    fn render_line(&mut self, framebuffer: &mut [u32]) {
        let y = self.vcount;
        let row = usize::from(y) * SCREEN_WIDTH;
        let out = match framebuffer.get_mut(row..row + SCREEN_WIDTH) {
            Some(out) => out,
            None => return,
        };

        let mut line = [0u16; SCREEN_WIDTH];
        if self.forced_blank() {
            line = [0x7FFF; SCREEN_WIDTH];
        } else {
            let layers = self.render_layers(y);
            self.compose_line(&layers, y, &mut line);
        }
        for (dst, &src) in out.iter_mut().zip(line.iter()) {
            *dst = to_argb(src);
        }
    }

    fn render_layers(&self, y: u16) -> Box<LineLayers> {
        let mut layers = Box::new(LineLayers::default());
        let mode = self.dispcnt & 7;
        for bg in 0..4 {
            let kind = match (mode, bg) {
                (0, _) | (1, 0) | (1, 1) => Some(false),
                (1, 2) | (2, 2) | (2, 3) => Some(true),
                _ => None,
            };
            if self.dispcnt & (0x100 << bg) == 0 {
                continue;
            }
            match kind {
                Some(false) => self.render_text_bg(bg, y, &mut layers.bg[bg]),
                Some(true) => self.render_affine_bg(bg, &mut layers.bg[bg]),
                None if bg == 2 && mode >= 3 && mode <= 5 => self.render_bitmap_bg(mode, y, &mut layers.bg[bg]),
                None => continue,
            }
            layers.bg_enabled[bg] = true;
        }
        if self.dispcnt & 0x1000 != 0 {
            self.render_sprites(y, &mut layers);
        }
        layers
    }

    fn dispstat_read(&self) -> u16 {
        let mut v = self.dispstat & 0xFF38;
        if self.in_vblank() {
            v |= 1;
        }
        if self.phase == Phase::HBlank {
            v |= 2;
        }
        if self.vcount_match {
            v |= 4;
        }
        v
    }

    /// Read from the 0x4000000 - 0x4000055 register range. Registers that are write only on hardware read as 0.
    pub fn read_register(&self, addr: u32) -> u8 {
        let half = match addr & !1 {
            0x00 => self.dispcnt,
            0x04 => self.dispstat_read(),
            0x06 => self.vcount,
            0x08..=0x0E => self.bgcnt[((addr - 0x08) / 2) as usize],
            0x48 => self.winin,
            0x4A => self.winout,
            0x50 => self.bldcnt,
            0x52 => self.bldalpha,
            _ => 0,
        };
        if addr & 1 == 0 {
            half as u8
        } else {
            (half >> 8) as u8
        }
    }

    /// Write to the 0x4000000 - 0x4000055 register range.
    pub fn write_register(&mut self, addr: u32, v: u8) {
        match addr {
            0x00..=0x01 => set_byte(&mut self.dispcnt, addr, v),
            0x04..=0x05 => {
                set_byte(&mut self.dispstat, addr, v);
                self.dispstat &= 0xFF38;
                self.vcount_match = self.vcount == self.dispstat >> 8;
            }
            0x08..=0x0F => set_byte(&mut self.bgcnt[((addr - 0x08) / 2) as usize], addr, v),
            0x10..=0x1F => {
                let bg = ((addr - 0x10) / 4) as usize;
                let reg = if addr & 2 == 0 { &mut self.bghofs[bg] } else { &mut self.bgvofs[bg] };
                set_byte(reg, addr, v);
                *reg &= 0x1FF;
            }
            0x20..=0x3F => self.write_affine(addr, v),
            0x40..=0x43 => set_byte(&mut self.winh[((addr - 0x40) / 2) as usize], addr, v),
            0x44..=0x47 => set_byte(&mut self.winv[((addr - 0x44) / 2) as usize], addr, v),
            0x48..=0x49 => set_byte(&mut self.winin, addr, v),
            0x4A..=0x4B => set_byte(&mut self.winout, addr, v),
            0x4C..=0x4D => set_byte(&mut self.mosaic, addr, v),
            0x50..=0x51 => set_byte(&mut self.bldcnt, addr, v),
            0x52..=0x53 => set_byte(&mut self.bldalpha, addr, v),
            0x54 => self.bldy = v & 0x1F,
            _ => {}
        }
    }

    fn write_affine(&mut self, addr: u32, v: u8) {
        let params = &mut self.affine[((addr - 0x20) / 0x10) as usize];
        let offset = addr & 0xF;
        let param = match offset {
            0x0..=0x1 => &mut params.pa,
            0x2..=0x3 => &mut params.pb,
            0x4..=0x5 => &mut params.pc,
            0x6..=0x7 => &mut params.pd,
            _ => {
                // Reference points are 28 bit signed values. Writing any byte reloads the internal copy.
                let reg = if offset < 0xC { &mut params.x } else { &mut params.y };
                let shift = (offset & 3) * 8;
                let raw = (*reg as u32 & !(0xFF << shift)) | (u32::from(v) << shift);
                *reg = sign_extend(raw & 0x0FFF_FFFF, 28);
                params.reload();
                return;
            }
        };
        let mut raw = *param as u16;
        set_byte(&mut raw, addr, v);
        *param = raw as i16;
    }

    fn vram_offset(addr: u32) -> usize {
        let offset = (addr & 0x1FFFF) as usize;
        if offset >= Vram::SIZE {
            offset - 0x8000
        } else {
            offset
        }
    }

    pub fn read_vram8(&self, addr: u32) -> u8 {
        if !self.vram_accessible() {
            return 0xFF;
        }
        self.vram[Ppu::vram_offset(addr)]
    }

    pub fn read_vram16(&self, addr: u32) -> u16 {
        if !self.vram_accessible() {
            return 0xFFFF;
        }
        self.vram.read16(Ppu::vram_offset(addr & !1))
    }

    pub fn read_vram32(&self, addr: u32) -> u32 {
        if !self.vram_accessible() {
            return 0xFFFF_FFFF;
        }
        self.vram.read32(Ppu::vram_offset(addr & !3))
    }

    /// Byte writes to background VRAM store the byte to both halves of the halfword. Byte writes to sprite VRAM are
    /// ignored.
    pub fn write_vram8(&mut self, addr: u32, v: u8) {
        if !self.vram_accessible() {
            return;
        }
        let offset = Ppu::vram_offset(addr) & !1;
        let bg_limit = if self.dispcnt & 7 >= 3 { 0x14000 } else { 0x10000 };
        if offset < bg_limit {
            self.vram.write16(offset, u16::from(v) * 0x101);
        }
    }

    pub fn write_vram16(&mut self, addr: u32, v: u16) {
        if self.vram_accessible() {
            self.vram.write16(Ppu::vram_offset(addr & !1), v);
        }
    }

    pub fn write_vram32(&mut self, addr: u32, v: u32) {
        if self.vram_accessible() {
            self.vram.write32(Ppu::vram_offset(addr & !3), v);
        }
    }

    pub fn read_oam8(&self, addr: u32) -> u8 {
        if !self.oam_accessible() {
            return 0xFF;
        }
        self.oam[(addr & 0x3FF) as usize]
    }

    pub fn read_oam16(&self, addr: u32) -> u16 {
        if !self.oam_accessible() {
            return 0xFFFF;
        }
        self.oam.read16((addr & 0x3FE) as usize)
    }

    pub fn read_oam32(&self, addr: u32) -> u32 {
        if !self.oam_accessible() {
            return 0xFFFF_FFFF;
        }
        self.oam.read32((addr & 0x3FC) as usize)
    }

    pub fn write_oam16(&mut self, addr: u32, v: u16) {
        if self.oam_accessible() {
            self.oam.write16((addr & 0x3FE) as usize, v);
        }
    }

    pub fn write_oam32(&mut self, addr: u32, v: u32) {
        if self.oam_accessible() {
            self.oam.write32((addr & 0x3FC) as usize, v);
        }
    }

    pub fn read_palette8(&self, addr: u32) -> u8 {
        self.palette[(addr & 0x3FF) as usize]
    }

    pub fn read_palette16(&self, addr: u32) -> u16 {
        self.palette.read16((addr & 0x3FE) as usize)
    }

    pub fn read_palette32(&self, addr: u32) -> u32 {
        self.palette.read32((addr & 0x3FC) as usize)
    }

    /// Byte writes to palette RAM land in both halves of the halfword.
    pub fn write_palette8(&mut self, addr: u32, v: u8) {
        self.palette.write16((addr & 0x3FE) as usize, u16::from(v) * 0x101);
    }

    pub fn write_palette16(&mut self, addr: u32, v: u16) {
        self.palette.write16((addr & 0x3FE) as usize, v);
    }

    pub fn write_palette32(&mut self, addr: u32, v: u32) {
        self.palette.write32((addr & 0x3FC) as usize, v);
    }
}

fn set_byte(reg: &mut u16, addr: u32, v: u8) {
    if addr & 1 == 0 {
        *reg = (*reg & 0xFF00) | u16::from(v);
    } else {
        *reg = (*reg & 0x00FF) | (u16::from(v) << 8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        ppu: Ppu,
        ic: InterruptController,
        dma: DmaController,
        fb: Vec<u32>,
    }

    impl Harness {
        fn new() -> Harness {
            Harness {
                ppu: Ppu::new(),
                ic: InterruptController::new(),
                dma: DmaController::new(),
                fb: vec![0; SCREEN_SIZE],
            }
        }

        fn step(&mut self, cycles: u32) -> bool {
            self.ppu.step(cycles, &mut self.ic, &mut self.dma, &mut self.fb)
        }
    }

    #[test]
    fn scanline_timing() {
        let mut h = Harness::new();
        assert!(!h.step(HDRAW_CYCLES - 1));
        assert_eq!(h.ppu.phase, Phase::HDraw);
        h.step(1);
        assert_eq!(h.ppu.phase, Phase::HBlank);
        assert_eq!(h.ppu.read_register(0x04) & 2, 2);
        h.step(HBLANK_CYCLES);
        assert_eq!(h.ppu.vcount, 1);
        assert_eq!(h.ppu.phase, Phase::HDraw);
    }

    #[test]
    fn frame_is_delivered_once_per_frame() {
        let mut h = Harness::new();
        h.ppu.write_register(0x04, 0x08); // VBlank IRQ
        let mut frames = 0;
        for _ in 0..(FRAME_CYCLES / 4) {
            if h.step(4) {
                frames += 1;
                assert_eq!(h.ppu.vcount, 160);
                assert!(h.ppu.in_vblank());
            }
        }
        assert_eq!(frames, 1);
        assert_eq!(h.ppu.vcount, 0);
        assert_eq!(h.ic.request & Interrupt::VBlank as u16, Interrupt::VBlank as u16);
    }

    #[test]
    fn vcount_match_interrupt() {
        let mut h = Harness::new();
        h.ppu.write_register(0x04, 0x20);
        h.ppu.write_register(0x05, 3);
        h.step(LINE_CYCLES * 2);
        assert_eq!(h.ic.request, 0);
        assert_eq!(h.ppu.read_register(0x04) & 4, 0);
        h.step(LINE_CYCLES);
        assert_eq!(h.ic.request, Interrupt::VCount as u16);
        assert_eq!(h.ppu.read_register(0x04) & 4, 4);
    }

    #[test]
    fn hblank_triggers_dma_on_visible_lines() {
        let mut h = Harness::new();
        h.dma.write_register(0xDF, 0xA0); // channel 3, HBlank timing
        h.step(HDRAW_CYCLES);
        assert!(h.dma.pending());
    }

    #[test]
    fn vram_gated_during_hdraw() {
        let mut h = Harness::new();
        h.ppu.write_vram16(0x0600_0000, 0x1234);
        assert_eq!(h.ppu.vram.read16(0), 0);
        assert_eq!(h.ppu.read_vram16(0x0600_0000), 0xFFFF);
        assert_eq!(h.ppu.read_oam8(0x0700_0000), 0xFF);

        // Forced blank opens VRAM but not OAM.
        h.ppu.write_register(0x00, 0x80);
        h.ppu.write_vram16(0x0600_0000, 0x1234);
        assert_eq!(h.ppu.read_vram16(0x0600_0000), 0x1234);
        h.ppu.write_oam16(0x0700_0000, 0x1234);
        assert_eq!(h.ppu.oam.read16(0), 0);

        h.ppu.write_register(0x00, 0x00);
        h.step(HDRAW_CYCLES);
        h.ppu.write_oam16(0x0700_0000, 0x1234);
        assert_eq!(h.ppu.read_oam16(0x0700_0000), 0x1234);
        // The upper 32K mirrors the sprite area.
        assert_eq!(h.ppu.read_vram16(0x0601_8000), h.ppu.read_vram16(0x0601_0000));
    }

    #[test]
    fn byte_writes() {
        let mut h = Harness::new();
        h.step(HDRAW_CYCLES);
        h.ppu.write_vram8(0x0600_0001, 0xAB);
        assert_eq!(h.ppu.read_vram16(0x0600_0000), 0xABAB);
        h.ppu.write_vram8(0x0601_0000, 0xAB);
        assert_eq!(h.ppu.read_vram16(0x0601_0000), 0);
        h.ppu.write_palette8(0x0500_0003, 0x12);
        assert_eq!(h.ppu.read_palette16(0x0500_0002), 0x1212);
    }

    #[test]
    fn affine_reference_points() {
        let mut h = Harness::new();
        // BG2X = -1.0
        h.ppu.write_register(0x28, 0x00);
        h.ppu.write_register(0x29, 0xFF);
        h.ppu.write_register(0x2A, 0xFF);
        h.ppu.write_register(0x2B, 0x0F);
        assert_eq!(h.ppu.affine[0].x, -256);
        assert_eq!(h.ppu.affine[0].internal_x, -256);

        // BG2PB = 2.0 moves the reference point each line.
        h.ppu.write_register(0x22, 0x00);
        h.ppu.write_register(0x23, 0x02);
        h.step(LINE_CYCLES * 2);
        assert_eq!(h.ppu.affine[0].internal_x, -256 + 0x400);

        h.step(FRAME_CYCLES - LINE_CYCLES * 2);
        assert_eq!(h.ppu.vcount, 0);
        assert_eq!(h.ppu.affine[0].internal_x, -256);
    }

    #[test]
    fn mode3_line_reaches_framebuffer() {
        let mut h = Harness::new();
        h.ppu.write_register(0x00, 0x03);
        h.ppu.write_register(0x01, 0x04);
        h.ppu.vram.write16(2, 0x001F);
        h.step(HDRAW_CYCLES);
        assert_eq!(h.fb[1], 0xFFF8_0000);
        assert_eq!(h.fb[0], 0xFF00_0000);
    }
}
