//! Background rendering. Depending on the video mode the four background slots are either tiled text layers, rotation
//! and scaling (affine) layers, or BG2 is a raw bitmap.

use super::compose::TRANSPARENT;
use super::{Ppu, SCREEN_WIDTH};

// Tiled backgrounds are made of 256x256 pixel screenblocks, arranged per the BGCNT size field.
const TEXT_SIZES: [(u32, u32); 4] = [(256, 256), (512, 256), (256, 512), (512, 512)];

// Background tile data can't reach into the sprite half of VRAM.
const BG_VRAM_LIMIT: usize = 0x10000;

type Line = [u16; SCREEN_WIDTH];

impl Ppu {
    fn bg_palette(&self, index: usize) -> u16 {
        self.palette.read16(index * 2) & 0x7FFF
    }

    pub(super) fn render_text_bg(&self, bg: usize, y: u16, out: &mut Line) {
        let cnt = self.bgcnt[bg];
        let char_base = usize::from((cnt >> 2) & 3) * 0x4000;
        let screen_base = usize::from((cnt >> 8) & 0x1F) * 0x800;
        let color256 = cnt & 0x80 != 0;
        let (width, height) = TEXT_SIZES[usize::from(cnt >> 14)];

        let py = (u32::from(y) + u32::from(self.bgvofs[bg])) & (height - 1);

        for (x, px) in out.iter_mut().enumerate() {
            let bx = (x as u32 + u32::from(self.bghofs[bg])) & (width - 1);

            let block = match cnt >> 14 {
                0 => 0,
                1 => bx / 256,
                2 => py / 256,
                _ => bx / 256 + (py / 256) * 2,
            } as usize;
            let entry_addr = screen_base + block * 0x800 + (((py % 256) / 8) * 32 + (bx % 256) / 8) as usize * 2;
            let entry = self.vram.read16(entry_addr);

            let tile = usize::from(entry & 0x3FF);
            let mut tx = (bx % 8) as usize;
            let mut ty = (py % 8) as usize;
            if entry & 0x400 != 0 {
                tx = 7 - tx;
            }
            if entry & 0x800 != 0 {
                ty = 7 - ty;
            }

            *px = if color256 {
                let addr = char_base + tile * 64 + ty * 8 + tx;
                match self.bg_vram(addr) {
                    0 => TRANSPARENT,
                    idx => self.bg_palette(usize::from(idx)),
                }
            } else {
                let addr = char_base + tile * 32 + ty * 4 + tx / 2;
                let pair = self.bg_vram(addr);
                let idx = if tx & 1 == 0 { pair & 0xF } else { pair >> 4 };
                if idx == 0 {
                    TRANSPARENT
                } else {
                    self.bg_palette(usize::from(entry >> 12) * 16 + usize::from(idx))
                }
            };
        }
    }

    fn bg_vram(&self, addr: usize) -> u8 {
        if addr < BG_VRAM_LIMIT {
            self.vram[addr]
        } else {
            0
        }
    }

    /// Renders affine background `bg` (2 or 3) using the current internal reference point.
    pub(super) fn render_affine_bg(&self, bg: usize, out: &mut Line) {
        let set = bg - 2;
        let cnt = self.bgcnt[bg];
        let char_base = usize::from((cnt >> 2) & 3) * 0x4000;
        let screen_base = usize::from((cnt >> 8) & 0x1F) * 0x800;
        let size = 128i32 << (cnt >> 14);
        let wrap = cnt & 0x2000 != 0;

        let pa = i32::from(self.affine[set].pa);
        let pc = i32::from(self.affine[set].pc);
        let mut fx = self.affine[set].internal_x;
        let mut fy = self.affine[set].internal_y;

        for px in out.iter_mut() {
            let mut tx = fx >> 8;
            let mut ty = fy >> 8;
            fx = fx.wrapping_add(pa);
            fy = fy.wrapping_add(pc);

            if wrap {
                tx = tx.rem_euclid(size);
                ty = ty.rem_euclid(size);
            } else if tx < 0 || ty < 0 || tx >= size || ty >= size {
                *px = TRANSPARENT;
                continue;
            }

            let (tx, ty) = (tx as usize, ty as usize);
            let tiles_per_row = size as usize / 8;
            let tile = usize::from(self.bg_vram(screen_base + (ty / 8) * tiles_per_row + tx / 8));
            *px = match self.bg_vram(char_base + tile * 64 + (ty % 8) * 8 + tx % 8) {
                0 => TRANSPARENT,
                idx => self.bg_palette(usize::from(idx)),
            };
        }
    }

    fn frame_offset(&self) -> usize {
        if self.dispcnt & 0x10 != 0 {
            0xA000
        } else {
            0
        }
    }

    /// Renders BG2 in one of the bitmap modes (3, 4 or 5).
    pub(super) fn render_bitmap_bg(&self, mode: u16, y: u16, out: &mut Line) {
        let y = usize::from(y);
        match mode {
            3 => {
                for (x, px) in out.iter_mut().enumerate() {
                    *px = self.vram.read16((y * SCREEN_WIDTH + x) * 2) & 0x7FFF;
                }
            }
            4 => {
                let base = self.frame_offset() + y * SCREEN_WIDTH;
                for (x, px) in out.iter_mut().enumerate() {
                    *px = match self.vram[base + x] {
                        0 => TRANSPARENT,
                        idx => self.bg_palette(usize::from(idx)),
                    };
                }
            }
            _ => {
                let base = self.frame_offset();
                for (x, px) in out.iter_mut().enumerate() {
                    *px = if x < 160 && y < 128 {
                        self.vram.read16(base + (y * 160 + x) * 2) & 0x7FFF
                    } else {
                        TRANSPARENT
                    };
                }
            }
        }
    }
}
