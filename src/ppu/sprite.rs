//! Sprite (OBJ) rendering. The 128 OAM entries are walked from the back to the front so that lower numbered sprites
//! end up on top of higher numbered ones sharing the same priority.

use super::compose::{LineLayers, ObjPixel};
use super::{Ppu, SCREEN_HEIGHT, SCREEN_WIDTH};

const OBJ_VRAM_BASE: usize = 0x10000;
const OBJ_PALETTE_BASE: usize = 0x200;

#[rustfmt::skip]
const SPRITE_SIZES: [[(i32, i32); 4]; 3] = [
    [(8, 8),  (16, 16), (32, 32), (64, 64)], // square
    [(16, 8), (32, 8),  (32, 16), (64, 32)], // horizontal
    [(8, 16), (8, 32),  (16, 32), (32, 64)], // vertical
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ObjMode {
    Normal,
    SemiTransparent,
    Window,
}

/// The three attribute halfwords of one OAM entry.
#[derive(Clone, Copy, Debug)]
struct Attributes(u16, u16, u16);

impl Attributes {
    fn affine(self) -> bool {
        self.0 & 0x100 != 0
    }

    fn double_size(self) -> bool {
        self.0 & 0x200 != 0
    }

    fn mode(self) -> Option<ObjMode> {
        match (self.0 >> 10) & 3 {
            0 => Some(ObjMode::Normal),
            1 => Some(ObjMode::SemiTransparent),
            2 => Some(ObjMode::Window),
            _ => None,
        }
    }

    fn color256(self) -> bool {
        self.0 & 0x2000 != 0
    }

    fn size(self) -> Option<(i32, i32)> {
        SPRITE_SIZES.get(usize::from(self.0 >> 14)).map(|row| row[usize::from(self.1 >> 14)])
    }

    fn y(self) -> i32 {
        let y = i32::from(self.0 & 0xFF);
        if y >= SCREEN_HEIGHT as i32 {
            y - 256
        } else {
            y
        }
    }

    fn x(self) -> i32 {
        let x = i32::from(self.1 & 0x1FF);
        if x >= SCREEN_WIDTH as i32 {
            x - 512
        } else {
            x
        }
    }

    fn affine_index(self) -> usize {
        usize::from((self.1 >> 9) & 0x1F)
    }

    fn tile(self) -> usize {
        usize::from(self.2 & 0x3FF)
    }

    fn priority(self) -> u8 {
        ((self.2 >> 10) & 3) as u8
    }

    fn palette(self) -> usize {
        usize::from(self.2 >> 12)
    }
}

impl Ppu {
    fn attributes(&self, index: usize) -> Attributes {
        let base = index * 8;
        Attributes(self.oam.read16(base), self.oam.read16(base + 2), self.oam.read16(base + 4))
    }

    /// The pa/pb/pc/pd parameters of one of the 32 OAM rotation groups.
    fn obj_affine(&self, group: usize) -> [i32; 4] {
        let base = group * 32;
        [
            i32::from(self.oam.read16(base + 6) as i16),
            i32::from(self.oam.read16(base + 14) as i16),
            i32::from(self.oam.read16(base + 22) as i16),
            i32::from(self.oam.read16(base + 30) as i16),
        ]
    }

    pub(super) fn render_sprites(&self, y: u16, layers: &mut LineLayers) {
        let y = i32::from(y);
        let one_dimensional = self.dispcnt & 0x40 != 0;
        let bitmap_mode = self.dispcnt & 7 >= 3;

        for index in (0..128).rev() {
            let attrs = self.attributes(index);
            if !attrs.affine() && attrs.double_size() {
                continue;
            }
            let (mode, (width, height)) = match (attrs.mode(), attrs.size()) {
                (Some(mode), Some(size)) => (mode, size),
                _ => continue,
            };
            let (box_w, box_h) = if attrs.affine() && attrs.double_size() {
                (width * 2, height * 2)
            } else {
                (width, height)
            };

            let dy = y - attrs.y();
            if dy < 0 || dy >= box_h {
                continue;
            }
            // In the bitmap modes the lower half of sprite VRAM belongs to the frame buffer.
            if bitmap_mode && attrs.tile() < 512 {
                continue;
            }

            let affine = if attrs.affine() { Some(self.obj_affine(attrs.affine_index())) } else { None };
            let left = attrs.x();

            for dx in 0..box_w {
                let sx = left + dx;
                if sx < 0 || sx >= SCREEN_WIDTH as i32 {
                    continue;
                }

                let (tx, ty) = match affine {
                    Some([pa, pb, pc, pd]) => {
                        let cx = dx - box_w / 2;
                        let cy = dy - box_h / 2;
                        let tx = ((pa * cx + pb * cy) >> 8) + width / 2;
                        let ty = ((pc * cx + pd * cy) >> 8) + height / 2;
                        if tx < 0 || ty < 0 || tx >= width || ty >= height {
                            continue;
                        }
                        (tx, ty)
                    }
                    None => {
                        let tx = if attrs.1 & 0x1000 != 0 { width - 1 - dx } else { dx };
                        let ty = if attrs.1 & 0x2000 != 0 { height - 1 - dy } else { dy };
                        (tx, ty)
                    }
                };

                let color = match self.sprite_pixel(attrs, one_dimensional, width, tx as usize, ty as usize) {
                    Some(color) => color,
                    None => continue,
                };

                let sx = sx as usize;
                if mode == ObjMode::Window {
                    layers.obj_window[sx] = true;
                    continue;
                }
                if let Some(existing) = layers.obj[sx] {
                    if attrs.priority() > existing.priority {
                        continue;
                    }
                }
                layers.obj[sx] = Some(ObjPixel {
                    color,
                    priority: attrs.priority(),
                    semi_transparent: mode == ObjMode::SemiTransparent,
                });
            }
        }
    }

    /// Looks up the colour of texel (tx, ty) of a sprite, None if it's transparent.
    fn sprite_pixel(&self, attrs: Attributes, one_dimensional: bool, width: i32, tx: usize, ty: usize) -> Option<u16> {
        let color256 = attrs.color256();
        let (col, row) = (tx / 8, ty / 8);
        let tile = if one_dimensional {
            let stride = if color256 { 2 } else { 1 };
            attrs.tile() + (row * (width as usize / 8) + col) * stride
        } else if color256 {
            (attrs.tile() & !1) + row * 32 + col * 2
        } else {
            attrs.tile() + row * 32 + col
        };
        let base = OBJ_VRAM_BASE + (tile & 0x3FF) * 32;

        let (px, py) = (tx % 8, ty % 8);
        let idx = if color256 {
            self.vram.get(base + py * 8 + px).copied().unwrap_or(0)
        } else {
            let pair = self.vram.get(base + py * 4 + px / 2).copied().unwrap_or(0);
            if px & 1 == 0 {
                pair & 0xF
            } else {
                pair >> 4
            }
        };
        if idx == 0 {
            return None;
        }

        let entry = if color256 { usize::from(idx) } else { attrs.palette() * 16 + usize::from(idx) };
        Some(self.palette.read16(OBJ_PALETTE_BASE + entry * 2) & 0x7FFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_sprite(ppu: &mut Ppu, index: usize, attr0: u16, attr1: u16, attr2: u16) {
        ppu.oam.write16(index * 8, attr0);
        ppu.oam.write16(index * 8 + 2, attr1);
        ppu.oam.write16(index * 8 + 4, attr2);
    }

    fn hide_all(ppu: &mut Ppu) {
        for i in 0..128 {
            set_sprite(ppu, i, 0x0200, 0, 0);
        }
    }

    fn solid_tile(ppu: &mut Ppu, tile: usize, color: u8) {
        let base = OBJ_VRAM_BASE + tile * 32;
        for b in &mut ppu.vram[base..base + 32] {
            *b = color | (color << 4);
        }
    }

    #[test]
    fn lower_index_wins_same_priority() {
        let mut ppu = Ppu::new();
        hide_all(&mut ppu);
        ppu.palette.write16(0x200 + 2, 0x001F);
        ppu.palette.write16(0x200 + 4, 0x03E0);
        solid_tile(&mut ppu, 1, 1);
        solid_tile(&mut ppu, 2, 2);
        set_sprite(&mut ppu, 0, 0, 10, 1);
        set_sprite(&mut ppu, 1, 0, 14, 2);

        let mut layers = LineLayers::default();
        ppu.render_sprites(3, &mut layers);
        assert_eq!(layers.obj[9], None);
        assert_eq!(layers.obj[12].map(|p| p.color), Some(0x001F));
        assert_eq!(layers.obj[17].map(|p| p.color), Some(0x001F));
        assert_eq!(layers.obj[18].map(|p| p.color), Some(0x03E0));
        assert_eq!(layers.obj[22], None);

        // A better priority beats a lower index.
        set_sprite(&mut ppu, 1, 0, 14, 2);
        set_sprite(&mut ppu, 0, 0, 10, 0x0401);
        let mut layers = LineLayers::default();
        ppu.render_sprites(3, &mut layers);
        assert_eq!(layers.obj[15].map(|p| p.color), Some(0x03E0));
        assert_eq!(layers.obj[15].map(|p| p.priority), Some(0));
    }

    #[test]
    fn flips_and_window_mode() {
        let mut ppu = Ppu::new();
        hide_all(&mut ppu);
        ppu.palette.write16(0x200 + 2, 0x7FFF);
        // Only the leftmost column of tile 3 is opaque.
        let base = OBJ_VRAM_BASE + 3 * 32;
        for row in 0..8 {
            ppu.vram[base + row * 4] = 0x01;
        }
        set_sprite(&mut ppu, 0, 0, 0x1000, 3);
        let mut layers = LineLayers::default();
        ppu.render_sprites(0, &mut layers);
        assert_eq!(layers.obj[0], None);
        assert!(layers.obj[7].is_some());

        set_sprite(&mut ppu, 0, 0x0800, 0, 3);
        let mut layers = LineLayers::default();
        ppu.render_sprites(0, &mut layers);
        assert_eq!(layers.obj[0], None);
        assert!(layers.obj_window[0]);
    }

    #[test]
    fn one_dimensional_mapping() {
        let mut ppu = Ppu::new();
        hide_all(&mut ppu);
        ppu.palette.write16(0x200 + 2, 0x001F);
        ppu.palette.write16(0x200 + 4, 0x03E0);
        solid_tile(&mut ppu, 1, 1); // 1D neighbour
        solid_tile(&mut ppu, 32, 2); // 2D neighbour
        // 16x16 sprite, second tile row.
        set_sprite(&mut ppu, 0, 0, 0x4000, 0);

        let mut layers = LineLayers::default();
        ppu.render_sprites(8, &mut layers);
        assert_eq!(layers.obj[0].map(|p| p.color), Some(0x03E0));

        ppu.dispcnt |= 0x40;
        solid_tile(&mut ppu, 2, 1);
        let mut layers = LineLayers::default();
        ppu.render_sprites(8, &mut layers);
        assert_eq!(layers.obj[0].map(|p| p.color), Some(0x001F));
    }

    #[test]
    fn affine_double_size() {
        let mut ppu = Ppu::new();
        hide_all(&mut ppu);
        ppu.palette.write16(0x200 + 2, 0x001F);
        solid_tile(&mut ppu, 0, 1);
        // Identity matrix in group 0.
        ppu.oam.write16(6, 0x100);
        ppu.oam.write16(30, 0x100);
        set_sprite(&mut ppu, 0, 0x0300, 0, 0);

        let mut layers = LineLayers::default();
        ppu.render_sprites(6, &mut layers);
        assert_eq!(layers.obj[3], None);
        assert!(layers.obj[4].is_some());
        assert!(layers.obj[11].is_some());
        assert_eq!(layers.obj[12], None);
    }

    #[test]
    fn wraps_at_screen_edges() {
        let mut ppu = Ppu::new();
        hide_all(&mut ppu);
        ppu.palette.write16(0x200 + 2, 0x001F);
        solid_tile(&mut ppu, 0, 1);
        set_sprite(&mut ppu, 0, 0x00FC, 0x01FC, 0);

        let mut layers = LineLayers::default();
        ppu.render_sprites(2, &mut layers);
        assert!(layers.obj[0].is_some());
        assert!(layers.obj[3].is_some());
        assert_eq!(layers.obj[4], None);
    }
}
