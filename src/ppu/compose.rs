//! Merges the per-layer line buffers into the final scanline. This is where windows decide which layers are visible
//! at each pixel, priorities pick the top two layers, and the colour special effects (alpha blending and brightness
//! fades) are applied.

use super::{Ppu, SCREEN_WIDTH};

/// Marks a background pixel as transparent. Colours are 15 bit so the top bit is free.
pub const TRANSPARENT: u16 = 0x8000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Layer {
    Bg0 = 0,
    Bg1 = 1,
    Bg2 = 2,
    Bg3 = 3,
    Obj = 4,
    Backdrop = 5,
}

impl Layer {
    fn bit(self) -> u16 {
        1 << self as u16
    }
}

const BACKGROUNDS: [Layer; 4] = [Layer::Bg0, Layer::Bg1, Layer::Bg2, Layer::Bg3];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ObjPixel {
    pub color: u16,
    pub priority: u8,
    pub semi_transparent: bool,
}

/// Everything the background and sprite renderers produced for one scanline.
pub struct LineLayers {
    pub bg: [[u16; SCREEN_WIDTH]; 4],
    pub bg_enabled: [bool; 4],
    pub obj: [Option<ObjPixel>; SCREEN_WIDTH],
    pub obj_window: [bool; SCREEN_WIDTH],
}

impl Default for LineLayers {
    fn default() -> LineLayers {
        LineLayers {
            bg: [[TRANSPARENT; SCREEN_WIDTH]; 4],
            bg_enabled: [false; 4],
            obj: [None; SCREEN_WIDTH],
            obj_window: [false; SCREEN_WIDTH],
        }
    }
}

#[derive(Clone, Copy)]
struct Candidate {
    layer: Layer,
    color: u16,
    semi_transparent: bool,
}

fn in_range(v: u16, packed: u16) -> bool {
    let start = packed >> 8;
    let end = packed & 0xFF;
    if start <= end {
        v >= start && v < end
    } else {
        v >= start || v < end
    }
}

impl Ppu {
    /// The 6 bit layer/effect mask that applies at pixel (x, y).
    fn window_mask(&self, x: u16, y: u16, obj_window: bool) -> u16 {
        if self.dispcnt & 0xE000 == 0 {
            return 0x3F;
        }
        if self.dispcnt & 0x2000 != 0 && in_range(x, self.winh[0]) && in_range(y, self.winv[0]) {
            return self.winin & 0x3F;
        }
        if self.dispcnt & 0x4000 != 0 && in_range(x, self.winh[1]) && in_range(y, self.winv[1]) {
            return (self.winin >> 8) & 0x3F;
        }
        if self.dispcnt & 0x8000 != 0 && obj_window {
            return (self.winout >> 8) & 0x3F;
        }
        self.winout & 0x3F
    }

    fn backdrop(&self) -> u16 {
        self.palette.read16(0) & 0x7FFF
    }

    /// Composes one line of 15 bit BGR colour into `out`.
    pub fn compose_line(&self, layers: &LineLayers, y: u16, out: &mut [u16]) {
        for (x, px) in out.iter_mut().enumerate().take(SCREEN_WIDTH) {
            let mask = self.window_mask(x as u16, y, layers.obj_window[x]);
            let (top, below) = self.top_two(layers, x, mask);
            *px = if mask & 0x20 != 0 { self.blend(top, below) } else { top.color };
        }
    }

    fn top_two(&self, layers: &LineLayers, x: usize, mask: u16) -> (Candidate, Candidate) {
        let backdrop = Candidate {
            layer: Layer::Backdrop,
            color: self.backdrop(),
            semi_transparent: false,
        };
        let mut found = [backdrop, backdrop];
        let mut count = 0;

        // Layers are tested in BG0-BG3, OBJ order within a priority level, so ties go to the lower layer.
        'search: for priority in 0..4u8 {
            for &layer in &BACKGROUNDS {
                let bg = layer as usize;
                if !layers.bg_enabled[bg] || mask & layer.bit() == 0 || self.bgcnt[bg] & 3 != u16::from(priority) {
                    continue;
                }
                let color = layers.bg[bg][x];
                if color & TRANSPARENT != 0 {
                    continue;
                }
                found[count] = Candidate {
                    layer,
                    color,
                    semi_transparent: false,
                };
                count += 1;
                if count == 2 {
                    break 'search;
                }
            }
            if mask & Layer::Obj.bit() != 0 {
                if let Some(obj) = layers.obj[x] {
                    if obj.priority == priority {
                        found[count] = Candidate {
                            layer: Layer::Obj,
                            color: obj.color,
                            semi_transparent: obj.semi_transparent,
                        };
                        count += 1;
                        if count == 2 {
                            break 'search;
                        }
                    }
                }
            }
        }
        (found[0], found[1])
    }

    fn blend(&self, top: Candidate, below: Candidate) -> u16 {
        let first_target = self.bldcnt & top.layer.bit() != 0;
        let second_target = (self.bldcnt >> 8) & below.layer.bit() != 0;

        if top.semi_transparent && second_target {
            return self.alpha(top.color, below.color);
        }
        match (self.bldcnt >> 6) & 3 {
            1 if first_target && second_target => self.alpha(top.color, below.color),
            2 if first_target => self.brightness(top.color, true),
            3 if first_target => self.brightness(top.color, false),
            _ => top.color,
        }
    }

    fn alpha(&self, a: u16, b: u16) -> u16 {
        let eva = (self.bldalpha & 0x1F).min(16);
        let evb = ((self.bldalpha >> 8) & 0x1F).min(16);
        map_channels(a, b, |ca, cb| ((ca * eva + cb * evb) / 16).min(31))
    }

    fn brightness(&self, c: u16, increase: bool) -> u16 {
        let evy = u16::from(self.bldy).min(16);
        map_channels(c, 0, |ch, _| {
            if increase {
                ch + (31 - ch) * evy / 16
            } else {
                ch - ch * evy / 16
            }
        })
    }
}

fn map_channels<F: Fn(u16, u16) -> u16>(a: u16, b: u16, f: F) -> u16 {
    let mut out = 0;
    for shift in &[0, 5, 10] {
        let ca = (a >> shift) & 0x1F;
        let cb = (b >> shift) & 0x1F;
        out |= f(ca, cb) << shift;
    }
    out
}

/// Expands a 15 bit BGR colour to the ARGB8888 framebuffer format.
pub fn to_argb(c: u16) -> u32 {
    let r = u32::from(c & 0x1F) << 3;
    let g = u32::from((c >> 5) & 0x1F) << 3;
    let b = u32::from((c >> 10) & 0x1F) << 3;
    0xFF00_0000 | r << 16 | g << 8 | b
}
