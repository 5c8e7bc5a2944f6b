// src/display/canvas.rs
//! Off-screen RGBA canvas the framebuffer backend draws into before a flip.

use font8x8::legacy::BASIC_LEGACY;

use super::surface::{Image, Rect, Rgba};

const GLYPH_SIZE: i32 = 8;
/// 8x8 glyphs are unreadable on phone-sized panels at 1:1.
pub const TEXT_SCALE: i32 = 2;

#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major RGBA bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let p = &self.pixels[i..i + 4];
        Some(Rgba {
            r: p[0],
            g: p[1],
            b: p[2],
            a: p[3],
        })
    }

    fn put(&mut self, x: i32, y: i32, color: Rgba) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let dst = &mut self.pixels[i..i + 4];
        if color.a == 255 {
            dst.copy_from_slice(&[color.r, color.g, color.b, 255]);
            return;
        }
        let a = color.a as u32;
        let blend = |s: u8, d: u8| ((s as u32 * a + d as u32 * (255 - a)) / 255) as u8;
        dst[0] = blend(color.r, dst[0]);
        dst[1] = blend(color.g, dst[1]);
        dst[2] = blend(color.b, dst[2]);
        dst[3] = 255;
    }

    pub fn clear(&mut self, color: Rgba) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&[color.r, color.g, color.b, color.a]);
        }
    }

    pub fn fill(&mut self, rect: Rect, color: Rgba) {
        let x1 = rect.x1.max(0);
        let y1 = rect.y1.max(0);
        let x2 = rect.x2.min(self.width as i32);
        let y2 = rect.y2.min(self.height as i32);
        for y in y1..y2 {
            for x in x1..x2 {
                self.put(x, y, color);
            }
        }
    }

    pub fn blit(&mut self, image: &Image, dx: i32, dy: i32) {
        for y in 0..image.height as i32 {
            for x in 0..image.width as i32 {
                let i = (y as usize * image.width as usize + x as usize) * 4;
                let Some(p) = image.pixels.get(i..i + 4) else {
                    return;
                };
                self.put(
                    dx + x,
                    dy + y,
                    Rgba {
                        r: p[0],
                        g: p[1],
                        b: p[2],
                        a: p[3],
                    },
                );
            }
        }
    }

    pub fn text(&mut self, x: i32, y: i32, text: &str, color: Rgba) {
        let advance = GLYPH_SIZE * TEXT_SCALE;
        for (column, ch) in text.chars().enumerate() {
            let glyph = BASIC_LEGACY
                .get(ch as usize)
                .copied()
                .unwrap_or(BASIC_LEGACY[b'?' as usize]);
            let origin_x = x + column as i32 * advance;
            for (row, bits) in glyph.iter().enumerate() {
                for bit in 0..GLYPH_SIZE {
                    if bits & (1 << bit) == 0 {
                        continue;
                    }
                    let px = origin_x + bit * TEXT_SCALE;
                    let py = y + row as i32 * TEXT_SCALE;
                    self.fill(
                        Rect {
                            x1: px,
                            y1: py,
                            x2: px + TEXT_SCALE,
                            y2: py + TEXT_SCALE,
                        },
                        color,
                    );
                }
            }
        }
    }
}
