// src/display/surface.rs
//! Surface trait - the primitives the splash needs from a display backend.
//!
//! Mirrors the small immediate-mode API of recovery-style graphics
//! libraries: clear, fill, blit, text, flip, blank. All policy (when drawing
//! is allowed, what to draw) lives above this trait.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::opaque(0, 0, 0);
    pub const WHITE: Rgba = Rgba::opaque(255, 255, 255);

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

/// Half-open pixel rectangle `[x1, x2) x [y1, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Decoded RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Image {
    /// Decodes a PNG file, normalizing every color type to RGBA8.
    pub fn decode_png(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("{}: open", path.display()))?;
        let mut decoder = png::Decoder::new(BufReader::new(file));
        decoder.set_transformations(png::Transformations::normalize_to_color8());
        let mut reader = decoder
            .read_info()
            .with_context(|| format!("{}: not a PNG image", path.display()))?;
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader
            .next_frame(&mut buf)
            .with_context(|| format!("{}: failed to decode", path.display()))?;
        buf.truncate(info.buffer_size());

        let pixels = match info.color_type {
            png::ColorType::Rgba => buf,
            png::ColorType::Rgb => buf
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect(),
            png::ColorType::GrayscaleAlpha => buf
                .chunks_exact(2)
                .flat_map(|p| [p[0], p[0], p[0], p[1]])
                .collect(),
            png::ColorType::Grayscale => buf.iter().flat_map(|&v| [v, v, v, 255]).collect(),
            png::ColorType::Indexed => {
                anyhow::bail!("{}: palette was not expanded", path.display())
            }
        };

        Ok(Self {
            source: path.to_path_buf(),
            width: info.width,
            height: info.height,
            pixels,
        })
    }
}

/// Minimal platform display interface.
///
/// `init` is the only call that may fail hard; drawing calls are
/// best-effort and report problems through the log.
pub trait Surface {
    /// Opens the device. With `reset_panel` set the panel is power-cycled
    /// through a blank/unblank pair; it is left unblanked either way.
    fn init(&mut self, reset_panel: bool) -> Result<()>;
    /// Releases the device. No further calls follow.
    fn exit(&mut self);
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn clear(&mut self, color: Rgba);
    fn fill(&mut self, rect: Rect, color: Rgba);
    fn blit(&mut self, image: &Image, x: i32, y: i32);
    fn text(&mut self, x: i32, y: i32, text: &str, color: Rgba);
    /// Presents everything drawn since the previous flip.
    fn flip(&mut self);
    fn blank(&mut self, blank: bool);
    fn load_image(&mut self, path: &Path) -> Result<Image>;
}
