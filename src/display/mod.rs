// src/display/mod.rs
//! Display ownership and draw gating.
//!
//! - Surface: backend primitives (fbdev, mock)
//! - DisplayController: when this process may touch the panel at all
//! - Frame: the only way to draw, handed out while drawing is allowed

pub mod canvas;
pub mod fbdev;
pub mod mock;
pub mod surface;


use anyhow::{bail, Result};
use log::{debug, error};
use std::path::Path;

use crate::control::LoopControl;
pub use fbdev::FbdevSurface;
pub use mock::{DrawOp, MockSurface};
pub use surface::{Image, Rect, Rgba, Surface};

const PROGRESS_MARGIN: i32 = 10;
const PROGRESS_DONE: Rgba = Rgba::WHITE;
const PROGRESS_TODO: Rgba = Rgba::opaque(84, 84, 84);
const OVERLAY_TEXT_X: i32 = 20;
const OVERLAY_TEXT_Y: i32 = 20;

/// Repaints the current content after drawing becomes possible again.
pub trait Redraw {
    fn redraw(&mut self, display: &mut DisplayController);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayState {
    pub acquired: bool,
    /// Permanent once set.
    pub released: bool,
    pub enabled: bool,
    pub blanked: bool,
}

impl DisplayState {
    pub fn is_acquired(&self) -> bool {
        self.acquired && !self.released
    }

    pub fn can_draw(&self) -> bool {
        self.is_acquired() && self.enabled && !self.blanked
    }
}

pub struct DisplayController {
    surface: Box<dyn Surface>,
    state: DisplayState,
    logo: Option<Image>,
    control: LoopControl,
}

impl DisplayController {
    pub fn new(surface: Box<dyn Surface>, control: LoopControl) -> Self {
        Self {
            surface,
            state: DisplayState::default(),
            logo: None,
            control,
        }
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    /// Opens the surface on first use. Tries only once, and never after
    /// [`release`](Self::release).
    pub fn acquire(&mut self) {
        if self.state.acquired || self.state.released {
            return;
        }
        self.state.acquired = true;
        match self.surface.init(true) {
            Ok(()) => {
                debug!("Display acquired");
                self.surface.clear(Rgba::BLACK);
            }
            Err(e) => {
                error!("Display init failed: {:#}", e);
                self.release();
                self.control.request_stop("display init failed");
            }
        }
    }

    /// Gives the display up for good.
    pub fn release(&mut self) {
        if self.state.released {
            return;
        }
        self.state.released = true;
        self.state.enabled = false;
        self.logo = None;
        self.surface.exit();
        debug!("Display released");
    }

    /// Grants or withdraws permission to draw. Enabling acquires the display
    /// lazily and repaints through `redraw`; disabling only blanks, the
    /// content stays loaded.
    pub fn set_updates_enabled(&mut self, enabled: bool, redraw: Option<&mut dyn Redraw>) {
        if enabled {
            self.acquire();
        }
        let enabled = enabled && self.state.is_acquired();
        if self.state.enabled == enabled {
            return;
        }
        debug!("Display updates enabled: {} -> {}", self.state.enabled, enabled);
        self.state.enabled = enabled;
        if enabled {
            self.set_blanked(false);
            if let Some(redraw) = redraw {
                redraw.redraw(self);
            }
        } else {
            self.set_blanked(true);
        }
    }

    pub fn set_blanked(&mut self, blanked: bool) {
        if self.state.is_acquired() && self.state.blanked != blanked {
            self.state.blanked = blanked;
            self.surface.blank(blanked);
        }
    }

    pub fn can_draw(&self) -> bool {
        self.state.can_draw()
    }

    /// Replaces the loaded image.
    pub fn load_image(&mut self, path: &Path) -> Result<()> {
        if self.state.released {
            bail!("{}: display already released", path.display());
        }
        self.logo = None;
        self.logo = Some(self.surface.load_image(path)?);
        debug!("Loaded image {}", path.display());
        Ok(())
    }

    pub fn has_image(&self) -> bool {
        self.logo.is_some()
    }

    /// A drawing handle, or `None` whenever drawing is not allowed right now.
    pub fn frame(&mut self) -> Option<Frame<'_>> {
        if !self.state.can_draw() {
            return None;
        }
        Some(Frame {
            surface: self.surface.as_mut(),
            logo: self.logo.as_ref(),
        })
    }
}

pub struct Frame<'a> {
    surface: &'a mut dyn Surface,
    logo: Option<&'a Image>,
}

impl Frame<'_> {
    pub fn clear(&mut self, color: Rgba) {
        self.surface.clear(color);
    }

    pub fn overlay_text(&mut self, text: &str) {
        self.surface
            .text(OVERLAY_TEXT_X, OVERLAY_TEXT_Y, text, Rgba::WHITE);
    }

    /// Draws the loaded image in the middle of the screen.
    pub fn logo_centered(&mut self) {
        if let Some(logo) = self.logo {
            let x = (self.surface.width() as i32 - logo.width as i32) / 2;
            let y = (self.surface.height() as i32 - logo.height as i32) / 2;
            self.surface.blit(logo, x, y);
        }
    }

    /// Two-tone bar across the middle of the screen, `percent` of it filled,
    /// with the loaded image (if any) just above it.
    pub fn progress_bar(&mut self, percent: u32) {
        let width = self.surface.width() as i32;
        let height = self.surface.height() as i32;
        let split = (width - 2 * PROGRESS_MARGIN) * percent.min(100) as i32 / 100;
        let y1 = height / 2 + PROGRESS_MARGIN;
        let y2 = height / 2 + 20;

        self.surface.fill(
            Rect {
                x1: PROGRESS_MARGIN,
                y1,
                x2: PROGRESS_MARGIN + split,
                y2,
            },
            PROGRESS_DONE,
        );
        self.surface.fill(
            Rect {
                x1: PROGRESS_MARGIN + split,
                y1,
                x2: width - PROGRESS_MARGIN,
                y2,
            },
            PROGRESS_TODO,
        );

        if let Some(logo) = self.logo {
            let x = (width - logo.width as i32) / 2;
            let y = height / 2 - logo.height as i32 - 2 * PROGRESS_MARGIN;
            self.surface.blit(logo, x, y);
        }
    }

    pub fn present(self) {
        self.surface.flip();
    }
}
