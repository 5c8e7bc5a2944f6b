// src/presentation/mod.rs
//! Presentation modes.
//!
//! One [`Presentation`] drives the mode picked at startup. The coordinator
//! arms a repeating timer with the period returned by
//! [`start`](Presentation::start) and calls [`tick`](Presentation::tick) on
//! every expiry; all drawing goes through [`DisplayController::frame`], so a
//! tick while drawing is not allowed still advances the state but draws
//! nothing.


use log::{debug, error};
use std::path::Path;
use std::time::Duration;

use crate::config::PresentationMode;
use crate::control::LoopControl;
use crate::display::{DisplayController, Frame, Redraw, Rgba};

/// Progress runs over steps 0..=100.
const PROGRESS_STEPS: u64 = 101;
const PROGRESS_LAST_STEP: i32 = 100;

pub struct Presentation {
    mode: PresentationMode,
    overlay: Option<String>,
    /// Progress percentage or animation frame index; -1 before the first tick.
    step: i32,
    control: LoopControl,
}

impl Presentation {
    pub fn new(mode: PresentationMode, overlay: Option<String>, control: LoopControl) -> Self {
        Self {
            mode,
            overlay,
            step: -1,
            control,
        }
    }

    pub fn mode(&self) -> &PresentationMode {
        &self.mode
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    /// Loads what the mode needs and shows the first frame. Returns the tick
    /// period for the modes that change over time.
    pub fn start(&mut self, display: &mut DisplayController) -> Option<Duration> {
        let mode = self.mode.clone();
        let period = match &mode {
            PresentationMode::SingleImage { path } => {
                if !self.load(display, path) {
                    return None;
                }
                self.redraw(display);
                None
            }
            PresentationMode::ProgressBar {
                duration,
                decoration,
            } => {
                let period = period_of(*duration, PROGRESS_STEPS);
                if let Some(path) = decoration {
                    if !self.load(display, path) {
                        return None;
                    }
                }
                Some(period)
            }
            PresentationMode::Animate { images, duration } => {
                Some(period_of(*duration, images.len() as u64))
            }
            PresentationMode::TextOnly => {
                self.redraw(display);
                None
            }
        };

        if let Some(period) = period {
            debug!("Presentation tick period {:?}", period);
            if !self.tick(display) {
                return None;
            }
        }
        period
    }

    /// Advances by one step and draws it. Returns `false` once the mode is
    /// over; the stop has been requested by then.
    pub fn tick(&mut self, display: &mut DisplayController) -> bool {
        match &self.mode {
            PresentationMode::ProgressBar { .. } => {
                self.step += 1;
                if self.step > PROGRESS_LAST_STEP {
                    self.control.request_stop("progress complete");
                    return false;
                }
            }
            PresentationMode::Animate { images, .. } => {
                if images.is_empty() {
                    self.control.request_stop("no images to animate");
                    return false;
                }
                let count = images.len() as i32;
                self.step = (self.step + 1) % count;
                let path = images[self.step as usize].clone();
                if !self.load(display, &path) {
                    return false;
                }
            }
            PresentationMode::SingleImage { .. } | PresentationMode::TextOnly => return false,
        }
        self.redraw(display);
        true
    }

    fn load(&self, display: &mut DisplayController, path: &Path) -> bool {
        match display.load_image(path) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to load image: {:#}", e);
                self.control.request_stop("image load failed");
                false
            }
        }
    }

    fn draw_overlay(&self, frame: &mut Frame<'_>) {
        if let Some(text) = &self.overlay {
            frame.overlay_text(text);
        }
    }
}

impl Redraw for Presentation {
    fn redraw(&mut self, display: &mut DisplayController) {
        let Some(mut frame) = display.frame() else {
            return;
        };
        match &self.mode {
            PresentationMode::SingleImage { .. } => {
                self.draw_overlay(&mut frame);
                frame.logo_centered();
            }
            PresentationMode::ProgressBar { .. } => {
                self.draw_overlay(&mut frame);
                frame.progress_bar(self.step.clamp(0, PROGRESS_LAST_STEP) as u32);
            }
            PresentationMode::Animate { .. } => {
                frame.clear(Rgba::BLACK);
                self.draw_overlay(&mut frame);
                frame.logo_centered();
            }
            PresentationMode::TextOnly => self.draw_overlay(&mut frame),
        }
        frame.present();
    }
}

/// `duration / parts`, rounded up to whole milliseconds.
fn period_of(duration: Duration, parts: u64) -> Duration {
    let ms = duration.as_millis() as u64;
    Duration::from_millis(ms.div_ceil(parts.max(1)))
}
