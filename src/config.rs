// src/config.rs

//! Run configuration: what to show, for how long, and how to leave.
//!
//! A [`Config`] is built from the command line, optionally layered over a
//! JSON file. Image names are resolved into an [`ImageList`] once, and the
//! presentation mode is chosen from the result by [`PresentationMode::select`].

use anyhow::{Context, Result};
use log::{debug, error};
use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on images accepted from the command line.
pub const IMAGES_MAX: usize = 30;

pub const DEFAULT_IMAGES_DIR: &str = "/res/images";

// --- Top-Level Configuration ---

/// Durations are in milliseconds; zero means "not given".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Rotate images over this period.
    pub animate_ms: u64,
    /// Directory searched for image names that are not paths.
    pub images_dir: PathBuf,
    /// Show a progress bar filling up over this time.
    pub progress_ms: u64,
    /// Stop unconditionally after this time.
    pub stop_after_ms: u64,
    /// Text drawn in the top left corner.
    pub text: Option<String>,
    /// Image names, paths or stems.
    pub images: Vec<String>,
    /// Send a readiness notification to the service manager.
    pub notify_ready: bool,
    /// Leave the display as it is on exit.
    pub skip_cleanup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            animate_ms: 0,
            images_dir: PathBuf::from(DEFAULT_IMAGES_DIR),
            progress_ms: 0,
            stop_after_ms: 0,
            text: None,
            images: Vec::new(),
            notify_ready: false,
            skip_cleanup: false,
        }
    }
}

impl Config {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn animate_period(&self) -> Option<Duration> {
        non_zero_ms(self.animate_ms)
    }

    pub fn progress_duration(&self) -> Option<Duration> {
        non_zero_ms(self.progress_ms)
    }

    pub fn stop_after(&self) -> Option<Duration> {
        non_zero_ms(self.stop_after_ms)
    }

    /// Resolves [`images`](Self::images) against [`images_dir`](Self::images_dir).
    pub fn resolve_images(&self) -> ImageList {
        let mut list = ImageList::new(&self.images_dir);
        for name in &self.images {
            list.add(name);
        }
        list
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// --- Image List ---

/// Readable image files, in command line order, at most [`IMAGES_MAX`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageList {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl ImageList {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ImageList {
            dir: dir.into(),
            paths: Vec::new(),
        }
    }

    /// Adds the first readable candidate for `name`: the name as given, then
    /// `dir/name`, then `dir/name.png`. Unresolvable names and names past the
    /// cap are logged and skipped.
    pub fn add(&mut self, name: &str) -> Option<&Path> {
        if self.paths.len() >= IMAGES_MAX {
            error!("{}: ignored, too many images", name);
            return None;
        }

        let candidates = [
            PathBuf::from(name),
            self.dir.join(name),
            self.dir.join(format!("{}.png", name)),
        ];
        for candidate in candidates {
            match access(&candidate, AccessFlags::R_OK) {
                Ok(()) => {
                    debug!("got image {:?} to display", candidate);
                    self.paths.push(candidate);
                    return self.paths.last().map(PathBuf::as_path);
                }
                Err(Errno::ENOENT) => {}
                Err(e) => error!("{}: access(): {}", candidate.display(), e),
            }
        }
        error!("{}: no readable image found", name);
        None
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Forgets every cached path.
    pub fn clear(&mut self) {
        self.paths.clear();
    }
}

// --- Presentation Mode ---

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("Can only show one image with progressbar (got {0})")]
    TooManyImagesForProgress(usize),
    #[error("Animating requires at least 2 images (got {0})")]
    NotEnoughImagesToAnimate(usize),
    #[error("Neither text nor image given")]
    NothingToShow,
}

/// The one content strategy of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationMode {
    SingleImage {
        path: PathBuf,
    },
    ProgressBar {
        duration: Duration,
        decoration: Option<PathBuf>,
    },
    Animate {
        images: Vec<PathBuf>,
        duration: Duration,
    },
    TextOnly,
}

impl PresentationMode {
    /// Progress bar wins over animation, animation over a single image, and
    /// a single image over plain text.
    pub fn select(config: &Config, images: &ImageList) -> Result<Self, ModeError> {
        if let Some(duration) = config.progress_duration() {
            if images.len() > 1 {
                return Err(ModeError::TooManyImagesForProgress(images.len()));
            }
            return Ok(PresentationMode::ProgressBar {
                duration,
                decoration: images.get(0).map(Path::to_path_buf),
            });
        }
        if let Some(duration) = config.animate_period() {
            if images.len() < 2 {
                return Err(ModeError::NotEnoughImagesToAnimate(images.len()));
            }
            return Ok(PresentationMode::Animate {
                images: images.paths().to_vec(),
                duration,
            });
        }
        if let Some(path) = images.get(0) {
            return Ok(PresentationMode::SingleImage {
                path: path.to_path_buf(),
            });
        }
        if config.text.is_some() {
            return Ok(PresentationMode::TextOnly);
        }
        Err(ModeError::NothingToShow)
    }
}
