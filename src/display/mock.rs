// src/display/mock.rs
//! Recording [`Surface`] for tests. Clones share one operation log, so a
//! test can keep a handle after boxing the surface into a controller.

use anyhow::{bail, Result};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::surface::{Image, Rect, Rgba, Surface};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOp {
    Init { reset_panel: bool },
    Exit,
    Clear(Rgba),
    Fill(Rect, Rgba),
    Blit { source: PathBuf, x: i32, y: i32 },
    Text { text: String, x: i32, y: i32 },
    Flip,
    Blank(bool),
}

#[derive(Debug, Clone)]
pub struct MockSurface {
    ops: Rc<RefCell<Vec<DrawOp>>>,
    missing: Rc<RefCell<HashSet<PathBuf>>>,
    fail_init: bool,
    width: u32,
    height: u32,
}

impl Default for MockSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSurface {
    pub fn new() -> Self {
        Self {
            ops: Rc::default(),
            missing: Rc::default(),
            fail_init: false,
            width: 540,
            height: 960,
        }
    }

    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::new()
        }
    }

    /// Makes `load_image` fail for `path`.
    pub fn mark_missing(&self, path: impl Into<PathBuf>) {
        self.missing.borrow_mut().insert(path.into());
    }

    pub fn ops(&self) -> Vec<DrawOp> {
        self.ops.borrow().clone()
    }

    pub fn take_ops(&self) -> Vec<DrawOp> {
        std::mem::take(&mut *self.ops.borrow_mut())
    }

    pub fn flip_count(&self) -> usize {
        self.ops.borrow().iter().filter(|op| **op == DrawOp::Flip).count()
    }

    /// Sources of every blit, in draw order.
    pub fn blitted(&self) -> Vec<PathBuf> {
        self.ops
            .borrow()
            .iter()
            .filter_map(|op| match op {
                DrawOp::Blit { source, .. } => Some(source.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: DrawOp) {
        self.ops.borrow_mut().push(op);
    }
}

impl Surface for MockSurface {
    fn init(&mut self, reset_panel: bool) -> Result<()> {
        self.record(DrawOp::Init { reset_panel });
        if self.fail_init {
            bail!("mock display init failure");
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.record(DrawOp::Exit);
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn clear(&mut self, color: Rgba) {
        self.record(DrawOp::Clear(color));
    }

    fn fill(&mut self, rect: Rect, color: Rgba) {
        self.record(DrawOp::Fill(rect, color));
    }

    fn blit(&mut self, image: &Image, x: i32, y: i32) {
        self.record(DrawOp::Blit {
            source: image.source.clone(),
            x,
            y,
        });
    }

    fn text(&mut self, x: i32, y: i32, text: &str, _color: Rgba) {
        self.record(DrawOp::Text {
            text: text.to_string(),
            x,
            y,
        });
    }

    fn flip(&mut self) {
        self.record(DrawOp::Flip);
    }

    fn blank(&mut self, blank: bool) {
        self.record(DrawOp::Blank(blank));
    }

    fn load_image(&mut self, path: &Path) -> Result<Image> {
        if self.missing.borrow().contains(path) {
            bail!("{}: no such image", path.display());
        }
        Ok(Image {
            source: path.to_path_buf(),
            width: 100,
            height: 50,
            pixels: vec![255; 100 * 50 * 4],
        })
    }
}
