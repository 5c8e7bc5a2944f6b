// src/display/fbdev.rs
//! Linux fbdev backend.
//!
//! Draws into an off-screen [`Canvas`] and converts it to the panel's pixel
//! format on flip, so a partially drawn frame is never visible.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

use super::canvas::Canvas;
use super::surface::{Image, Rect, Rgba, Surface};

const FB_DEVICES: [&str; 2] = ["/dev/graphics/fb0", "/dev/fb0"];

const FBIOGET_VSCREENINFO: u16 = 0x4600;
const FBIOGET_FSCREENINFO: u16 = 0x4602;
const FBIOBLANK: u16 = 0x4611;
const FB_BLANK_UNBLANK: libc::c_int = 0;
const FB_BLANK_POWERDOWN: libc::c_int = 4;

#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct FbBitfield {
    offset: u32,
    length: u32,
    msb_right: u32,
}

// Kernel ABI mirrors; most fields are only written by the ioctls.
#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct FbVarScreenInfo {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    grayscale: u32,
    red: FbBitfield,
    green: FbBitfield,
    blue: FbBitfield,
    transp: FbBitfield,
    nonstd: u32,
    activate: u32,
    height: u32,
    width: u32,
    accel_flags: u32,
    pixclock: u32,
    left_margin: u32,
    right_margin: u32,
    upper_margin: u32,
    lower_margin: u32,
    hsync_len: u32,
    vsync_len: u32,
    sync: u32,
    vmode: u32,
    rotate: u32,
    colorspace: u32,
    reserved: [u32; 4],
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct FbFixScreenInfo {
    id: [u8; 16],
    smem_start: libc::c_ulong,
    smem_len: u32,
    type_: u32,
    type_aux: u32,
    visual: u32,
    xpanstep: u16,
    ypanstep: u16,
    ywrapstep: u16,
    line_length: u32,
    mmio_start: libc::c_ulong,
    mmio_len: u32,
    accel: u32,
    capabilities: u16,
    reserved: [u16; 2],
}

nix::ioctl_read_bad!(fbioget_vscreeninfo, FBIOGET_VSCREENINFO, FbVarScreenInfo);
nix::ioctl_read_bad!(fbioget_fscreeninfo, FBIOGET_FSCREENINFO, FbFixScreenInfo);
nix::ioctl_write_int_bad!(fbioblank, FBIOBLANK);

/// Scales an 8-bit channel into a bitfield of the panel's pixel format.
fn pack_channel(value: u8, field: &FbBitfield) -> u32 {
    if field.length == 0 {
        return 0;
    }
    let bits = field.length.min(8);
    ((value as u32) >> (8 - bits)) << field.offset
}

struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) } == -1 {
            warn!("munmap of framebuffer failed: {}", io::Error::last_os_error());
        }
    }
}

struct Device {
    file: File,
    var: FbVarScreenInfo,
    fix: FbFixScreenInfo,
    mapping: Mapping,
}

impl Device {
    fn open() -> Result<Self> {
        let file = FB_DEVICES
            .iter()
            .find_map(|path| {
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(path)
                    .inspect(|_| debug!("Opened framebuffer {}", path))
                    .ok()
            })
            .context("No framebuffer device could be opened")?;

        let mut var = FbVarScreenInfo::default();
        let mut fix = FbFixScreenInfo::default();
        unsafe {
            fbioget_vscreeninfo(file.as_raw_fd(), &mut var).context("FBIOGET_VSCREENINFO")?;
            fbioget_fscreeninfo(file.as_raw_fd(), &mut fix).context("FBIOGET_FSCREENINFO")?;
        }
        if !matches!(var.bits_per_pixel, 16 | 24 | 32) {
            bail!("Unsupported framebuffer depth: {} bpp", var.bits_per_pixel);
        }

        let len = fix.smem_len as usize;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error()).context("Failed to mmap framebuffer");
        }
        let ptr = NonNull::new(ptr as *mut u8).context("mmap returned null")?;

        info!(
            "Framebuffer {}x{} @ {} bpp, line length {}",
            var.xres, var.yres, var.bits_per_pixel, fix.line_length
        );
        Ok(Self {
            file,
            var,
            fix,
            mapping: Mapping { ptr, len },
        })
    }

    fn set_blank(&self, blank: bool) -> Result<()> {
        let arg = if blank {
            FB_BLANK_POWERDOWN
        } else {
            FB_BLANK_UNBLANK
        };
        unsafe { fbioblank(self.file.as_raw_fd(), arg) }.context("FBIOBLANK")?;
        Ok(())
    }

    fn present(&mut self, canvas: &Canvas) {
        let bytes_per_pixel = (self.var.bits_per_pixel / 8) as usize;
        let line_length = self.fix.line_length as usize;
        let base = self.var.yoffset as usize * line_length;
        let memory =
            unsafe { std::slice::from_raw_parts_mut(self.mapping.ptr.as_ptr(), self.mapping.len) };

        let width = canvas.width() as usize;
        for (y, row) in canvas.pixels().chunks_exact(width * 4).enumerate() {
            let row_start = base + y * line_length;
            for (x, px) in row.chunks_exact(4).enumerate() {
                let value = pack_channel(px[0], &self.var.red)
                    | pack_channel(px[1], &self.var.green)
                    | pack_channel(px[2], &self.var.blue)
                    | pack_channel(255, &self.var.transp);
                let start = row_start + x * bytes_per_pixel;
                let Some(dst) = memory.get_mut(start..start + bytes_per_pixel) else {
                    return;
                };
                dst.copy_from_slice(&value.to_le_bytes()[..bytes_per_pixel]);
            }
        }
    }
}

/// [`Surface`] over `/dev/fb0`. Nothing is opened until `init`.
#[derive(Default)]
pub struct FbdevSurface {
    device: Option<Device>,
    canvas: Option<Canvas>,
}

impl FbdevSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Surface for FbdevSurface {
    fn init(&mut self, reset_panel: bool) -> Result<()> {
        let device = Device::open()?;
        if reset_panel {
            if let Err(e) = device.set_blank(true).and_then(|_| device.set_blank(false)) {
                warn!("Panel reset failed: {:#}", e);
            }
        }
        self.canvas = Some(Canvas::new(device.var.xres, device.var.yres));
        self.device = Some(device);
        Ok(())
    }

    fn exit(&mut self) {
        self.canvas = None;
        if self.device.take().is_some() {
            debug!("Framebuffer released");
        }
    }

    fn width(&self) -> u32 {
        self.canvas.as_ref().map_or(0, Canvas::width)
    }

    fn height(&self) -> u32 {
        self.canvas.as_ref().map_or(0, Canvas::height)
    }

    fn clear(&mut self, color: Rgba) {
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.clear(color);
        }
    }

    fn fill(&mut self, rect: Rect, color: Rgba) {
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.fill(rect, color);
        }
    }

    fn blit(&mut self, image: &Image, x: i32, y: i32) {
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.blit(image, x, y);
        }
    }

    fn text(&mut self, x: i32, y: i32, text: &str, color: Rgba) {
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.text(x, y, text, color);
        }
    }

    fn flip(&mut self) {
        if let (Some(device), Some(canvas)) = (self.device.as_mut(), self.canvas.as_ref()) {
            device.present(canvas);
        }
    }

    fn blank(&mut self, blank: bool) {
        if let Some(device) = self.device.as_ref() {
            if let Err(e) = device.set_blank(blank) {
                warn!("{:#}", e);
            }
        }
    }

    fn load_image(&mut self, path: &Path) -> Result<Image> {
        Image::decode_png(path)
    }
}
