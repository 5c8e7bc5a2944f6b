// src/lib.rs
//! Boot and update splash for framebuffer devices.
//!
//! Shows a logo, a progress bar, a short animation, or a line of text while
//! sharing the display with a system compositor that may start later. Drawing
//! permission comes from the display policy manager over the system bus; a
//! local abstract socket lets a newer instance replace this one before the
//! bus exists.

pub mod bus_monitor;
pub mod cli;
pub mod compositor;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod display;
pub mod os;
pub mod presentation;
pub mod supervisor;
pub mod timer;
