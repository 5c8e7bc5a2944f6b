// src/control.rs
//! The single stop request shared by every component.
//!
//! Handlers never report failures to each other directly. Whatever goes
//! wrong, they log it and call [`LoopControl::request_stop`]; the main loop
//! checks the flag between handlers and winds down through the regular
//! cleanup path.

use log::{error, info};
use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug, Default)]
struct ControlState {
    running: Cell<bool>,
    stop_requested: Cell<bool>,
}

/// Cheap, clonable handle to the loop's stop flag. Single-threaded by
/// construction (`Rc`), like everything else the loop owns.
#[derive(Debug, Clone, Default)]
pub struct LoopControl {
    state: Rc<ControlState>,
}

impl LoopControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle whose loop counts as already running. Used by tests so a
    /// stop request sets the flag instead of terminating the process.
    pub fn running() -> Self {
        let control = Self::new();
        control.mark_running();
        control
    }

    pub fn mark_running(&self) {
        self.state.running.set(true);
    }

    pub fn is_running(&self) -> bool {
        self.state.running.get()
    }

    pub fn stop_requested(&self) -> bool {
        self.state.stop_requested.get()
    }

    /// Requests the loop to stop at the next safe point. Idempotent.
    ///
    /// Called before the loop has started, this exits the process right
    /// away with a failure status instead of returning.
    pub fn request_stop(&self, reason: &str) {
        if !self.state.running.get() {
            error!("Stop requested before main loop started ({}); exiting", reason);
            std::process::exit(libc::EXIT_FAILURE);
        }
        if !self.state.stop_requested.replace(true) {
            info!("Stop requested: {}", reason);
        }
    }
}
