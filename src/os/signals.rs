// src/os/signals.rs
//! SignalBridge - turns SIGTERM/SIGINT into a readable descriptor.
//!
//! The signals are blocked and routed into a `signalfd`, so no logic ever
//! runs in signal-handler context. The bridge is strictly one-shot: after the
//! first signal it unblocks the signals and drops the descriptor, so a second
//! signal gets the default disposition and kills a stuck shutdown.

use anyhow::{Context, Result};
use log::{debug, error, warn};
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::os::unix::io::AsRawFd;

use crate::control::LoopControl;
use crate::os::epoll::{EpollFlags, EventMonitor};

fn termination_signals() -> SigSet {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGTERM);
    mask.add(Signal::SIGINT);
    mask
}

#[derive(Debug)]
pub struct SignalBridge {
    mask: SigSet,
    signal_fd: Option<SignalFd>,
}

impl SignalBridge {
    /// Blocks the termination signals and starts watching the signalfd
    /// under `token`.
    pub fn install(monitor: &EventMonitor, token: u64) -> Result<Self> {
        let mask = termination_signals();
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None)
            .context("Could not block termination signals")?;

        let signal_fd = match SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC | SfdFlags::SFD_NONBLOCK) {
            Ok(fd) => fd,
            Err(e) => {
                unblock(&mask);
                return Err(e).context("Could not create signal fd");
            }
        };
        if let Err(e) = monitor.add(
            signal_fd.as_raw_fd(),
            token,
            EpollFlags::EPOLLIN | EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP,
        ) {
            unblock(&mask);
            return Err(e).context("Could not watch signal fd");
        }
        debug!("SignalBridge installed on fd {}", signal_fd.as_raw_fd());

        Ok(Self {
            mask,
            signal_fd: Some(signal_fd),
        })
    }

    pub fn is_active(&self) -> bool {
        self.signal_fd.is_some()
    }

    /// Consumes one queued signal, requests stop, then tears the bridge down.
    pub fn handle_event(&mut self, monitor: &EventMonitor, control: &LoopControl) {
        if let Some(signal_fd) = self.signal_fd.as_mut() {
            match signal_fd.read_signal() {
                Ok(Some(info)) => {
                    let signo = info.ssi_signo as i32;
                    match Signal::try_from(signo) {
                        Ok(signal) => error!("Caught signal {}: {}", signo, signal),
                        Err(_) => error!("Caught signal {}", signo),
                    }
                }
                Ok(None) => warn!("Signal fd readable but no signal queued"),
                Err(e) => error!("Could not read signal fd: {}", e),
            }
        }
        control.request_stop("termination signal");
        self.quit(monitor);
    }

    /// Restores default signal handling. Safe to call repeatedly.
    pub fn quit(&mut self, monitor: &EventMonitor) {
        unblock(&self.mask);
        if let Some(signal_fd) = self.signal_fd.take() {
            if let Err(e) = monitor.delete(signal_fd.as_raw_fd()) {
                warn!("Failed to unwatch signal fd: {:#}", e);
            }
            debug!("SignalBridge removed");
        }
    }
}

fn unblock(mask: &SigSet) {
    if let Err(e) = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(mask), None) {
        error!("Could not unblock signals: {}", e);
    }
}
