// src/os/epoll.rs

//! Thin wrapper around `epoll` using raw `libc` FFI calls. This is the only
//! place where the main loop blocks: every descriptor the splash reacts to
//! (signalfd, handoff listener, inotify, bus waker) is registered here under
//! a caller-chosen token.

use anyhow::{Context, Result};
use bitflags::bitflags;
use log::{debug, trace, warn};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

const EPOLL_CREATE_CLOEXEC: libc::c_int = libc::O_CLOEXEC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EpollCtlOp {
    Add = libc::EPOLL_CTL_ADD,
    Del = libc::EPOLL_CTL_DEL,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EpollFlags: u32 {
        const EPOLLIN = libc::EPOLLIN as u32;
        const EPOLLOUT = libc::EPOLLOUT as u32;
        const EPOLLPRI = libc::EPOLLPRI as u32;
        const EPOLLERR = libc::EPOLLERR as u32;
        const EPOLLHUP = libc::EPOLLHUP as u32;
        const EPOLLRDHUP = libc::EPOLLRDHUP as u32;
    }
}

/// A readiness notification returned from [`EventMonitor::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpollEvent {
    pub token: u64,
    pub flags: EpollFlags,
}

impl EpollEvent {
    /// True when the descriptor is readable and nothing else is reported.
    pub fn is_pure_readable(&self) -> bool {
        self.flags == EpollFlags::EPOLLIN
    }
}

fn new_libc_epoll_event(flags: EpollFlags, token: u64) -> libc::epoll_event {
    libc::epoll_event {
        events: flags.bits(),
        u64: token,
    }
}

/// Rounds up so a pending timer never causes a zero-length busy wait.
fn timeout_to_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_micros().div_ceil(1000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

const MAX_EVENTS_BUFFER_SIZE: usize = 16;

#[derive(Debug)]
pub struct EventMonitor {
    epoll_fd: RawFd,
    event_buffer: [libc::epoll_event; MAX_EVENTS_BUFFER_SIZE],
}

impl EventMonitor {
    pub fn new() -> Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(EPOLL_CREATE_CLOEXEC) };
        if epoll_fd == -1 {
            return Err(io::Error::last_os_error())
                .context("Failed to create epoll instance (epoll_create1)");
        }
        debug!("EventMonitor created with epoll_fd: {}", epoll_fd);
        Ok(Self {
            epoll_fd,
            event_buffer: [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS_BUFFER_SIZE],
        })
    }

    fn ctl(&self, op: EpollCtlOp, fd: RawFd, token: u64, flags: EpollFlags) -> io::Result<()> {
        let mut event = new_libc_epoll_event(flags, token);
        if unsafe { libc::epoll_ctl(self.epoll_fd, op as libc::c_int, fd, &mut event) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn add(&self, fd: RawFd, token: u64, flags: EpollFlags) -> Result<()> {
        self.ctl(EpollCtlOp::Add, fd, token, flags)
            .with_context(|| format!("Failed to add fd {} to epoll (token: {})", fd, token))?;
        trace!(
            "Added fd {} to epoll_fd {} with token {} and flags {:?}",
            fd,
            self.epoll_fd,
            token,
            flags
        );
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> Result<()> {
        self.ctl(EpollCtlOp::Del, fd, 0, EpollFlags::empty())
            .with_context(|| format!("Failed to delete fd {} from epoll", fd))?;
        trace!("Deleted fd {} from epoll_fd {}", fd, self.epoll_fd);
        Ok(())
    }

    /// Blocks until at least one registered descriptor is ready or `timeout`
    /// elapses. `None` waits indefinitely.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<EpollEvent>> {
        let timeout_ms = timeout_to_ms(timeout);
        trace!(
            "EventMonitor: polling for events with timeout {}ms on epoll_fd {}",
            timeout_ms,
            self.epoll_fd
        );

        let num_events = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                self.event_buffer.as_mut_ptr(),
                MAX_EVENTS_BUFFER_SIZE as libc::c_int,
                timeout_ms,
            )
        };

        if num_events == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("EventMonitor: epoll_wait interrupted (EINTR), returning no events.");
                return Ok(Vec::new());
            }
            return Err(err).context("epoll_wait failed in EventMonitor");
        }

        Ok(self.event_buffer[..num_events as usize]
            .iter()
            .map(|event| EpollEvent {
                token: event.u64,
                flags: EpollFlags::from_bits_truncate(event.events),
            })
            .collect())
    }
}

impl Drop for EventMonitor {
    fn drop(&mut self) {
        if unsafe { libc::close(self.epoll_fd) } == -1 {
            warn!(
                "Failed to close epoll_fd {} in EventMonitor::drop: {}",
                self.epoll_fd,
                io::Error::last_os_error()
            );
        } else {
            debug!("Closed epoll_fd {} in EventMonitor::drop", self.epoll_fd);
        }
    }
}
