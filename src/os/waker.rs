// src/os/waker.rs
//! EventLoopWaker - Cross-thread signaling to wake the main event loop.
//!
//! The service bus library answers method calls and watches name ownership
//! on its own threads. Those threads never touch splash state; they queue a
//! message and call `wake()`, which makes the eventfd readable and returns
//! the main loop from `epoll_wait`.

use anyhow::{Context, Result};
use log::{trace, warn};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Trait for waking the main event loop from background threads.
pub trait EventLoopWaker: Send + Sync {
    /// Wake the event loop, causing it to return from blocking poll.
    fn wake(&self) -> Result<()>;
}

/// Linux implementation of [`EventLoopWaker`] backed by an `eventfd`.
#[derive(Debug)]
pub struct EventFdWaker {
    fd: OwnedFd,
}

impl EventFdWaker {
    pub fn new() -> Result<Self> {
        let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if raw == -1 {
            return Err(io::Error::last_os_error()).context("Failed to create eventfd");
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        })
    }

    /// Resets the counter so the descriptor stops polling readable.
    /// Returns the number of wakeups coalesced since the last drain.
    pub fn drain(&self) -> u64 {
        let mut value: u64 = 0;
        let rc = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                warn!("Failed to drain eventfd {}: {}", self.fd.as_raw_fd(), err);
            }
            return 0;
        }
        value
    }
}

impl AsRawFd for EventFdWaker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl EventLoopWaker for EventFdWaker {
    fn wake(&self) -> Result<()> {
        let one: u64 = 1;
        let rc = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error()).context("Failed to write to eventfd");
        }
        trace!("EventFdWaker: woke loop via fd {}", self.fd.as_raw_fd());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_coalesce_wakeups_until_drained() -> Result<()> {
        let waker = EventFdWaker::new()?;
        assert_eq!(waker.drain(), 0);
        waker.wake()?;
        waker.wake()?;
        assert_eq!(waker.drain(), 2);
        assert_eq!(waker.drain(), 0);
        Ok(())
    }
}
