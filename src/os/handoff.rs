// src/os/handoff.rs
//! Local rendezvous socket used to hand the display over between splash
//! instances before the system bus exists.
//!
//! The address lives in the abstract namespace: there is no filesystem entry
//! to clean up and nothing stale can block a later bind. The protocol has no
//! payload. A client connects and reads; the server accepts and holds the
//! connection until it exits, so the end-of-stream the client eventually
//! reads is the exit notification itself, crash included.

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info, warn};
use std::io::{self, ErrorKind, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixStream};

use crate::control::LoopControl;
use crate::os::epoll::{EpollEvent, EpollFlags, EventMonitor};

/// Abstract address shared with earlier splash releases, trailing NUL
/// included.
pub const DEFAULT_HANDOFF_NAME: &[u8] = b"yamuisplash\0";

const LISTEN_BACKLOG: libc::c_int = 1;

fn abstract_sockaddr(name: &[u8]) -> Result<(libc::sockaddr_un, libc::socklen_t)> {
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    if name.len() + 1 > addr.sun_path.len() {
        bail!("handoff socket name too long ({} bytes)", name.len());
    }
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    // sun_path[0] stays NUL: abstract namespace.
    for (dst, src) in addr.sun_path[1..].iter_mut().zip(name) {
        *dst = *src as libc::c_char;
    }
    let len = std::mem::size_of::<libc::sa_family_t>() + 1 + name.len();
    Ok((addr, len as libc::socklen_t))
}

fn display_name(name: &[u8]) -> String {
    format!("@{}", String::from_utf8_lossy(name).trim_end_matches('\0'))
}

/// Listening side, created only while the system bus is absent.
#[derive(Debug)]
pub struct HandoffServer {
    name: Vec<u8>,
    listener: Option<OwnedFd>,
    watched: bool,
    /// Accepted peers. Never closed: they must stay open until this process
    /// exits, whichever way it exits.
    held_peers: Vec<RawFd>,
}

impl HandoffServer {
    pub fn bind(name: &[u8], monitor: &EventMonitor, token: u64) -> Result<Self> {
        let label = display_name(name);
        let (addr, len) = abstract_sockaddr(name)?;

        let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
        if raw == -1 {
            return Err(io::Error::last_os_error()).with_context(|| format!("{}: socket()", label));
        }
        let listener = unsafe { OwnedFd::from_raw_fd(raw) };

        let rc = unsafe {
            libc::bind(
                listener.as_raw_fd(),
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                len,
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error()).with_context(|| format!("{}: bind()", label));
        }
        if unsafe { libc::listen(listener.as_raw_fd(), LISTEN_BACKLOG) } == -1 {
            return Err(io::Error::last_os_error()).with_context(|| format!("{}: listen()", label));
        }
        monitor
            .add(
                listener.as_raw_fd(),
                token,
                EpollFlags::EPOLLIN | EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP,
            )
            .with_context(|| format!("{}: could not watch listener", label))?;
        debug!("{}: handoff server listening on fd {}", label, listener.as_raw_fd());

        Ok(Self {
            name: name.to_vec(),
            listener: Some(listener),
            watched: true,
            held_peers: Vec::new(),
        })
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn has_peer(&self) -> bool {
        !self.held_peers.is_empty()
    }

    /// Reacts to readiness on the listener. Either outcome ends this
    /// instance: a peer asking us to go, or a broken listener.
    pub fn handle_event(&mut self, event: EpollEvent, monitor: &EventMonitor, control: &LoopControl) {
        let label = display_name(&self.name);
        if !event.is_pure_readable() {
            warn!("{}: listener condition {:?}", label, event.flags);
            self.unwatch(monitor);
            control.request_stop("handoff socket failure");
            return;
        }
        if self.accept_peer() {
            info!("{}: terminate requested by a newer instance", label);
            control.request_stop("handoff requested");
        }
    }

    fn accept_peer(&mut self) -> bool {
        let Some(listener) = self.listener.as_ref() else {
            return self.has_peer();
        };
        let fd = unsafe {
            libc::accept4(
                listener.as_raw_fd(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                libc::SOCK_CLOEXEC,
            )
        };
        if fd == -1 {
            error!(
                "{}: accept(): {}",
                display_name(&self.name),
                io::Error::last_os_error()
            );
        } else {
            self.held_peers.push(fd);
        }
        self.has_peer()
    }

    fn unwatch(&mut self, monitor: &EventMonitor) {
        if !self.watched {
            return;
        }
        self.watched = false;
        if let Some(listener) = self.listener.as_ref() {
            if let Err(e) = monitor.delete(listener.as_raw_fd()) {
                warn!("Failed to unwatch handoff listener: {:#}", e);
            }
        }
    }

    /// Closes the listener so the address is free for the next instance at
    /// once. The held peer stays open.
    pub fn close(&mut self, monitor: &EventMonitor) {
        self.unwatch(monitor);
        if self.listener.take().is_some() {
            debug!("{}: handoff server closed", display_name(&self.name));
        }
    }

    #[cfg(test)]
    pub(crate) fn close_held_peers(&mut self) {
        for fd in self.held_peers.drain(..) {
            drop(unsafe { OwnedFd::from_raw_fd(fd) });
        }
    }
}

/// Result of asking a previous instance to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Nothing was listening.
    NoInstance,
    /// The previous instance accepted and has since exited.
    Terminated,
}

/// Connects to a running instance and blocks until it has exited.
pub fn terminate_running_instance(name: &[u8]) -> Result<TerminateOutcome> {
    let label = display_name(name);
    let addr = SocketAddr::from_abstract_name(name)
        .with_context(|| format!("{}: invalid abstract address", label))?;

    let mut stream = match UnixStream::connect_addr(&addr) {
        Ok(stream) => stream,
        Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
            debug!("{}: server not running", label);
            return Ok(TerminateOutcome::NoInstance);
        }
        Err(e) => return Err(e).with_context(|| format!("{}: connect()", label)),
    };

    let mut buf = [0u8; 32];
    let count = stream
        .read(&mut buf)
        .with_context(|| format!("{}: read()", label))?;
    if count > 0 {
        return Err(anyhow!("{}: read(): got {} bytes of unexpected data", label, count));
    }

    debug!("{}: read(): got EOF", label);
    Ok(TerminateOutcome::Terminated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn unique_name() -> Vec<u8> {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        format!(
            "fbsplash-test-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        )
        .into_bytes()
    }

    #[test]
    fn it_should_treat_a_missing_server_as_success() -> Result<()> {
        let outcome = terminate_running_instance(&unique_name())?;
        assert_eq!(outcome, TerminateOutcome::NoInstance);
        Ok(())
    }

    #[test]
    fn it_should_hand_off_to_a_connecting_client() -> Result<()> {
        let name = unique_name();
        let mut monitor = EventMonitor::new()?;
        let control = LoopControl::running();
        let mut server = HandoffServer::bind(&name, &monitor, 5)?;

        let client_name = name.clone();
        let client = thread::spawn(move || terminate_running_instance(&client_name));

        let events = monitor.wait(Some(Duration::from_secs(5)))?;
        assert_eq!(events.len(), 1);
        server.handle_event(events[0], &monitor, &control);
        assert!(control.stop_requested());
        assert!(server.has_peer());

        // The client is still blocked in read() until our end goes away.
        server.close(&monitor);
        assert!(!server.is_listening());
        server.close_held_peers();

        let outcome = client.join().expect("client thread panicked")?;
        assert_eq!(outcome, TerminateOutcome::Terminated);
        Ok(())
    }

    #[test]
    fn it_should_free_the_address_when_closed() -> Result<()> {
        let name = unique_name();
        let monitor = EventMonitor::new()?;
        let mut first = HandoffServer::bind(&name, &monitor, 1)?;
        assert!(HandoffServer::bind(&name, &monitor, 2).is_err());
        first.close(&monitor);
        let mut second = HandoffServer::bind(&name, &monitor, 3)?;
        second.close(&monitor);
        Ok(())
    }
}
