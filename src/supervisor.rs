// src/supervisor.rs
//! Readiness notification to the service manager (`sd_notify` protocol).

use log::{debug, warn};
use sd_notify::NotifyState;
use std::env;

/// Sends `READY=1` to `$NOTIFY_SOCKET` at most once.
#[derive(Debug)]
pub struct ReadinessNotifier {
    pending: bool,
}

impl ReadinessNotifier {
    /// A disabled notifier never sends anything.
    pub fn new(enabled: bool) -> Self {
        Self { pending: enabled }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn notify(&mut self) {
        if !self.pending {
            return;
        }
        self.pending = false;
        if env::var_os("NOTIFY_SOCKET").is_none() {
            warn!("NOTIFY_SOCKET not set, readiness not reported");
            return;
        }
        debug!("Notifying service manager: ready");
        if let Err(e) = sd_notify::notify(false, &[NotifyState::Ready]) {
            warn!("Readiness notification failed: {}", e);
        }
    }
}

/// Serializes tests that point `$NOTIFY_SOCKET` somewhere.
#[cfg(test)]
pub(crate) fn notify_socket_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::Mutex;
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixDatagram};
    use std::time::Duration;

    fn received(server: &UnixDatagram) -> Result<String> {
        let mut buf = [0u8; 64];
        let len = server.recv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf[..len]).trim_end().to_string())
    }

    #[test]
    fn it_should_send_ready_exactly_once() -> Result<()> {
        let _guard = notify_socket_lock();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("notify");
        let server = UnixDatagram::bind(&path)?;
        server.set_read_timeout(Some(Duration::from_secs(1)))?;
        env::set_var("NOTIFY_SOCKET", &path);

        let mut notifier = ReadinessNotifier::new(true);
        notifier.notify();
        notifier.notify();
        env::remove_var("NOTIFY_SOCKET");
        assert!(!notifier.is_pending());

        assert_eq!(received(&server)?, "READY=1");
        server.set_nonblocking(true)?;
        let mut buf = [0u8; 64];
        assert!(server.recv(&mut buf).is_err());
        Ok(())
    }

    #[test]
    fn it_should_reach_abstract_sockets() -> Result<()> {
        let _guard = notify_socket_lock();
        let name = format!("fbsplash-notify-test-{}", std::process::id());
        let server = UnixDatagram::bind_addr(&SocketAddr::from_abstract_name(name.as_bytes())?)?;
        server.set_read_timeout(Some(Duration::from_secs(1)))?;
        env::set_var("NOTIFY_SOCKET", format!("@{}", name));

        ReadinessNotifier::new(true).notify();
        env::remove_var("NOTIFY_SOCKET");

        assert_eq!(received(&server)?, "READY=1");
        Ok(())
    }

    #[test]
    fn it_should_stay_silent_when_disabled() -> Result<()> {
        let _guard = notify_socket_lock();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("notify");
        let server = UnixDatagram::bind(&path)?;
        server.set_nonblocking(true)?;
        env::set_var("NOTIFY_SOCKET", &path);

        let mut notifier = ReadinessNotifier::new(false);
        notifier.notify();
        env::remove_var("NOTIFY_SOCKET");

        assert!(!notifier.is_pending());
        let mut buf = [0u8; 64];
        assert!(server.recv(&mut buf).is_err());
        Ok(())
    }
}
