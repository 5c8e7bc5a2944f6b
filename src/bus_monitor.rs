// src/bus_monitor.rs
//! System bus availability, judged by its socket file.

use anyhow::Result;
use log::{debug, warn};
use std::os::fd::AsRawFd;
use std::path::Path;

use crate::os::epoll::{EpollFlags, EventMonitor};
use crate::os::inotify::PathWatch;

pub const SYSTEM_BUS_SOCKET: &str = "/run/dbus/system_bus_socket";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusTransition {
    Unchanged,
    Appeared,
    Vanished,
}

/// Edge-triggered view of the bus socket: each change is reported once.
#[derive(Debug)]
pub struct BusAvailabilityMonitor {
    watch: Option<PathWatch>,
    exists: bool,
}

impl BusAvailabilityMonitor {
    /// Starts watching `path` under `token`. The socket counts as absent
    /// until the first [`probe`](Self::probe).
    pub fn start(path: &Path, monitor: &EventMonitor, token: u64) -> Result<Self> {
        let watch = PathWatch::new(path)?;
        monitor.add(watch.as_raw_fd(), token, EpollFlags::EPOLLIN)?;
        Ok(Self {
            watch: Some(watch),
            exists: false,
        })
    }

    pub fn is_available(&self) -> bool {
        self.exists
    }

    /// Checks the socket against the last known state.
    pub fn probe(&mut self) -> BusTransition {
        let Some(watch) = self.watch.as_ref() else {
            return BusTransition::Unchanged;
        };
        let exists = watch.exists();
        if exists == self.exists {
            return BusTransition::Unchanged;
        }
        debug!(
            "{} exists: {} -> {}",
            watch.path().display(),
            self.exists,
            exists
        );
        self.exists = exists;
        if exists {
            BusTransition::Appeared
        } else {
            BusTransition::Vanished
        }
    }

    /// Drains the watch after it polled readable, then probes.
    pub fn handle_event(&mut self) -> BusTransition {
        if let Some(watch) = self.watch.as_mut() {
            watch.drain();
        }
        self.probe()
    }

    pub fn quit(&mut self, monitor: &EventMonitor) {
        if let Some(watch) = self.watch.take() {
            if let Err(e) = monitor.delete(watch.as_raw_fd()) {
                warn!("Failed to unwatch {}: {:#}", watch.path().display(), e);
            }
            debug!("Stopped watching {}", watch.path().display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test_log::test]
    fn it_should_report_each_change_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("system_bus_socket");
        let mut monitor = EventMonitor::new()?;
        let mut bus = BusAvailabilityMonitor::start(&path, &monitor, 4)?;

        assert_eq!(bus.probe(), BusTransition::Unchanged);
        assert!(!bus.is_available());

        fs::write(&path, b"")?;
        assert!(!monitor.wait(Some(Duration::from_secs(1)))?.is_empty());
        assert_eq!(bus.handle_event(), BusTransition::Appeared);
        assert_eq!(bus.probe(), BusTransition::Unchanged);
        assert!(bus.is_available());

        fs::remove_file(&path)?;
        assert!(!monitor.wait(Some(Duration::from_secs(1)))?.is_empty());
        assert_eq!(bus.handle_event(), BusTransition::Vanished);
        Ok(())
    }

    #[test]
    fn it_should_see_a_socket_that_existed_before_start() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("system_bus_socket");
        fs::write(&path, b"")?;
        let monitor = EventMonitor::new()?;
        let mut bus = BusAvailabilityMonitor::start(&path, &monitor, 4)?;
        assert_eq!(bus.probe(), BusTransition::Appeared);

        bus.quit(&monitor);
        fs::remove_file(&path)?;
        assert_eq!(bus.probe(), BusTransition::Unchanged);
        Ok(())
    }
}
