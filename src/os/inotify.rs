// src/os/inotify.rs
//! Existence-change watch for a single path.
//!
//! inotify cannot watch a file that does not exist yet, so the watch sits on
//! the parent directory. When the parent is missing too (very early boot), a
//! watch on the grandparent notices it being created and the parent watch is
//! armed then. Events carry no meaning of their own here: any of them just
//! means "probe the path again".

use anyhow::{Context, Result};
use log::{debug, trace, warn};
use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
use nix::unistd::{access, AccessFlags};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::path::{Path, PathBuf};

fn parent_mask() -> AddWatchFlags {
    AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_DELETE
        | AddWatchFlags::IN_MOVED_FROM
        | AddWatchFlags::IN_MOVED_TO
        | AddWatchFlags::IN_DELETE_SELF
        | AddWatchFlags::IN_MOVE_SELF
}

fn ancestor_mask() -> AddWatchFlags {
    AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO
}

#[derive(Debug)]
pub struct PathWatch {
    inotify: Inotify,
    path: PathBuf,
    parent_wd: Option<WatchDescriptor>,
    ancestor_wd: Option<WatchDescriptor>,
}

impl PathWatch {
    pub fn new(path: &Path) -> Result<Self> {
        let inotify = Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK)
            .context("Failed to initialize inotify")?;
        let mut watch = Self {
            inotify,
            path: path.to_path_buf(),
            parent_wd: None,
            ancestor_wd: None,
        };
        watch.arm()?;
        Ok(watch)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the watched path currently exists.
    pub fn exists(&self) -> bool {
        access(self.path.as_path(), AccessFlags::F_OK).is_ok()
    }

    fn arm(&mut self) -> Result<()> {
        if self.parent_wd.is_some() {
            return Ok(());
        }
        let parent = self.path.parent().unwrap_or(Path::new("/"));
        match self.inotify.add_watch(parent, parent_mask()) {
            Ok(wd) => {
                debug!("{}: watching {}", self.path.display(), parent.display());
                self.parent_wd = Some(wd);
                if let Some(ancestor_wd) = self.ancestor_wd.take() {
                    // Already gone if the kernel sent IN_IGNORED; ignore that case.
                    let _ = self.inotify.rm_watch(ancestor_wd);
                }
                Ok(())
            }
            Err(Errno::ENOENT) if self.ancestor_wd.is_none() => {
                let ancestor = parent.parent().unwrap_or(Path::new("/"));
                let wd = self
                    .inotify
                    .add_watch(ancestor, ancestor_mask())
                    .with_context(|| format!("Failed to watch {}", ancestor.display()))?;
                debug!(
                    "{}: {} missing, watching {}",
                    self.path.display(),
                    parent.display(),
                    ancestor.display()
                );
                self.ancestor_wd = Some(wd);
                Ok(())
            }
            Err(Errno::ENOENT) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to watch {}", parent.display())),
        }
    }

    /// Consumes all queued notifications and re-arms the watch if the
    /// directory layout changed.
    pub fn drain(&mut self) {
        loop {
            match self.inotify.read_events() {
                Ok(events) if events.is_empty() => break,
                Ok(events) => {
                    for event in events {
                        trace!("{}: inotify {:?} {:?}", self.path.display(), event.mask, event.name);
                        if event.mask.contains(AddWatchFlags::IN_IGNORED) {
                            if self.parent_wd == Some(event.wd) {
                                self.parent_wd = None;
                            }
                            if self.ancestor_wd == Some(event.wd) {
                                self.ancestor_wd = None;
                            }
                        }
                    }
                }
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("{}: inotify read failed: {}", self.path.display(), e);
                    break;
                }
            }
        }
        if let Err(e) = self.arm() {
            warn!("{:#}", e);
        }
    }
}

impl AsRawFd for PathWatch {
    fn as_raw_fd(&self) -> RawFd {
        self.inotify.as_fd().as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::epoll::{EpollFlags, EventMonitor};
    use std::time::Duration;

    #[test]
    fn it_should_wake_when_the_path_appears_and_disappears() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bus_socket");
        let mut watch = PathWatch::new(&path)?;
        let mut monitor = EventMonitor::new()?;
        monitor.add(watch.as_raw_fd(), 9, EpollFlags::EPOLLIN)?;
        assert!(!watch.exists());

        std::fs::write(&path, b"")?;
        let events = monitor.wait(Some(Duration::from_secs(1)))?;
        assert_eq!(events.first().map(|e| e.token), Some(9));
        watch.drain();
        assert!(watch.exists());

        std::fs::remove_file(&path)?;
        assert!(!monitor.wait(Some(Duration::from_secs(1)))?.is_empty());
        watch.drain();
        assert!(!watch.exists());
        Ok(())
    }

    #[test]
    fn it_should_follow_a_parent_directory_created_later() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let parent = dir.path().join("dbus");
        let path = parent.join("system_bus_socket");
        let mut watch = PathWatch::new(&path)?;
        let mut monitor = EventMonitor::new()?;
        monitor.add(watch.as_raw_fd(), 1, EpollFlags::EPOLLIN)?;

        std::fs::create_dir(&parent)?;
        assert!(!monitor.wait(Some(Duration::from_secs(1)))?.is_empty());
        watch.drain();

        std::fs::write(&path, b"")?;
        assert!(!monitor.wait(Some(Duration::from_secs(1)))?.is_empty());
        watch.drain();
        assert!(watch.exists());
        Ok(())
    }
}
