// src/os/mod.rs
//
// Linux primitives the main loop multiplexes.

pub mod epoll;
pub mod handoff;
pub mod inotify;
pub mod signals;
pub mod waker;
