// src/compositor/mod.rs
//! The compositor service name on the system bus.
//!
//! Owning the well-known name is how this process tells the display policy
//! manager that it currently holds the display. The manager answers by
//! calling `setUpdatesEnabled`, and a compositor that starts later takes the
//! name over, which is our cue to exit.
//!
//! Bus I/O happens behind [`ServiceBackend`]. Whatever the backend learns,
//! it posts as a [`BusEvent`] through an [`EventSink`]; the main loop drains
//! those on its own thread and feeds them to [`CompositorService::handle_event`].

pub mod zbus_backend;

#[cfg(test)]
pub(crate) mod fake;

use anyhow::Result;
use bitflags::bitflags;
use log::{debug, error, warn};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::control::LoopControl;
use crate::os::waker::EventLoopWaker;
use crate::timer::{TimerId, TimerQueue};
pub use zbus_backend::ZbusBackend;

pub const SERVICE_NAME: &str = "org.nemomobile.compositor";
pub const INTERFACE_NAME: &str = "org.nemomobile.compositor";
pub const OBJECT_PATH: &str = "/";

/// Coalesces bursts of bus socket notifications into one connect attempt.
pub const CONNECT_DELAY: Duration = Duration::from_millis(50);

bitflags! {
    /// Hardware compositor actions the policy manager should take before
    /// handing the display over.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetupActions: u32 {
        const STOP_HWC = 1 << 0;
        const START_HWC = 1 << 1;
        const RESTART_HWC = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEventKind {
    NameAcquired,
    /// `connection_lost` is set when the connection itself went away.
    NameLost {
        connection_lost: bool,
    },
    SetUpdatesEnabled(bool),
}

/// Something the backend observed on the connection `generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusEvent {
    pub generation: u64,
    pub kind: BusEventKind,
}

/// Posts [`BusEvent`]s from bus threads to the main loop and wakes it.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<BusEvent>,
    waker: Arc<dyn EventLoopWaker>,
}

impl EventSink {
    pub fn channel(waker: Arc<dyn EventLoopWaker>) -> (Self, Receiver<BusEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx, waker }, rx)
    }

    pub fn send(&self, event: BusEvent) {
        if self.tx.send(event).is_err() {
            debug!("Main loop gone, dropping {:?}", event);
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake main loop: {:#}", e);
        }
    }
}

/// Name ownership on some service bus.
pub trait ServiceBackend {
    /// Opens a connection. Events about it carry `generation`.
    fn connect(&mut self, generation: u64, sink: EventSink) -> Result<()>;

    /// Serves the compositor object on the open connection.
    fn register_object(&mut self) -> Result<()>;

    /// Asks for [`SERVICE_NAME`], allowing both taking it over from the
    /// current owner and being replaced later.
    fn request_name(&mut self) -> Result<()>;

    /// Gives up the name and closes the connection. No-op when not connected.
    fn disconnect(&mut self);
}

/// What the main loop should do in response to a bus event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorAction {
    SetUpdatesEnabled {
        enabled: bool,
        /// First permission to draw that came over the bus.
        first_grant: bool,
    },
}

#[derive(Debug, Default, Clone, Copy)]
struct Registration {
    name_acquired: bool,
}

pub struct CompositorService {
    backend: Box<dyn ServiceBackend>,
    sink: EventSink,
    control: LoopControl,
    registration: Option<Registration>,
    pending_connect: Option<TimerId>,
    generation: u64,
    granted_by_bus: bool,
}

impl CompositorService {
    pub fn new(backend: Box<dyn ServiceBackend>, sink: EventSink, control: LoopControl) -> Self {
        Self {
            backend,
            sink,
            control,
            registration: None,
            pending_connect: None,
            generation: 0,
            granted_by_bus: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.registration.is_some()
    }

    pub fn name_acquired(&self) -> bool {
        self.registration.is_some_and(|r| r.name_acquired)
    }

    pub fn has_pending_connect(&self) -> bool {
        self.pending_connect.is_some()
    }

    /// Arms the connect timer unless one is already pending.
    pub fn schedule_connect<K: Copy>(&mut self, timers: &mut TimerQueue<K>, kind: K) {
        if self.pending_connect.is_some() {
            return;
        }
        self.pending_connect = Some(timers.add_oneshot(CONNECT_DELAY, kind));
        debug!("Bus connect scheduled in {:?}", CONNECT_DELAY);
    }

    /// Runs the connect timer. Does nothing if the bus went away meanwhile or
    /// a connection already exists.
    pub fn connect_now(&mut self, bus_available: bool) {
        self.pending_connect = None;
        if !bus_available || self.is_connected() {
            return;
        }

        self.generation += 1;
        debug!("Bus connect (generation {})", self.generation);
        if let Err(e) = self.backend.connect(self.generation, self.sink.clone()) {
            error!("System bus connection failed: {:#}", e);
            self.control.request_stop("system bus connection failed");
            return;
        }
        self.registration = Some(Registration::default());

        if let Err(e) = self.backend.register_object() {
            error!("Compositor object registration failed: {:#}", e);
            self.control.request_stop("compositor object registration failed");
            return;
        }
        // Not owning the name is the same as still racing for it.
        if let Err(e) = self.backend.request_name() {
            warn!("Requesting {} failed: {:#}", SERVICE_NAME, e);
            debug!("Waiting for name {}...", SERVICE_NAME);
        }
    }

    pub fn handle_event(&mut self, event: BusEvent) -> Option<CompositorAction> {
        if event.generation != self.generation {
            debug!("Ignoring {:?} from a closed connection", event);
            return None;
        }
        let Some(registration) = self.registration.as_mut() else {
            debug!("Ignoring {:?} while disconnected", event);
            return None;
        };

        match event.kind {
            BusEventKind::NameAcquired => {
                debug!("Name acquired: {}", SERVICE_NAME);
                registration.name_acquired = true;
                None
            }
            BusEventKind::NameLost { connection_lost } => {
                if connection_lost {
                    error!("System bus connection failure");
                    self.control.request_stop("system bus connection lost");
                } else if registration.name_acquired {
                    debug!("Name lost: {}, service handover", SERVICE_NAME);
                    self.control.request_stop("compositor took over");
                } else {
                    debug!("Waiting for name {}...", SERVICE_NAME);
                }
                None
            }
            BusEventKind::SetUpdatesEnabled(enabled) => {
                debug!("Bus: enabled := {}", enabled);
                let first_grant = enabled && !self.granted_by_bus;
                if first_grant {
                    self.granted_by_bus = true;
                    debug!("Enabled by policy manager");
                }
                Some(CompositorAction::SetUpdatesEnabled {
                    enabled,
                    first_grant,
                })
            }
        }
    }

    /// Cancels a pending connect and drops the connection. Events still in
    /// flight for it are ignored afterwards.
    pub fn disconnect<K: Copy>(&mut self, timers: &mut TimerQueue<K>) {
        if let Some(id) = self.pending_connect.take() {
            timers.remove(id);
        }
        if self.registration.take().is_some() {
            debug!("Bus disconnect");
            self.backend.disconnect();
            self.generation += 1;
        }
    }
}
