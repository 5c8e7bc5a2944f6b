// src/coordinator/mod.rs
//! Main loop: startup sequencing, event dispatch, and the way out.
//!
//! Everything runs on one thread. Handlers run to completion and report
//! trouble only through [`LoopControl::request_stop`]; the loop checks the
//! flag between handlers and, once set, falls through to [`Coordinator::cleanup`].

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use log::{debug, error, info, trace, warn};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bus_monitor::{BusAvailabilityMonitor, BusTransition, SYSTEM_BUS_SOCKET};
use crate::compositor::{
    BusEvent, CompositorAction, CompositorService, EventSink, ServiceBackend, ZbusBackend,
};
use crate::config::{Config, ImageList, PresentationMode};
use crate::control::LoopControl;
use crate::display::{DisplayController, FbdevSurface, Redraw, Surface};
use crate::os::epoll::{EpollEvent, EpollFlags, EventMonitor};
use crate::os::handoff::{self, HandoffServer, TerminateOutcome, DEFAULT_HANDOFF_NAME};
use crate::os::signals::SignalBridge;
use crate::os::waker::EventFdWaker;
use crate::presentation::Presentation;
use crate::supervisor::ReadinessNotifier;
use crate::timer::{TimerId, TimerQueue};

const TOKEN_SIGNAL: u64 = 1;
const TOKEN_HANDOFF: u64 = 2;
const TOKEN_BUS_WATCH: u64 = 3;
const TOKEN_BUS_EVENTS: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Continues startup from inside the loop.
    Startup,
    BusConnect,
    PresentationTick,
    AutoStop,
}

/// The outside world the coordinator talks to.
pub struct Environment {
    pub surface: Box<dyn Surface>,
    pub backend: Box<dyn ServiceBackend>,
    pub notifier: ReadinessNotifier,
    pub handoff_name: Vec<u8>,
    pub bus_socket: PathBuf,
}

impl Environment {
    /// Framebuffer, system bus, and the service manager's notify socket.
    pub fn system(config: &Config) -> Self {
        Self {
            surface: Box::new(FbdevSurface::new()),
            backend: Box::new(ZbusBackend::new()),
            notifier: ReadinessNotifier::new(config.notify_ready),
            handoff_name: DEFAULT_HANDOFF_NAME.to_vec(),
            bus_socket: PathBuf::from(SYSTEM_BUS_SOCKET),
        }
    }
}

pub struct Coordinator {
    monitor: EventMonitor,
    timers: TimerQueue<TimerKind>,
    control: LoopControl,
    config: Config,
    images: ImageList,

    signals: Option<SignalBridge>,
    handoff_name: Vec<u8>,
    handoff: Option<HandoffServer>,
    bus_socket: PathBuf,
    bus: Option<BusAvailabilityMonitor>,
    compositor: CompositorService,
    bus_events: Receiver<BusEvent>,
    bus_waker: Arc<EventFdWaker>,

    display: DisplayController,
    presentation: Option<Presentation>,
    presentation_timer: Option<TimerId>,
    notifier: ReadinessNotifier,
}

impl Coordinator {
    pub fn new(config: Config, images: ImageList, env: Environment) -> Result<Self> {
        let monitor = EventMonitor::new().context("Failed to create event monitor")?;
        let bus_waker = Arc::new(EventFdWaker::new()?);
        monitor
            .add(bus_waker.as_raw_fd(), TOKEN_BUS_EVENTS, EpollFlags::EPOLLIN)
            .context("Failed to watch bus waker")?;
        let (sink, bus_events) = EventSink::channel(bus_waker.clone());

        let control = LoopControl::new();
        let compositor = CompositorService::new(env.backend, sink, control.clone());
        let display = DisplayController::new(env.surface, control.clone());

        Ok(Self {
            monitor,
            timers: TimerQueue::new(),
            control,
            config,
            images,
            signals: None,
            handoff_name: env.handoff_name,
            handoff: None,
            bus_socket: env.bus_socket,
            bus: None,
            compositor,
            bus_events,
            bus_waker,
            display,
            presentation: None,
            presentation_timer: None,
            notifier: env.notifier,
        })
    }

    pub fn control(&self) -> &LoopControl {
        &self.control
    }

    /// Sets up, runs the loop until a stop is requested, and cleans up.
    /// Cleanup runs on every path, setup failures included.
    pub fn run(&mut self) {
        match self.setup() {
            Ok(()) => {
                self.control.mark_running();
                info!("Entering main loop");
                while !self.control.stop_requested() {
                    if let Err(e) = self.process_event_cycle() {
                        error!("Main loop failure: {:#}", e);
                        self.control.request_stop("main loop failure");
                    }
                }
                info!("Main loop done");
            }
            Err(e) => error!("Startup failed: {:#}", e),
        }
        self.cleanup();
    }

    fn setup(&mut self) -> Result<()> {
        let mut bus = BusAvailabilityMonitor::start(&self.bus_socket, &self.monitor, TOKEN_BUS_WATCH)
            .with_context(|| format!("Failed to watch {}", self.bus_socket.display()))?;
        let transition = bus.probe();
        self.bus = Some(bus);
        self.on_bus_transition(transition);

        match handoff::terminate_running_instance(&self.handoff_name) {
            Ok(TerminateOutcome::NoInstance) => debug!("No previous instance running"),
            Ok(TerminateOutcome::Terminated) => info!("Previous instance terminated"),
            Err(e) => warn!("Could not terminate previous instance: {:#}", e),
        }

        self.signals = Some(SignalBridge::install(&self.monitor, TOKEN_SIGNAL)?);
        self.timers.add_oneshot(Duration::ZERO, TimerKind::Startup);
        Ok(())
    }

    /// Waits for one batch of descriptor events, then runs the timers due.
    pub fn process_event_cycle(&mut self) -> Result<()> {
        let timeout = self.timers.next_timeout(Instant::now());
        let events = self.monitor.wait(timeout)?;
        for event in events {
            if self.control.stop_requested() {
                return Ok(());
            }
            self.dispatch_event(event);
        }

        let now = Instant::now();
        while !self.control.stop_requested() {
            let Some((id, kind)) = self.timers.expire(now) else {
                break;
            };
            self.dispatch_timer(id, kind);
        }
        Ok(())
    }

    fn dispatch_event(&mut self, event: EpollEvent) {
        trace!("Event {:?}", event);
        match event.token {
            TOKEN_SIGNAL => {
                if let Some(signals) = self.signals.as_mut() {
                    signals.handle_event(&self.monitor, &self.control);
                }
            }
            TOKEN_HANDOFF => {
                if let Some(server) = self.handoff.as_mut() {
                    server.handle_event(event, &self.monitor, &self.control);
                }
            }
            TOKEN_BUS_WATCH => {
                let transition = match self.bus.as_mut() {
                    Some(bus) => bus.handle_event(),
                    None => BusTransition::Unchanged,
                };
                self.on_bus_transition(transition);
            }
            TOKEN_BUS_EVENTS => {
                self.bus_waker.drain();
                while let Ok(bus_event) = self.bus_events.try_recv() {
                    if self.control.stop_requested() {
                        break;
                    }
                    if let Some(action) = self.compositor.handle_event(bus_event) {
                        self.apply(action);
                    }
                }
            }
            other => warn!("Event for unknown token {}", other),
        }
    }

    fn dispatch_timer(&mut self, id: TimerId, kind: TimerKind) {
        trace!("Timer {:?} {:?}", id, kind);
        match kind {
            TimerKind::Startup => self.startup(),
            TimerKind::BusConnect => {
                let available = self.bus.as_ref().is_some_and(|bus| bus.is_available());
                self.compositor.connect_now(available);
            }
            TimerKind::PresentationTick => {
                let running = match self.presentation.as_mut() {
                    Some(presentation) => presentation.tick(&mut self.display),
                    None => false,
                };
                if !running {
                    self.timers.remove(id);
                    self.presentation_timer = None;
                }
            }
            TimerKind::AutoStop => self.control.request_stop("stop timer expired"),
        }
    }

    fn on_bus_transition(&mut self, transition: BusTransition) {
        match transition {
            BusTransition::Unchanged => {}
            BusTransition::Appeared => self
                .compositor
                .schedule_connect(&mut self.timers, TimerKind::BusConnect),
            BusTransition::Vanished => self.control.request_stop("system bus went away"),
        }
    }

    fn apply(&mut self, action: CompositorAction) {
        match action {
            CompositorAction::SetUpdatesEnabled {
                enabled,
                first_grant,
            } => {
                let redraw = self
                    .presentation
                    .as_mut()
                    .map(|presentation| presentation as &mut dyn Redraw);
                self.display.set_updates_enabled(enabled, redraw);
                if first_grant {
                    self.notifier.notify();
                }
            }
        }
    }

    /// Runs from the first loop iteration.
    fn startup(&mut self) {
        let bus_available = self.bus.as_ref().is_some_and(|bus| bus.is_available());
        if !bus_available {
            // Nobody can reach us over the bus yet: take requests from newer
            // instances locally, and draw without waiting for permission.
            match HandoffServer::bind(&self.handoff_name, &self.monitor, TOKEN_HANDOFF) {
                Ok(server) => self.handoff = Some(server),
                Err(e) => {
                    error!("Handoff socket setup failed: {:#}", e);
                    self.control.request_stop("handoff socket setup failed");
                    return;
                }
            }
            self.display.set_updates_enabled(true, None);
        }

        let mode = match PresentationMode::select(&self.config, &self.images) {
            Ok(mode) => mode,
            Err(e) => {
                error!("{}", e);
                self.control.request_stop("invalid presentation mode");
                return;
            }
        };
        info!("Presentation: {:?}", mode);

        let mut presentation =
            Presentation::new(mode, self.config.text.clone(), self.control.clone());
        let period = presentation.start(&mut self.display);
        self.presentation = Some(presentation);
        if self.control.stop_requested() {
            return;
        }
        if let Some(period) = period {
            self.presentation_timer =
                Some(self.timers.add_repeating(period, TimerKind::PresentationTick));
        }

        if let Some(stop_after) = self.config.stop_after() {
            debug!("Stopping in {:?}", stop_after);
            self.timers.add_oneshot(stop_after, TimerKind::AutoStop);
        }
    }

    fn cleanup(&mut self) {
        debug!("cleanup");
        // A supervisor waiting for us must not be left hanging.
        self.notifier.notify();

        if let Some(signals) = self.signals.as_mut() {
            signals.quit(&self.monitor);
        }
        // Frees the address for the next instance right away.
        if let Some(server) = self.handoff.as_mut() {
            server.close(&self.monitor);
        }

        // The rest can be skipped to leave the last frame on screen until
        // the compositor takes over.
        if self.config.skip_cleanup {
            debug!("Skipping display cleanup");
            return;
        }
        if let Some(id) = self.presentation_timer.take() {
            self.timers.remove(id);
        }
        self.display.release();
        self.presentation = None;
        self.images.clear();
        if let Some(bus) = self.bus.as_mut() {
            bus.quit(&self.monitor);
        }
        self.compositor.disconnect(&mut self.timers);
        debug!("exit");
    }
}
