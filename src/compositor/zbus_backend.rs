// src/compositor/zbus_backend.rs
//! [`ServiceBackend`] over the system D-Bus, using zbus' blocking API.
//!
//! zbus dispatches method calls and signals on its own threads. None of
//! those threads touch loop state: they only post [`BusEvent`]s.

use anyhow::{bail, Context, Result};
use log::{debug, error, warn};
use std::sync::mpsc;
use std::thread;
use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::Connection;
use zbus::fdo::RequestNameFlags;
use zbus::{interface, SignalContext};

use super::{
    BusEvent, BusEventKind, EventSink, ServiceBackend, SetupActions, OBJECT_PATH, SERVICE_NAME,
};

/// The object served at [`OBJECT_PATH`].
///
/// Only the methods and signals below are declared, and there are no
/// properties. Any other method call or property access is answered by
/// zbus with `org.freedesktop.DBus.Error.UnknownMethod` (or
/// `UnknownProperty`) rather than a dedicated "not supported" error.
pub struct CompositorObject {
    sink: EventSink,
    generation: u64,
}

#[interface(name = "org.nemomobile.compositor")]
impl CompositorObject {
    #[zbus(name = "setUpdatesEnabled")]
    fn set_updates_enabled(&self, enabled: bool) {
        debug!("setUpdatesEnabled({})", enabled);
        self.sink.send(BusEvent {
            generation: self.generation,
            kind: BusEventKind::SetUpdatesEnabled(enabled),
        });
    }

    #[zbus(name = "privateTopmostWindowProcessId")]
    fn topmost_window_process_id(&self) -> i32 {
        let pid = std::process::id() as i32;
        debug!("pid == {}", pid);
        pid
    }

    #[zbus(name = "privateGetSetupActions")]
    fn setup_actions(&self) -> u32 {
        let flags = SetupActions::STOP_HWC;
        debug!("setup actions == {:?}", flags);
        flags.bits()
    }

    #[zbus(name = "privateTopmostWindowPolicyApplicationId")]
    fn topmost_window_policy_application_id(&self) -> String {
        String::new()
    }

    #[zbus(signal, name = "privateTopmostWindowProcessIdChanged")]
    pub async fn topmost_window_process_id_changed(
        ctxt: &SignalContext<'_>,
        pid: i32,
    ) -> zbus::Result<()>;

    #[zbus(signal, name = "privateTopmostWindowPolicyApplicationIdChanged")]
    pub async fn topmost_window_policy_application_id_changed(
        ctxt: &SignalContext<'_>,
        id: &str,
    ) -> zbus::Result<()>;
}

#[derive(Default)]
pub struct ZbusBackend {
    connection: Option<Connection>,
    sink: Option<EventSink>,
    generation: u64,
}

impl ZbusBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().context("Not connected to the system bus")
    }

    /// Forwards NameAcquired/NameLost for our name. Returns once the match
    /// rules are in place, so no signal about a later RequestName is missed.
    fn watch_name(&self, connection: &Connection, sink: &EventSink) -> Result<()> {
        let generation = self.generation;

        let (ready_tx, ready_rx) = mpsc::channel();
        let conn = connection.clone();
        let events = sink.clone();
        thread::Builder::new()
            .name("bus-name-acquired".into())
            .spawn(move || {
                let Some(proxy) = subscribed(&ready_tx, DBusProxy::new(&conn), false) else {
                    return;
                };
                let Some(signals) = subscribed(&ready_tx, proxy.receive_name_acquired(), true) else {
                    return;
                };
                for signal in signals {
                    match signal.args() {
                        Ok(args) if args.name().as_str() == SERVICE_NAME => {
                            events.send(BusEvent {
                                generation,
                                kind: BusEventKind::NameAcquired,
                            });
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Malformed NameAcquired: {}", e),
                    }
                }
            })
            .context("Failed to spawn name watcher")?;
        ready_rx
            .recv()
            .context("Name watcher exited early")?
            .context("Failed to subscribe to NameAcquired")?;

        let (ready_tx, ready_rx) = mpsc::channel();
        let conn = connection.clone();
        let events = sink.clone();
        thread::Builder::new()
            .name("bus-name-lost".into())
            .spawn(move || {
                let Some(proxy) = subscribed(&ready_tx, DBusProxy::new(&conn), false) else {
                    return;
                };
                let Some(signals) = subscribed(&ready_tx, proxy.receive_name_lost(), true) else {
                    return;
                };
                for signal in signals {
                    match signal.args() {
                        Ok(args) if args.name().as_str() == SERVICE_NAME => {
                            events.send(BusEvent {
                                generation,
                                kind: BusEventKind::NameLost {
                                    connection_lost: false,
                                },
                            });
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Malformed NameLost: {}", e),
                    }
                }
                // The stream only ends when the connection is gone.
                events.send(BusEvent {
                    generation,
                    kind: BusEventKind::NameLost {
                        connection_lost: true,
                    },
                });
            })
            .context("Failed to spawn name watcher")?;
        ready_rx
            .recv()
            .context("Name watcher exited early")?
            .context("Failed to subscribe to NameLost")?;
        Ok(())
    }
}

/// Reports a failed setup step, or success of the last one, to the thread
/// waiting in [`ZbusBackend::watch_name`].
fn subscribed<T>(
    ready: &mpsc::Sender<zbus::Result<()>>,
    result: zbus::Result<T>,
    last: bool,
) -> Option<T> {
    match result {
        Ok(value) => {
            if last {
                let _ = ready.send(Ok(()));
            }
            Some(value)
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            None
        }
    }
}

impl ServiceBackend for ZbusBackend {
    fn connect(&mut self, generation: u64, sink: EventSink) -> Result<()> {
        self.disconnect();
        let connection = Connection::system().context("Failed to connect to the system bus")?;
        self.generation = generation;
        self.watch_name(&connection, &sink)?;
        self.connection = Some(connection);
        self.sink = Some(sink);
        Ok(())
    }

    fn register_object(&mut self) -> Result<()> {
        let sink = self.sink.clone().context("Not connected to the system bus")?;
        let object = CompositorObject {
            sink,
            generation: self.generation,
        };
        let registered = self
            .connection()?
            .object_server()
            .at(OBJECT_PATH, object)
            .context("Failed to register compositor object")?;
        if !registered {
            bail!("An object is already registered at {}", OBJECT_PATH);
        }
        Ok(())
    }

    fn request_name(&mut self) -> Result<()> {
        let flags = RequestNameFlags::ReplaceExisting | RequestNameFlags::AllowReplacement;
        let reply = self
            .connection()?
            .request_name_with_flags(SERVICE_NAME, flags)
            .with_context(|| format!("RequestName({}) failed", SERVICE_NAME))?;
        debug!("RequestName({}): {:?}", SERVICE_NAME, reply);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.sink = None;
        let Some(connection) = self.connection.take() else {
            return;
        };
        if let Err(e) = connection.release_name(SERVICE_NAME) {
            debug!("ReleaseName({}) failed: {}", SERVICE_NAME, e);
        }
        if let Err(e) = connection.close() {
            error!("Failed to close the system bus connection: {}", e);
        }
    }
}
