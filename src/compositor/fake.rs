// src/compositor/fake.rs
//! In-process [`ServiceBackend`] for tests.

use anyhow::{bail, Result};
use std::cell::RefCell;
use std::rc::Rc;

use super::{BusEvent, BusEventKind, EventSink, ServiceBackend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(u64),
    RegisterObject,
    RequestName,
    Disconnect,
}

#[derive(Default)]
struct Shared {
    calls: Vec<Call>,
    sink: Option<(u64, EventSink)>,
}

/// Records calls. Clones share state, so a test keeps one handle after
/// boxing another into the service.
#[derive(Clone, Default)]
pub struct FakeBackend {
    shared: Rc<RefCell<Shared>>,
    fail_connect: bool,
    fail_register: bool,
    fail_request: bool,
    auto_grant: bool,
}

impl FakeBackend {
    pub fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub fn failing_register() -> Self {
        Self {
            fail_register: true,
            ..Self::default()
        }
    }

    pub fn failing_request_name() -> Self {
        Self {
            fail_request: true,
            ..Self::default()
        }
    }

    /// Acquires the name and grants drawing as soon as the name is
    /// requested, like a policy manager that is already running.
    pub fn granting() -> Self {
        Self {
            auto_grant: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.borrow().calls.clone()
    }

    /// Posts `kind` on the current connection.
    pub fn post(&self, kind: BusEventKind) {
        if let Some((generation, sink)) = self.shared.borrow().sink.as_ref() {
            sink.send(BusEvent {
                generation: *generation,
                kind,
            });
        }
    }

    fn record(&self, call: Call) {
        self.shared.borrow_mut().calls.push(call);
    }
}

impl ServiceBackend for FakeBackend {
    fn connect(&mut self, generation: u64, sink: EventSink) -> Result<()> {
        self.record(Call::Connect(generation));
        if self.fail_connect {
            bail!("no bus");
        }
        self.shared.borrow_mut().sink = Some((generation, sink));
        Ok(())
    }

    fn register_object(&mut self) -> Result<()> {
        self.record(Call::RegisterObject);
        if self.fail_register {
            bail!("path taken");
        }
        Ok(())
    }

    fn request_name(&mut self) -> Result<()> {
        self.record(Call::RequestName);
        if self.fail_request {
            bail!("org.freedesktop.DBus.Error.AccessDenied");
        }
        if self.auto_grant {
            self.post(BusEventKind::NameAcquired);
            self.post(BusEventKind::SetUpdatesEnabled(true));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.record(Call::Disconnect);
        self.shared.borrow_mut().sink = None;
    }
}
