//! Endpoint records held in the supervisor's registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use log::debug;
use parking_lot::Mutex;

use crate::config::{EndpointConfig, EndpointId, SensorClass, TransportSelection};
use crate::link::session::SessionCounters;
use crate::link::LinkSession;

/// Connection state of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Discovering,
    Connected,
    Disconnected,
    /// Reconnect ceiling reached; skipped until explicitly reset.
    Disabled,
}

/// Mutable per-endpoint status, guarded by the session lock.
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    pub state: LinkState,
    /// Consecutive failed watchdog reconnects.
    pub failures: u32,
    pub selection: TransportSelection,
    pub firmware: Option<String>,
    pub transport_label: Option<String>,
    /// Serial device currently held by this endpoint.
    pub serial_path: Option<String>,
}

/// Immutable copy of an endpoint handed to callers.
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub id: EndpointId,
    pub class: SensorClass,
    pub state: LinkState,
    pub failures: u32,
    pub running: bool,
    pub firmware: Option<String>,
    pub transport: Option<String>,
    pub counters: SessionCounters,
}

/// One registry entry.  Created once from config, never destroyed.
pub struct EndpointRecord {
    pub id: EndpointId,
    pub class: SensorClass,
    pub read_temperature: bool,
    pub(crate) session: LinkSession<EndpointStatus>,
    running: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
    /// Held for the whole of a connect attempt.
    pub(crate) connect_gate: Mutex<()>,
}

impl EndpointRecord {
    pub fn new(config: &EndpointConfig) -> Self {
        Self {
            id: config.id,
            class: config.class,
            read_temperature: config.read_temperature,
            session: LinkSession::new(EndpointStatus {
                state: LinkState::Discovering,
                failures: 0,
                selection: config.transport.clone(),
                firmware: config.firmware_version.clone(),
                transport_label: None,
                serial_path: None,
            }),
            running: AtomicBool::new(false),
            poller: Mutex::new(None),
            connect_gate: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn state(&self) -> LinkState {
        self.session.with_status(|s| s.state)
    }

    pub fn snapshot(&self) -> EndpointSnapshot {
        let status = self.session.status();
        EndpointSnapshot {
            id: self.id,
            class: self.class,
            state: status.state,
            failures: status.failures,
            running: self.is_running(),
            firmware: status.firmware,
            transport: status.transport_label,
            counters: self.session.counters(),
        }
    }

    pub(crate) fn set_poller(&self, handle: JoinHandle<()>) {
        *self.poller.lock() = Some(handle);
    }

    /// Signal the poller to stop and wait for it to exit, then drop the
    /// transport.  Safe to call from the poller thread itself.
    pub(crate) fn stop(&self) {
        self.set_running(false);
        let handle = self.poller.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!("Endpoint {}: stop requested from its own poller", self.id);
            } else if handle.join().is_err() {
                debug!("Endpoint {}: poller panicked", self.id);
            }
        }
        drop(self.session.detach(|s| {
            s.transport_label = None;
            s.serial_path = None;
        }));
    }

    /// Called by the poller when the transport fails.  Returns `true` if
    /// this moved the endpoint out of `Connected`.
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.set_running(false);
        let mut transitioned = false;
        drop(self.session.detach(|s| {
            if s.state == LinkState::Connected {
                s.state = LinkState::Disconnected;
                transitioned = true;
            }
            s.transport_label = None;
            s.serial_path = None;
        }));
        transitioned
    }
}
