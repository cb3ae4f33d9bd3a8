//! Connection supervisor: endpoint registry, discovery and watchdog.
//!
//! ```text
//!   Discovering ──ok──▶ Connected ──transport error──▶ Disconnected
//!        ▲                                                 │
//!        └──────────── watchdog (every 5 s) ───────────────┘
//!                            │ failures == ceiling
//!                            ▼
//!                        Disabled ──reset / settings save──▶ Discovering
//! ```
//!
//! The registry is fixed at construction; each record's mutable state sits
//! behind its session lock.  Callers get [`EndpointSnapshot`] copies.
//! Before a reconnect the previous poller is signalled and joined, so an
//! endpoint never has two pollers.

pub mod discovery;
pub mod endpoint;
pub mod poller;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::codec::{self, Command, Quantity, RemoteUpdateStatus, TdsCalibration};
use crate::config::{EndpointId, LinkConfig, SystemConfig, TransportSelection};
use crate::error::{Error, ProtocolError, SupervisorError};
use crate::events::{CoreMsg, CoreSender};
use crate::link::Exchange;

use discovery::{Candidate, Connector};
pub use endpoint::{EndpointRecord, EndpointSnapshot, EndpointStatus, LinkState};

/// Timing knobs taken from [`SystemConfig`].
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub watchdog_interval: Duration,
    pub reconnect_ceiling: u32,
    pub link: LinkConfig,
}

impl SupervisorSettings {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.timing.poll_interval_ms),
            watchdog_interval: Duration::from_millis(config.timing.watchdog_interval_ms),
            reconnect_ceiling: config.timing.reconnect_ceiling,
            link: config.link.clone(),
        }
    }
}

/// Firmware identity strings of a connected endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointInfo {
    pub firmware: Option<String>,
    pub model: Option<String>,
    pub variant: Option<String>,
}

pub struct Supervisor {
    records: Vec<Arc<EndpointRecord>>,
    connector: Arc<dyn Connector>,
    queue: CoreSender,
    settings: SupervisorSettings,
}

impl Supervisor {
    pub fn new(config: &SystemConfig, connector: Arc<dyn Connector>, queue: CoreSender) -> Self {
        let records = config
            .endpoints
            .iter()
            .map(|ep| Arc::new(EndpointRecord::new(ep)))
            .collect();
        Self {
            records,
            connector,
            queue,
            settings: SupervisorSettings::from_config(config),
        }
    }

    // ── Registry accessors ────────────────────────────────────

    fn record(&self, id: EndpointId) -> Result<&Arc<EndpointRecord>, SupervisorError> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .ok_or(SupervisorError::UnknownEndpoint(id.letter()))
    }

    pub fn snapshot(&self, id: EndpointId) -> Option<EndpointSnapshot> {
        self.record(id).ok().map(|r| r.snapshot())
    }

    pub fn snapshots(&self) -> Vec<EndpointSnapshot> {
        self.records.iter().map(|r| r.snapshot()).collect()
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    fn claimed_serial_paths(&self, except: EndpointId) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.id != except)
            .filter_map(|r| r.session.with_status(|s| s.serial_path.clone()))
            .collect()
    }

    // ── Discovery ─────────────────────────────────────────────

    /// Initial discovery: network endpoints first, then one shared serial
    /// scan for everything still missing.
    pub fn start(&self) {
        info!("Supervisor: discovering {} endpoints", self.records.len());
        for record in &self.records {
            let selection = record.session.with_status(|s| s.selection.clone());
            if let TransportSelection::Network { host, port } = selection {
                let _gate = record.connect_gate.lock();
                match discovery::try_network(&*self.connector, record.id, record.class, &host, port) {
                    Ok(candidate) => self.install(record, candidate),
                    Err(e) => info!("Supervisor: {} not at {}:{} ({})", record.id, host, port, e),
                }
            }
        }

        let missing: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.state() != LinkState::Connected)
            .map(|r| (r.id, r.class))
            .collect();
        if !missing.is_empty() {
            let claimed: Vec<String> = self
                .records
                .iter()
                .filter_map(|r| r.session.with_status(|s| s.serial_path.clone()))
                .collect();
            for (id, candidate) in discovery::scan_serial(&*self.connector, &missing, &claimed) {
                if let Ok(record) = self.record(id) {
                    let _gate = record.connect_gate.lock();
                    self.install(record, candidate);
                }
            }
        }

        for record in &self.records {
            let moved = record.session.with_status(|s| {
                if s.state == LinkState::Discovering {
                    s.state = LinkState::Disconnected;
                    true
                } else {
                    false
                }
            });
            if moved {
                warn!("Supervisor: {} not found at startup", record.id);
                self.queue.send(CoreMsg::Disconnected { endpoint: record.id });
            }
        }
    }

    /// One discovery attempt for an endpoint.  The caller holds its gate.
    fn attempt(&self, record: &Arc<EndpointRecord>) -> Result<(), Error> {
        record.stop();
        let selection = record.session.with_status(|s| {
            s.state = LinkState::Discovering;
            s.selection.clone()
        });

        let mut result = Err(SupervisorError::NotFound(record.id.letter()).into());
        if let TransportSelection::Network { host, port } = &selection {
            result = discovery::try_network(&*self.connector, record.id, record.class, host, *port);
            if let Err(e) = &result {
                info!("Supervisor: {} not at {}:{} ({})", record.id, host, port, e);
            }
        }
        if result.is_err() {
            let claimed = self.claimed_serial_paths(record.id);
            result = discovery::scan_serial(&*self.connector, &[(record.id, record.class)], &claimed)
                .into_iter()
                .next()
                .map(|(_, candidate)| candidate)
                .ok_or_else(|| SupervisorError::NotFound(record.id.letter()).into());
        }

        match result {
            Ok(candidate) => {
                self.install(record, candidate);
                Ok(())
            }
            Err(e) => {
                record.session.with_status(|s| {
                    if s.state == LinkState::Discovering {
                        s.state = LinkState::Disconnected;
                    }
                });
                Err(e)
            }
        }
    }

    /// Attach an accepted transport and start the endpoint's poller.
    fn install(&self, record: &Arc<EndpointRecord>, candidate: Candidate) {
        let Candidate {
            transport,
            firmware,
        } = candidate;
        let label = transport.label();
        let reported = firmware.clone();
        record.session.attach(transport, |s, t| {
            s.state = LinkState::Connected;
            s.failures = 0;
            if firmware.is_some() {
                s.firmware = firmware;
            }
            s.transport_label = Some(t.label());
            s.serial_path = t.serial_path().map(str::to_owned);
        });
        record.set_running(true);

        let plan = poller::poll_plan(record.class, record.read_temperature, &self.settings.link);
        let worker = Arc::clone(record);
        let queue = self.queue.clone();
        let interval = self.settings.poll_interval;
        match thread::Builder::new()
            .name(format!("poll-{}", record.id))
            .spawn(move || poller::run(worker, plan, interval, queue))
        {
            Ok(handle) => record.set_poller(handle),
            Err(e) => {
                error!("Supervisor: cannot spawn poller for {}: {}", record.id, e);
                record.mark_disconnected();
                return;
            }
        }

        info!("Supervisor: {} connected via {}", record.id, label);
        self.queue.send(CoreMsg::Connected {
            endpoint: record.id,
            transport: label,
            firmware: reported,
        });
    }

    // ── Watchdog ──────────────────────────────────────────────

    /// One watchdog pass.  Returns the number of reconnect attempts made.
    pub fn watchdog_tick(&self) -> usize {
        let mut attempts = 0;
        for record in &self.records {
            match record.state() {
                LinkState::Disabled => continue,
                LinkState::Connected if record.is_running() => continue,
                _ => {}
            }
            // A manual reconnect is already running for this endpoint.
            let Some(_gate) = record.connect_gate.try_lock() else {
                continue;
            };
            if record.state() == LinkState::Disabled {
                continue;
            }
            attempts += 1;
            match self.attempt(record) {
                Ok(()) => info!("Watchdog: {} reconnected", record.id),
                Err(e) => {
                    let ceiling = self.settings.reconnect_ceiling;
                    let (failures, disabled) = record.session.with_status(|s| {
                        s.failures += 1;
                        if s.failures >= ceiling {
                            s.state = LinkState::Disabled;
                        }
                        (s.failures, s.state == LinkState::Disabled)
                    });
                    if disabled {
                        warn!(
                            "Watchdog: {} disabled after {} failed reconnects",
                            record.id, failures
                        );
                        self.queue.send(CoreMsg::Disabled {
                            endpoint: record.id,
                            attempts: failures,
                        });
                    } else {
                        info!(
                            "Watchdog: {} reconnect {}/{} failed: {}",
                            record.id, failures, ceiling, e
                        );
                    }
                }
            }
        }
        attempts
    }

    /// Run initial discovery, then the watchdog until `stop` is set.
    pub fn spawn_watchdog(self: &Arc<Self>, stop: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
        let supervisor = Arc::clone(self);
        thread::Builder::new().name("watchdog".into()).spawn(move || {
            supervisor.start();
            let slice = Duration::from_millis(100);
            'outer: while !stop.load(Ordering::Acquire) {
                let deadline = Instant::now() + supervisor.settings.watchdog_interval;
                while Instant::now() < deadline {
                    if stop.load(Ordering::Acquire) {
                        break 'outer;
                    }
                    thread::sleep(slice);
                }
                supervisor.watchdog_tick();
            }
            info!("Watchdog: stopped");
        })
    }

    // ── Explicit intervention ─────────────────────────────────

    /// Clear the failure counter (and a disabled state) and reconnect now.
    pub fn reset(&self, id: EndpointId) -> Result<(), Error> {
        let record = self.record(id)?;
        let _gate = record.connect_gate.lock();
        record.session.with_status(|s| {
            s.failures = 0;
            s.state = LinkState::Disconnected;
        });
        info!("Supervisor: {} reset, reconnecting", id);
        self.attempt(record)
    }

    /// Replace the transport selection (settings save) and reconnect.
    pub fn apply_selection(&self, id: EndpointId, selection: TransportSelection) -> Result<(), Error> {
        let record = self.record(id)?;
        record.session.with_status(|s| s.selection = selection);
        self.reset(id)
    }

    /// Stop every poller and close every transport.
    pub fn shutdown(&self) {
        for record in &self.records {
            record.stop();
        }
        info!("Supervisor: all links closed");
    }

    // ── Ad-hoc commands ───────────────────────────────────────

    fn timeout_for(&self, command: &Command) -> Duration {
        let link = &self.settings.link;
        Duration::from_millis(match command {
            Command::Read(Quantity::Level) => link.level_read_timeout_ms,
            Command::Read(Quantity::Temperature) => link.timeout_ms,
            Command::Read(_) => link.chemistry_read_timeout_ms,
            _ => link.timeout_ms,
        })
    }

    /// Send one command to a connected endpoint and return its reply.
    /// An empty string means no reply within the timeout.
    pub fn query(&self, id: EndpointId, command: &Command) -> Result<String, Error> {
        let record = self.record(id)?;
        if record.state() != LinkState::Connected {
            return Err(SupervisorError::NotConnected(id.letter()).into());
        }
        let reply = record
            .session
            .exchange(&command.token(), Exchange::new(self.timeout_for(command)))?;
        Ok(reply.unwrap_or_default())
    }

    /// Current raw level of an endpoint, for taring.
    pub fn read_level(&self, id: EndpointId) -> Result<f64, Error> {
        let command = Command::Read(Quantity::Level);
        let reply = self.query(id, &command)?;
        codec::parse_numeric(&reply).ok_or_else(|| {
            ProtocolError::Unexpected {
                command: command.name(),
                reply,
            }
            .into()
        })
    }

    pub fn info(&self, id: EndpointId) -> Result<EndpointInfo, Error> {
        let text = |reply: String| codec::decode_reply(&reply).filter(|r| *r != "?").map(str::to_owned);
        let firmware = codec::parse_firmware(&self.query(id, &Command::FirmwareVersion)?, id);
        let model = text(self.query(id, &Command::Model)?);
        let variant = text(self.query(id, &Command::Variant)?);
        if firmware.is_some() {
            self.record(id)?
                .session
                .with_status(|s| s.firmware.clone_from(&firmware));
        }
        Ok(EndpointInfo {
            firmware,
            model,
            variant,
        })
    }

    pub fn diagnostics(&self, id: EndpointId) -> Result<String, Error> {
        let reply = self.query(id, &Command::Diagnostics)?;
        codec::decode_reply(&reply)
            .map(str::to_owned)
            .ok_or_else(|| ProtocolError::NoReply(Command::Diagnostics.name()).into())
    }

    pub fn tds_calibration(&self, id: EndpointId) -> Result<TdsCalibration, Error> {
        let reply = self.query(id, &Command::TdsConfig)?;
        Ok(codec::parse_tds_config(&reply)?)
    }

    /// Send a calibration set/save/defaults command and require `OK`.
    pub fn calibrate(&self, id: EndpointId, command: &Command) -> Result<(), Error> {
        let reply = self.query(id, command)?;
        codec::parse_ack(&reply, command)?;
        info!("Supervisor: {} accepted {}", id, command.name());
        Ok(())
    }

    /// Reboot an endpoint; the watchdog reconnects it afterwards.
    pub fn reboot(&self, id: EndpointId) -> Result<(), Error> {
        let reply = self.query(id, &Command::Reboot)?;
        if codec::decode_reply(&reply).is_none() {
            warn!("Supervisor: {} did not acknowledge reboot", id);
        }
        self.release(id)
    }

    /// Ask an endpoint for a firmware update and start it when available.
    pub fn remote_update(&self, id: EndpointId) -> Result<RemoteUpdateStatus, Error> {
        let status = codec::parse_update_status(&self.query(id, &Command::UpdateQuery)?)?;
        if let RemoteUpdateStatus::Available(version) = &status {
            let reply = self.query(id, &Command::UpdateApply)?;
            match codec::decode_reply(&reply) {
                Some(text) if text.eq_ignore_ascii_case("updating") => {
                    info!("Supervisor: {} updating to {}", id, version);
                    self.release(id)?;
                }
                _ => {
                    return Err(ProtocolError::Unexpected {
                        command: Command::UpdateApply.name(),
                        reply,
                    }
                    .into());
                }
            }
        }
        Ok(status)
    }

    /// Drop the link and leave the endpoint for the watchdog to reconnect.
    fn release(&self, id: EndpointId) -> Result<(), Error> {
        let record = self.record(id)?;
        let _gate = record.connect_gate.lock();
        record.stop();
        record.session.with_status(|s| {
            if s.state == LinkState::Connected {
                s.state = LinkState::Disconnected;
            }
        });
        self.queue.send(CoreMsg::Disconnected { endpoint: id });
        Ok(())
    }
}
