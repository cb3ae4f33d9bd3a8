//! Mock adapters for integration tests.
//!
//! Records every relay and audio call so tests can assert on the full
//! command history without touching GPIO lines or spawning a player.
//! [`FakeConnector`] stands in for serial ports and TCP bridges.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aquamon::app::events::AppEvent;
use aquamon::app::ports::{AudioPort, ClockPort, ConfigError, ConfigPort, EventSink, Relay, RelayPort};
use aquamon::config::SystemConfig;
use aquamon::error::{HardwareError, TransportError};
use aquamon::link::Transport;
use aquamon::supervisor::discovery::Connector;

// ── Hardware call record ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum HwCall {
    Relay { relay: Relay, on: bool },
    Play(PathBuf),
    StopAudio,
}

// ── MockHardware ──────────────────────────────────────────────

#[derive(Default)]
pub struct MockHardware {
    pub calls: Vec<HwCall>,
    /// Writes to this relay fail.
    pub failing: Option<Relay>,
}

#[allow(dead_code)]
impl MockHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level written to `relay`.
    pub fn relay_on(&self, relay: Relay) -> bool {
        self.calls
            .iter()
            .rev()
            .find_map(|c| match c {
                HwCall::Relay { relay: r, on } if *r == relay => Some(*on),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn plays(&self) -> Vec<&Path> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                HwCall::Play(cue) => Some(cue.as_path()),
                _ => None,
            })
            .collect()
    }
}

impl RelayPort for MockHardware {
    fn set_relay(&mut self, relay: Relay, on: bool) -> Result<(), HardwareError> {
        if self.failing == Some(relay) {
            return Err(HardwareError::GpioWrite {
                line: 4,
                detail: "Other".into(),
            });
        }
        self.calls.push(HwCall::Relay { relay, on });
        Ok(())
    }
}

impl AudioPort for MockHardware {
    fn play(&mut self, cue: &Path) -> Result<(), HardwareError> {
        self.calls.push(HwCall::Play(cue.to_path_buf()));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.calls.push(HwCall::StopAudio);
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── MemoryStore ───────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    pub saved: RefCell<Vec<SystemConfig>>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saved.borrow().len()
    }

    pub fn last(&self) -> Option<SystemConfig> {
        self.saved.borrow().last().cloned()
    }
}

impl ConfigPort for MemoryStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        self.last().ok_or(ConfigError::NotFound)
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.saved.borrow_mut().push(config.clone());
        Ok(())
    }
}

// ── ManualClock ───────────────────────────────────────────────

#[derive(Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn at(ms: u64) -> Self {
        Self { now: Cell::new(ms) }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl ClockPort for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

// ── Fake endpoints ────────────────────────────────────────────

/// Behaviour of one simulated endpoint: fixed replies per command token.
#[derive(Clone)]
pub struct FakeDevice {
    pub replies: HashMap<String, String>,
    /// Cleared to make every further write fail.
    pub alive: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl FakeDevice {
    /// A level endpoint with a firmware version and a steady reading.
    pub fn level(letter: char, level: &str) -> Self {
        let mut replies = HashMap::new();
        replies.insert("RX800".into(), letter.to_string());
        replies.insert("RX201".into(), "24.5C".into());
        replies.insert("RX203".into(), format!("{level}mmWG"));
        replies.insert("RX245".into(), format!("{letter}1.2.0"));
        Self {
            replies,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn reply(mut self, token: &str, reply: &str) -> Self {
        self.replies.insert(token.into(), reply.into());
        self
    }
}

struct FakeTransport {
    device: FakeDevice,
    label: String,
    serial_path: Option<String>,
    pending: VecDeque<String>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl Transport for FakeTransport {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        if !self.device.alive.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let token = line.trim_end();
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(token.to_owned());
        }
        if let Some(reply) = self.device.replies.get(token) {
            self.pending.push_back(reply.clone());
        }
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, TransportError> {
        if !self.device.alive.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(self.pending.pop_front())
    }

    fn discard_pending(&mut self) -> Result<usize, TransportError> {
        let dropped = self.pending.iter().map(String::len).sum();
        self.pending.clear();
        Ok(dropped)
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn serial_path(&self) -> Option<&str> {
        self.serial_path.as_deref()
    }
}

/// Serial ports and TCP bridges populated by the test.
#[derive(Default)]
pub struct FakeConnector {
    pub serial: Mutex<Vec<(String, FakeDevice)>>,
    pub network: Mutex<HashMap<(String, u16), FakeDevice>>,
    pub serial_opens: AtomicUsize,
    pub network_opens: AtomicUsize,
    pub sent: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serial(self, path: &str, device: FakeDevice) -> Self {
        if let Ok(mut serial) = self.serial.lock() {
            serial.push((path.into(), device));
        }
        self
    }

    pub fn with_network(self, host: &str, port: u16, device: FakeDevice) -> Self {
        if let Ok(mut network) = self.network.lock() {
            network.insert((host.into(), port), device);
        }
        self
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn transport(&self, device: FakeDevice, label: String, serial_path: Option<String>) -> Box<dyn Transport> {
        Box::new(FakeTransport {
            device,
            label,
            serial_path,
            pending: VecDeque::new(),
            sent: Arc::clone(&self.sent),
        })
    }
}

impl Connector for FakeConnector {
    fn open_network(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, TransportError> {
        self.network_opens.fetch_add(1, Ordering::Relaxed);
        let device = self
            .network
            .lock()
            .ok()
            .and_then(|n| n.get(&(host.to_owned(), port)).cloned())
            .ok_or_else(|| TransportError::Open(format!("{host}:{port} refused")))?;
        Ok(self.transport(device, format!("tcp {host}:{port}"), None))
    }

    fn serial_ports(&self) -> Vec<String> {
        self.serial
            .lock()
            .map(|s| s.iter().map(|(p, _)| p.clone()).collect())
            .unwrap_or_default()
    }

    fn open_serial(&self, path: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.serial_opens.fetch_add(1, Ordering::Relaxed);
        let device = self
            .serial
            .lock()
            .ok()
            .and_then(|s| s.iter().find(|(p, _)| p == path).map(|(_, d)| d.clone()))
            .ok_or_else(|| TransportError::Open(format!("{path} busy")))?;
        Ok(self.transport(device, format!("serial {path}"), Some(path.to_owned())))
    }

    fn reply_timeout(&self) -> Duration {
        Duration::from_millis(20)
    }
}
