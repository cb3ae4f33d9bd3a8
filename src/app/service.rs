//! Application service: the hexagonal core.
//!
//! [`AppService`] owns the pump and alarm engines, the flasher, the timer
//! queue and the live configuration.  It consumes [`CoreMsg`]s one at a
//! time; all I/O flows through port traits injected at call sites, making
//! the entire service testable with mock adapters.
//!
//! ```text
//!  CoreQueue ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                │        AppService         │
//!  RelayPort ◀── │  Pumps · Alarms · Flasher │ ──▶ ConfigPort
//!  AudioPort ◀── │       TimerQueue          │
//!                └──────────────────────────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{info, warn};

use crate::codec::{Quantity, Reading};
use crate::config::{EndpointId, PumpId, SystemConfig};
use crate::control::alarm::{self, AlarmEngine, AlarmLevel, AlarmTransition, ChannelKey};
use crate::control::pump::{PumpEffect, PumpEngine, PumpState, PumpTiming};
use crate::drivers::flash::{FlashStyle, FlashTarget, Flasher};
use crate::error::HardwareError;
use crate::events::CoreMsg;
use crate::scheduler::{TimerKind, TimerQueue};

use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::{AudioPort, ClockPort, ConfigPort, EventSink, Relay, RelayPort};

/// Longest the run loop sleeps without a deadline.
const IDLE_WAIT_MS: u64 = 1_000;

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates all domain logic.
pub struct AppService {
    config: SystemConfig,
    pumps: PumpEngine,
    alarms: AlarmEngine,
    flasher: Flasher,
    timers: TimerQueue,
    /// Latest valid untared level per endpoint, for "zero now".
    last_level: HashMap<EndpointId, f64>,
    effects: Vec<PumpEffect>,
    config_dirty: bool,
    save_due_ms: u64,
}

impl AppService {
    /// Construct the service from configuration.
    ///
    /// Does **not** touch hardware; call [`start`](Self::start) next.
    pub fn new(config: SystemConfig, now_ms: u64) -> Self {
        let pumps = PumpEngine::new(PumpTiming::from_config(&config.timing), now_ms);
        let alarms = AlarmEngine::new(config.timing.audio_min_interval_ms);
        let flasher = Flasher::new(config.timing.flash_interval_ms);
        Self {
            config,
            pumps,
            alarms,
            flasher,
            timers: TimerQueue::new(),
            last_level: HashMap::new(),
            effects: Vec::new(),
            config_dirty: false,
            save_due_ms: 0,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Drive every relay to its initial (off) state.
    pub fn start(&mut self, hw: &mut impl RelayPort, sink: &mut impl EventSink) {
        for pump in PumpId::ALL {
            self.write_relay(hw, sink, Relay::Pump(pump), false);
        }
        self.write_relay(hw, sink, Relay::AnyPump, false);
        sink.emit(&AppEvent::Started);
        info!("AppService started with {} endpoints", self.config.endpoints.len());
    }

    /// Pumps off, audio stopped, flashes cleared.
    pub fn shutdown(&mut self, hw: &mut (impl RelayPort + AudioPort), sink: &mut impl EventSink) {
        for pump in PumpId::ALL {
            if self.pumps.state(pump).output {
                self.pumps.toggle(pump, Some(false), true, &mut self.effects);
            }
        }
        self.apply_pump_effects(0, hw, sink);
        self.write_relay(hw, sink, Relay::AnyPump, false);
        if let Err(e) = hw.stop() {
            self.hardware_fault(sink, e);
        }
        info!(
            "AppService stopped ({} alarm channel(s) active, {} indicator(s) flashing)",
            self.alarms.active().count(),
            self.flasher.active_count()
        );
    }

    /// Consume the queue until `Shutdown` (or every producer is gone),
    /// firing timers and auto-saving in between.
    pub fn run(
        &mut self,
        rx: &Receiver<CoreMsg>,
        hw: &mut (impl RelayPort + AudioPort),
        sink: &mut impl EventSink,
        storage: &impl ConfigPort,
        clock: &impl ClockPort,
    ) {
        loop {
            let now = clock.now_ms();
            self.fire_due_timers(now, hw, sink);
            self.auto_save_if_needed(now, storage);

            let wait = self
                .next_deadline()
                .map_or(IDLE_WAIT_MS, |due| due.saturating_sub(now))
                .min(IDLE_WAIT_MS);
            match rx.recv_timeout(Duration::from_millis(wait)) {
                Ok(msg) => {
                    if !self.handle(msg, clock.now_ms(), hw, sink) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("AppService: all producers gone, stopping");
                    break;
                }
            }
        }
        self.shutdown(hw, sink);
        self.force_save_if_dirty(storage);
    }

    // ── Message handling ──────────────────────────────────────

    /// Process one queue message.  Returns `false` on `Shutdown`.
    pub fn handle(
        &mut self,
        msg: CoreMsg,
        now_ms: u64,
        hw: &mut (impl RelayPort + AudioPort),
        sink: &mut impl EventSink,
    ) -> bool {
        match msg {
            CoreMsg::Connected {
                endpoint,
                transport,
                firmware,
            } => {
                if let (Some(fw), Some(ep)) = (&firmware, self.config.endpoint_mut(endpoint)) {
                    if ep.firmware_version.as_ref() != Some(fw) {
                        ep.firmware_version = Some(fw.clone());
                        self.mark_config_dirty(now_ms);
                    }
                }
                sink.emit(&AppEvent::Connected {
                    endpoint,
                    transport,
                    firmware,
                });
                self.display(sink, endpoint, "Connected");
            }
            CoreMsg::Disconnected { endpoint } => {
                self.last_level.remove(&endpoint);
                sink.emit(&AppEvent::Disconnected { endpoint });
                self.display(sink, endpoint, "Disconnected");
            }
            CoreMsg::Disabled { endpoint, attempts } => {
                sink.emit(&AppEvent::Disabled { endpoint, attempts });
                self.display(sink, endpoint, "Disconnected (retries exhausted)");
            }
            CoreMsg::Readings { endpoint, readings } => {
                for reading in readings {
                    self.process_reading(endpoint, reading, now_ms, hw, sink);
                }
            }
            CoreMsg::Command(cmd) => self.handle_command(cmd, now_ms, hw, sink),
            CoreMsg::Shutdown => return false,
        }
        true
    }

    fn process_reading(
        &mut self,
        endpoint: EndpointId,
        reading: Reading,
        now_ms: u64,
        hw: &mut (impl RelayPort + AudioPort),
        sink: &mut impl EventSink,
    ) {
        let Some(ep) = self.config.endpoint(endpoint) else {
            warn!("AppService: reading from unknown endpoint {}", endpoint);
            return;
        };
        let quantity = reading.quantity;
        let value = match (quantity, reading.value) {
            (Quantity::Level, Some(raw)) => {
                self.last_level.insert(endpoint, raw);
                Some(raw + ep.tare_offset)
            }
            (_, v) => v,
        };
        let pump = ep.pump.zip(ep.thresholds);

        sink.emit(&AppEvent::Reading {
            endpoint,
            tared: value.filter(|_| quantity == Quantity::Level),
            reading,
        });

        if let (Quantity::Level, Some(level), Some((pump, thresholds))) = (quantity, value, pump) {
            self.pumps
                .evaluate(pump, level, thresholds, now_ms, &mut self.timers, &mut self.effects);
            self.apply_pump_effects(now_ms, hw, sink);
        }

        let level = match self.config.alarm(endpoint, quantity) {
            Some(cfg) => alarm::evaluate(cfg, value),
            None => return,
        };
        if let Some(transition) = self.alarms.update(endpoint, quantity, level, now_ms) {
            self.on_alarm_transition(transition, now_ms, hw, sink);
        }
    }

    /// Process an external command.
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        now_ms: u64,
        hw: &mut impl RelayPort,
        sink: &mut impl EventSink,
    ) {
        match cmd {
            AppCommand::TogglePump(pump) => {
                self.pumps.toggle(pump, None, false, &mut self.effects);
            }
            AppCommand::SetPump { pump, on } => {
                self.pumps.toggle(pump, Some(on), false, &mut self.effects);
            }
            AppCommand::SetAutoMode { pump, auto } => {
                self.pumps.set_auto(pump, auto, &mut self.effects);
            }
            AppCommand::SetOverride { pump, active } => {
                self.pumps.set_override(pump, active, &mut self.effects);
            }
            AppCommand::ApplyTare { endpoint, raw } => {
                match raw.or_else(|| self.last_level.get(&endpoint).copied()) {
                    Some(raw) => self.set_tare(endpoint, -raw, now_ms, sink),
                    None => warn!("AppService: no level reading to tare {} against", endpoint),
                }
            }
            AppCommand::ClearTare { endpoint } => self.set_tare(endpoint, 0.0, now_ms, sink),
            AppCommand::UpdateConfig(new_config) => match new_config.validate() {
                Ok(()) => {
                    self.pumps.set_timing(PumpTiming::from_config(&new_config.timing));
                    self.alarms.set_audio_interval(new_config.timing.audio_min_interval_ms);
                    self.flasher.set_interval(new_config.timing.flash_interval_ms);
                    self.config = *new_config;
                    self.mark_config_dirty(now_ms);
                    info!("Configuration updated at runtime");
                }
                Err(e) => {
                    warn!("AppService: config update rejected: {}", e);
                    sink.emit(&AppEvent::ConfigRejected(e));
                }
            },
            AppCommand::SaveConfig => {
                self.config_dirty = true;
                self.save_due_ms = now_ms;
                info!("Explicit config save requested");
            }
            AppCommand::SetTransport {
                endpoint,
                selection,
            } => match self.config.endpoint_mut(endpoint) {
                Some(ep) => {
                    ep.transport = selection;
                    self.mark_config_dirty(now_ms);
                }
                None => warn!("AppService: transport for unknown endpoint {}", endpoint),
            },
            AppCommand::RecordUpdateCheck(unix) => {
                self.config.update.last_check_unix = Some(unix);
                self.mark_config_dirty(now_ms);
            }
        }
        self.apply_pump_effects(now_ms, hw, sink);
    }

    fn set_tare(&mut self, endpoint: EndpointId, offset: f64, now_ms: u64, sink: &mut impl EventSink) {
        let Some(ep) = self.config.endpoint_mut(endpoint) else {
            warn!("AppService: tare for unknown endpoint {}", endpoint);
            return;
        };
        ep.tare_offset = offset;
        self.mark_config_dirty(now_ms);
        info!("AppService: {} tare offset {:.2}", endpoint, offset);
        sink.emit(&AppEvent::TareApplied { endpoint, offset });
    }

    // ── Timers ────────────────────────────────────────────────

    /// Fire every timer due at `now_ms`.
    pub fn fire_due_timers(&mut self, now_ms: u64, hw: &mut impl RelayPort, sink: &mut impl EventSink) {
        while let Some((id, kind)) = self.timers.pop_due(now_ms) {
            match kind {
                TimerKind::FlashTick(target) => {
                    if let Some(frame) = self.flasher.tick(target, id, now_ms, &mut self.timers) {
                        sink.emit(&AppEvent::FlashFrame(frame));
                    }
                }
                TimerKind::KeepAliveRestore(_) | TimerKind::ClearPumpNotice(_) => {
                    self.pumps
                        .on_timer(kind, id, now_ms, &mut self.timers, &mut self.effects);
                    self.apply_pump_effects(now_ms, hw, sink);
                }
            }
        }
    }

    /// Earliest time the service needs to run without a message: the next
    /// timer or the pending auto-save.
    pub fn next_deadline(&self) -> Option<u64> {
        let save = self.config_dirty.then_some(self.save_due_ms);
        match (self.timers.next_due(), save) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ── Side effects ──────────────────────────────────────────

    fn apply_pump_effects(&mut self, now_ms: u64, hw: &mut impl RelayPort, sink: &mut impl EventSink) {
        let effects = std::mem::take(&mut self.effects);
        for effect in effects {
            match effect {
                PumpEffect::Output { pump, on } => {
                    self.write_relay(hw, sink, Relay::Pump(pump), on);
                    self.write_relay(hw, sink, Relay::AnyPump, self.pumps.any_on());
                    sink.emit(&AppEvent::PumpStateChanged { pump, on });
                }
                PumpEffect::AutoModeChanged { pump, auto } => {
                    sink.emit(&AppEvent::AutoModeChanged { pump, auto });
                }
                PumpEffect::OverrideChanged { pump, active } => {
                    sink.emit(&AppEvent::OverrideChanged { pump, active });
                }
                PumpEffect::StartFlash(pump) => {
                    let frame = self.flasher.start(
                        FlashTarget::Pump(pump),
                        FlashStyle::AutoTopUp,
                        now_ms,
                        &mut self.timers,
                    );
                    sink.emit(&AppEvent::FlashFrame(frame));
                }
                PumpEffect::StopFlash(pump) => {
                    let target = FlashTarget::Pump(pump);
                    if self.flasher.stop(target, &mut self.timers) {
                        sink.emit(&AppEvent::FlashStopped(target));
                    }
                }
                PumpEffect::Notice { pump, notice } => {
                    sink.emit(&AppEvent::PumpNotice { pump, notice });
                }
            }
        }
    }

    fn on_alarm_transition(
        &mut self,
        transition: AlarmTransition,
        now_ms: u64,
        hw: &mut impl AudioPort,
        sink: &mut impl EventSink,
    ) {
        let key = (transition.endpoint, transition.quantity);
        let target = FlashTarget::Alarm(transition.endpoint, transition.quantity);
        sink.emit(&AppEvent::AlarmStateChanged(transition));

        if self.flasher.stop(target, &mut self.timers) {
            sink.emit(&AppEvent::FlashStopped(target));
        }
        // The previous level's cue never outlives its level.
        if self.config.audio.enabled {
            if let Err(e) = hw.stop() {
                self.hardware_fault(sink, e);
            }
        }
        let Some(style) = transition.to.flash_style() else {
            self.display(sink, transition.endpoint, "Connected");
            return;
        };

        let frame = self.flasher.start(target, style, now_ms, &mut self.timers);
        sink.emit(&AppEvent::FlashFrame(frame));

        if !self.config.audio.enabled || !self.alarms.claim_audio(key, transition.to, now_ms) {
            return;
        }
        if let Some(cue) = transition.to.cue(&self.config.audio) {
            if let Err(e) = hw.play(cue) {
                self.hardware_fault(sink, e);
            }
        }
    }

    fn write_relay(&self, hw: &mut impl RelayPort, sink: &mut impl EventSink, relay: Relay, on: bool) {
        if let Err(e) = hw.set_relay(relay, on) {
            self.hardware_fault(sink, e);
        }
    }

    fn hardware_fault(&self, sink: &mut impl EventSink, e: HardwareError) {
        warn!("AppService: hardware fault: {}", e);
        sink.emit(&AppEvent::HardwareFault(e));
    }

    fn display(&self, sink: &mut impl EventSink, endpoint: EndpointId, text: &str) {
        sink.emit(&AppEvent::Display {
            endpoint,
            text: text.to_owned(),
        });
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn pump_state(&self, pump: PumpId) -> &PumpState {
        self.pumps.state(pump)
    }

    pub fn alarm_level(&self, key: ChannelKey) -> AlarmLevel {
        self.alarms.level(key)
    }

    pub fn is_flashing(&self, target: FlashTarget) -> bool {
        self.flasher.is_flashing(target)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// The live configuration.
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    // ── Config dirty-flag management ──────────────────────────

    /// Mark the config as modified; the save happens once
    /// `auto_save_delay_ms` pass without a further change.
    pub fn mark_config_dirty(&mut self, now_ms: u64) {
        self.config_dirty = true;
        self.save_due_ms = now_ms + self.config.timing.auto_save_delay_ms;
    }

    /// Save if the delay has elapsed.  Returns `true` if the config was saved.
    pub fn auto_save_if_needed(&mut self, now_ms: u64, storage: &impl ConfigPort) -> bool {
        if !self.config_dirty || now_ms < self.save_due_ms {
            return false;
        }
        match storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("Config auto-saved");
                true
            }
            Err(e) => {
                warn!("Config auto-save failed: {}", e);
                self.save_due_ms = now_ms + self.config.timing.auto_save_delay_ms;
                false
            }
        }
    }

    /// Force-save if dirty (call before exit).
    pub fn force_save_if_dirty(&mut self, storage: &impl ConfigPort) {
        if !self.config_dirty {
            return;
        }
        match storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("Config force-saved before shutdown");
            }
            Err(e) => {
                warn!("Config force-save failed: {}", e);
            }
        }
    }

    /// Whether the config has unsaved changes.
    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty
    }
}
