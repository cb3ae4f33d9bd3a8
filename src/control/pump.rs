//! Pump hysteresis engine for the two top-up pumps.
//!
//! Driven by tared level readings from each pump's level endpoint.  Per
//! reading the rules run in this order:
//!
//! 1. **Max seen**: at/above `off`, remember the time and abandon any
//!    pending keep-alive cycle.
//! 2. **Override**: while set, nothing else runs; it clears itself once
//!    the level drops below `on`.
//! 3. **Auto**: on at/below `on`, off at/above `off`.
//! 4. **Manual safety**: a manually running pump is forced off at `off`.
//! 5. **Keep-alive**: in auto, a pump that has run for the whole window
//!    without reaching `off` is switched off briefly and then restored.
//!
//! The engine does no I/O.  It returns [`PumpEffect`]s for the service to
//! apply and schedules its deferred work on the [`TimerQueue`].

use heapless::String as HString;
use log::{info, warn};

use crate::config::{PumpId, Thresholds, TimingConfig};
use crate::scheduler::{TimerId, TimerKind, TimerQueue};

pub const NOTICE_CAPACITY: usize = 40;

/// Short status line shown next to a pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpNotice {
    pub kind: NoticeKind,
    pub text: HString<NOTICE_CAPACITY>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    SafetyShutdown,
    KeepAlive,
}

impl PumpNotice {
    pub fn new(kind: NoticeKind) -> Self {
        let label = match kind {
            NoticeKind::SafetyShutdown => "MAX LEVEL - SAFETY SHUTDOWN",
            NoticeKind::KeepAlive => "KEEP-ALIVE: cycling pump",
        };
        let mut text = HString::new();
        // Both labels fit NOTICE_CAPACITY.
        let _ = text.push_str(label);
        Self { kind, text }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Work the service must carry out after an engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum PumpEffect {
    /// Write the pump relay (and refresh the any-pump relay).
    Output { pump: PumpId, on: bool },
    AutoModeChanged { pump: PumpId, auto: bool },
    OverrideChanged { pump: PumpId, active: bool },
    /// Start the AUTO TOP UP flash.
    StartFlash(PumpId),
    StopFlash(PumpId),
    /// Replace the pump's notice (`None` clears it).
    Notice { pump: PumpId, notice: Option<PumpNotice> },
}

#[derive(Debug, Clone)]
pub struct PumpState {
    pub output: bool,
    pub auto: bool,
    pub override_active: bool,
    /// Last time (ms) the level was at or above `off`.
    pub last_max_ms: u64,
    pub keep_alive_active: bool,
    pub notice: Option<PumpNotice>,
    keep_alive_timer: Option<TimerId>,
    notice_timer: Option<TimerId>,
}

impl PumpState {
    fn new(now_ms: u64) -> Self {
        Self {
            output: false,
            auto: true,
            override_active: false,
            last_max_ms: now_ms,
            keep_alive_active: false,
            notice: None,
            keep_alive_timer: None,
            notice_timer: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PumpTiming {
    pub keep_alive_window_ms: u64,
    pub keep_alive_off_ms: u64,
    pub safety_notice_ms: u64,
}

impl PumpTiming {
    pub fn from_config(timing: &TimingConfig) -> Self {
        Self {
            keep_alive_window_ms: timing.keep_alive_window_secs * 1000,
            keep_alive_off_ms: timing.keep_alive_off_secs * 1000,
            safety_notice_ms: timing.safety_notice_secs * 1000,
        }
    }
}

pub struct PumpEngine {
    pumps: [PumpState; 2],
    timing: PumpTiming,
}

impl PumpEngine {
    pub fn new(timing: PumpTiming, now_ms: u64) -> Self {
        Self {
            pumps: [PumpState::new(now_ms), PumpState::new(now_ms)],
            timing,
        }
    }

    pub fn state(&self, pump: PumpId) -> &PumpState {
        &self.pumps[pump.index()]
    }

    fn state_mut(&mut self, pump: PumpId) -> &mut PumpState {
        &mut self.pumps[pump.index()]
    }

    /// OR of both pump outputs, mirrored on the aux relay.
    pub fn any_on(&self) -> bool {
        self.pumps.iter().any(|p| p.output)
    }

    pub fn set_timing(&mut self, timing: PumpTiming) {
        self.timing = timing;
    }

    // ── Per-reading rules ─────────────────────────────────────

    /// Run the control rules for one tared level reading.
    pub fn evaluate(
        &mut self,
        pump: PumpId,
        level: f64,
        thresholds: Thresholds,
        now_ms: u64,
        timers: &mut TimerQueue,
        effects: &mut Vec<PumpEffect>,
    ) {
        // 1. max seen
        if level >= thresholds.off {
            let state = self.state_mut(pump);
            state.last_max_ms = now_ms;
            if state.keep_alive_active {
                state.keep_alive_active = false;
                if let Some(id) = state.keep_alive_timer.take() {
                    timers.cancel(id);
                }
                info!("Pump {}: level reached max, keep-alive cycle abandoned", pump);
                self.clear_notice_of(pump, NoticeKind::KeepAlive, timers, effects);
            }
        }

        // 2. override
        if self.state(pump).override_active {
            if level < thresholds.on {
                info!("Pump {}: level below on threshold, override cleared", pump);
                self.set_override(pump, false, effects);
            } else {
                return;
            }
        }

        // 3./4. auto hysteresis or manual safety
        let state = self.state(pump);
        if state.auto {
            if level <= thresholds.on && !state.output {
                info!("Pump {}: level {:.1} <= {:.1}, auto top-up", pump, level, thresholds.on);
                self.toggle(pump, Some(true), false, effects);
                effects.push(PumpEffect::StartFlash(pump));
            } else if level >= thresholds.off && state.output {
                info!("Pump {}: level {:.1} >= {:.1}, auto stop", pump, level, thresholds.off);
                self.toggle(pump, Some(false), true, effects);
            }
        } else if level >= thresholds.off && state.output {
            warn!(
                "Pump {}: manual overfill at {:.1} (off {:.1}), safety shutdown",
                pump, level, thresholds.off
            );
            self.toggle(pump, Some(false), true, effects);
            self.show_notice(pump, NoticeKind::SafetyShutdown, Some(self.timing.safety_notice_ms), now_ms, timers, effects);
        }

        // 5. keep-alive
        let state = self.state(pump);
        if state.auto
            && !state.keep_alive_active
            && state.output
            && now_ms.saturating_sub(state.last_max_ms) >= self.timing.keep_alive_window_ms
        {
            info!("Pump {}: keep-alive window elapsed, cycling", pump);
            self.toggle(pump, Some(false), true, effects);
            let restore = timers.schedule(
                now_ms + self.timing.keep_alive_off_ms,
                TimerKind::KeepAliveRestore(pump),
            );
            let state = self.state_mut(pump);
            state.keep_alive_active = true;
            state.keep_alive_timer = Some(restore);
            self.show_notice(pump, NoticeKind::KeepAlive, None, now_ms, timers, effects);
        }
    }

    // ── Explicit control ──────────────────────────────────────

    /// Set (or flip, when `force` is `None`) a pump output.  Switching a
    /// pump off disables auto mode unless `suppress_auto_disable` is set.
    pub fn toggle(
        &mut self,
        pump: PumpId,
        force: Option<bool>,
        suppress_auto_disable: bool,
        effects: &mut Vec<PumpEffect>,
    ) {
        let state = self.state_mut(pump);
        let on = force.unwrap_or(!state.output);
        state.output = on;
        effects.push(PumpEffect::Output { pump, on });
        effects.push(PumpEffect::StopFlash(pump));
        if !on && !suppress_auto_disable && state.auto {
            info!("Pump {}: switched off manually, auto mode disabled", pump);
            self.set_auto(pump, false, effects);
        }
    }

    pub fn set_auto(&mut self, pump: PumpId, auto: bool, effects: &mut Vec<PumpEffect>) {
        let state = self.state_mut(pump);
        if state.auto != auto {
            state.auto = auto;
            effects.push(PumpEffect::AutoModeChanged { pump, auto });
        }
    }

    pub fn set_override(&mut self, pump: PumpId, active: bool, effects: &mut Vec<PumpEffect>) {
        let state = self.state_mut(pump);
        if state.override_active != active {
            state.override_active = active;
            effects.push(PumpEffect::OverrideChanged { pump, active });
        }
    }

    // ── Timers ────────────────────────────────────────────────

    /// Handle a fired pump timer.  Stale timers are ignored.
    pub fn on_timer(
        &mut self,
        kind: TimerKind,
        fired: TimerId,
        now_ms: u64,
        timers: &mut TimerQueue,
        effects: &mut Vec<PumpEffect>,
    ) {
        match kind {
            TimerKind::KeepAliveRestore(pump) => {
                if self.state(pump).keep_alive_timer != Some(fired) {
                    return;
                }
                let state = self.state(pump);
                if state.auto && !state.output {
                    info!("Pump {}: keep-alive off period over, restoring", pump);
                    self.toggle(pump, Some(true), true, effects);
                }
                let state = self.state_mut(pump);
                state.keep_alive_timer = None;
                state.keep_alive_active = false;
                state.last_max_ms = now_ms;
                self.clear_notice_of(pump, NoticeKind::KeepAlive, timers, effects);
            }
            TimerKind::ClearPumpNotice(pump) => {
                let state = self.state_mut(pump);
                if state.notice_timer != Some(fired) {
                    return;
                }
                state.notice_timer = None;
                if state.notice.take().is_some() {
                    effects.push(PumpEffect::Notice { pump, notice: None });
                }
            }
            TimerKind::FlashTick(_) => {}
        }
    }

    fn show_notice(
        &mut self,
        pump: PumpId,
        kind: NoticeKind,
        expires_after_ms: Option<u64>,
        now_ms: u64,
        timers: &mut TimerQueue,
        effects: &mut Vec<PumpEffect>,
    ) {
        let state = self.state_mut(pump);
        if let Some(id) = state.notice_timer.take() {
            timers.cancel(id);
        }
        let notice = PumpNotice::new(kind);
        state.notice = Some(notice.clone());
        state.notice_timer = expires_after_ms
            .map(|after| timers.schedule(now_ms + after, TimerKind::ClearPumpNotice(pump)));
        effects.push(PumpEffect::Notice {
            pump,
            notice: Some(notice),
        });
    }

    fn clear_notice_of(
        &mut self,
        pump: PumpId,
        kind: NoticeKind,
        timers: &mut TimerQueue,
        effects: &mut Vec<PumpEffect>,
    ) {
        let state = self.state_mut(pump);
        if state.notice.as_ref().map(|n| n.kind) != Some(kind) {
            return;
        }
        state.notice = None;
        if let Some(id) = state.notice_timer.take() {
            timers.cancel(id);
        }
        effects.push(PumpEffect::Notice { pump, notice: None });
    }
}
