//! Tri-state alarm classification for monitored channels.
//!
//! Each channel `(endpoint, quantity)` is classified on every valid
//! reading, but the engine only reports *transitions*.  Side effects
//! (flash, audio) are driven by the service from those transitions, so a
//! level that stays critical flashes and plays once.

use std::collections::HashMap;
use std::path::Path;

use log::info;

use crate::codec::Quantity;
use crate::config::{AlarmConfig, AlarmUnit, AudioConfig, EndpointId, TankDimensions};
use crate::drivers::flash::FlashStyle;

pub const LITERS_TO_GALLONS: f64 = 0.264_172;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmLevel {
    Normal,
    Approaching,
    Critical,
}

impl AlarmLevel {
    pub fn flash_style(self) -> Option<FlashStyle> {
        match self {
            Self::Normal => None,
            Self::Approaching => Some(FlashStyle::Approaching),
            Self::Critical => Some(FlashStyle::Critical),
        }
    }

    pub fn cue(self, audio: &AudioConfig) -> Option<&Path> {
        match self {
            Self::Normal => None,
            Self::Approaching => Some(audio.approaching_cue.as_path()),
            Self::Critical => Some(audio.critical_cue.as_path()),
        }
    }
}

/// Classify `value` against `[min, max]` with an approach `margin`.
/// An unusable band (min ≥ max, negative or non-finite margin) is normal.
pub fn classify(value: f64, min: f64, max: f64, margin: f64) -> AlarmLevel {
    if !value.is_finite() || min >= max || !(margin >= 0.0) || !margin.is_finite() {
        return AlarmLevel::Normal;
    }
    if value <= min || value >= max {
        AlarmLevel::Critical
    } else if value <= min + margin || value >= max - margin {
        AlarmLevel::Approaching
    } else {
        AlarmLevel::Normal
    }
}

/// Convert a tared RO-tank level to the alarm's display unit.
pub fn convert_level(level: f64, unit: AlarmUnit, tank: Option<&TankDimensions>) -> Option<f64> {
    let liters = |t: &TankDimensions| level * t.width_cm * t.depth_cm / 10_000.0;
    match unit {
        AlarmUnit::Raw => Some(level),
        AlarmUnit::Liters => tank.filter(|t| t.width_cm > 0.0 && t.depth_cm > 0.0).map(liters),
        AlarmUnit::Gallons => tank
            .filter(|t| t.width_cm > 0.0 && t.depth_cm > 0.0)
            .map(|t| liters(t) * LITERS_TO_GALLONS),
    }
}

/// Level of a configured channel for one reading (`None` = invalid).
pub fn evaluate(config: &AlarmConfig, value: Option<f64>) -> AlarmLevel {
    if !config.enabled {
        return AlarmLevel::Normal;
    }
    let value = match (value, config.quantity) {
        (Some(v), Quantity::Level) => convert_level(v, config.unit, config.tank.as_ref()),
        (v, _) => v,
    };
    match value {
        Some(v) => classify(v, config.min, config.max, config.margin),
        None => AlarmLevel::Normal,
    }
}

pub type ChannelKey = (EndpointId, Quantity);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmTransition {
    pub endpoint: EndpointId,
    pub quantity: Quantity,
    pub from: AlarmLevel,
    pub to: AlarmLevel,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Default)]
struct AlarmState {
    level: Option<AlarmLevel>,
    last_played_approaching: Option<u64>,
    last_played_critical: Option<u64>,
}

impl AlarmState {
    fn last_played_mut(&mut self, level: AlarmLevel) -> Option<&mut Option<u64>> {
        match level {
            AlarmLevel::Normal => None,
            AlarmLevel::Approaching => Some(&mut self.last_played_approaching),
            AlarmLevel::Critical => Some(&mut self.last_played_critical),
        }
    }
}

pub struct AlarmEngine {
    channels: HashMap<ChannelKey, AlarmState>,
    audio_min_interval_ms: u64,
}

impl AlarmEngine {
    pub fn new(audio_min_interval_ms: u64) -> Self {
        Self {
            channels: HashMap::new(),
            audio_min_interval_ms,
        }
    }

    /// Record the channel's level.  Returns the transition, if any.  A
    /// channel never seen before starts from normal.
    pub fn update(
        &mut self,
        endpoint: EndpointId,
        quantity: Quantity,
        level: AlarmLevel,
        now_ms: u64,
    ) -> Option<AlarmTransition> {
        let state = self.channels.entry((endpoint, quantity)).or_default();
        let from = state.level.unwrap_or(AlarmLevel::Normal);
        state.level = Some(level);
        if from == level {
            return None;
        }
        info!("Alarm: {} {:?} {:?} -> {:?}", endpoint, quantity, from, level);
        Some(AlarmTransition {
            endpoint,
            quantity,
            from,
            to: level,
            at_ms: now_ms,
        })
    }

    /// Applies from the next claim; earlier plays keep their timestamps.
    pub fn set_audio_interval(&mut self, audio_min_interval_ms: u64) {
        self.audio_min_interval_ms = audio_min_interval_ms;
    }

    /// Whether the cue for `level` may play now on this channel.  Records
    /// the play when it returns `true`.
    pub fn claim_audio(&mut self, key: ChannelKey, level: AlarmLevel, now_ms: u64) -> bool {
        let interval = self.audio_min_interval_ms;
        let state = self.channels.entry(key).or_default();
        let Some(last) = state.last_played_mut(level) else {
            return false;
        };
        if last.is_some_and(|t| now_ms.saturating_sub(t) < interval) {
            return false;
        }
        *last = Some(now_ms);
        true
    }

    pub fn level(&self, key: ChannelKey) -> AlarmLevel {
        self.channels
            .get(&key)
            .and_then(|s| s.level)
            .unwrap_or(AlarmLevel::Normal)
    }

    /// Channels currently out of normal.
    pub fn active(&self) -> impl Iterator<Item = (ChannelKey, AlarmLevel)> + '_ {
        self.channels.iter().filter_map(|(k, s)| match s.level {
            Some(l) if l != AlarmLevel::Normal => Some((*k, l)),
            _ => None,
        })
    }
}
