//! System configuration parameters
//!
//! Everything the core reads or writes between runs: endpoint topology,
//! pump thresholds, tare offsets, alarm channels, timing, GPIO wiring,
//! audio cues and the update source.  Persisted as JSON through a
//! [`ConfigPort`](crate::app::ports::ConfigPort).

use core::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::codec::Quantity;

/// Default TCP port of a networked endpoint.
pub const DEFAULT_TCP_PORT: u16 = 8888;

// ── Identity ──────────────────────────────────────────────────

/// Single-letter endpoint identity, as answered to the identify command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub char);

impl EndpointId {
    pub const fn new(letter: char) -> Self {
        Self(letter)
    }

    pub const fn letter(self) -> char {
        self.0
    }

    /// Parse a console/CLI token such as `c` or `C`.
    pub fn parse(token: &str) -> Option<Self> {
        let mut chars = token.trim().chars();
        let letter = chars.next()?.to_ascii_uppercase();
        if chars.next().is_some() || !letter.is_ascii_uppercase() {
            return None;
        }
        Some(Self(letter))
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an endpoint measures, which decides its probe and poll plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorClass {
    /// Sump level probe that controls a pump.
    Level,
    /// Reverse-osmosis reservoir level probe.
    RoTank,
    /// pH probe.
    Ph,
    /// Conductivity / TDS / salinity probe.
    Tds,
}

/// Which of the two pump outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PumpId {
    A,
    B,
}

impl PumpId {
    pub const ALL: [PumpId; 2] = [PumpId::A, PumpId::B];

    pub const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "A" | "a" => Some(Self::A),
            "B" | "b" => Some(Self::B),
            _ => None,
        }
    }
}

impl fmt::Display for PumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

// ── Endpoints ─────────────────────────────────────────────────

/// How to reach an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportSelection {
    /// Scan local serial ports for the endpoint.
    Serial,
    /// Connect to a TCP bridge first, then fall back to the serial scan.
    Network {
        host: String,
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

/// Hysteresis pair for level-based pump control, in raw level units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Pump turns on at or below this level.
    pub on: f64,
    /// Pump turns off at or above this level.
    pub off: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: EndpointId,
    pub class: SensorClass,
    pub transport: TransportSelection,
    /// Additive correction applied to level readings.
    #[serde(default)]
    pub tare_offset: f64,
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
    /// Pump driven by this endpoint's level, if any.
    #[serde(default)]
    pub pump: Option<PumpId>,
    /// Include the temperature channel in the poll plan.
    #[serde(default = "default_true")]
    pub read_temperature: bool,
    /// Last firmware version reported by the endpoint.
    #[serde(default)]
    pub firmware_version: Option<String>,
}

fn default_true() -> bool {
    true
}

// ── Alarms ────────────────────────────────────────────────────

/// Unit an alarm channel's bounds are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmUnit {
    /// The reading as reported by the endpoint.
    #[default]
    Raw,
    /// Tank volume in liters (level channels only).
    Liters,
    /// Tank volume in US gallons (level channels only).
    Gallons,
}

impl AlarmUnit {
    pub fn needs_tank(self) -> bool {
        !matches!(self, Self::Raw)
    }

    /// Stock approach margin for a level channel in this unit.
    pub fn default_level_margin(self) -> f64 {
        match self {
            Self::Raw => 50.0,
            Self::Liters => 2.0,
            Self::Gallons => 0.5,
        }
    }
}

/// Reservoir footprint used to convert a level into a volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TankDimensions {
    pub width_cm: f64,
    pub depth_cm: f64,
}

/// One monitored channel: an endpoint's quantity checked against bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmConfig {
    pub endpoint: EndpointId,
    pub quantity: Quantity,
    pub enabled: bool,
    pub min: f64,
    pub max: f64,
    /// Width of the approaching band inside each bound.
    pub margin: f64,
    #[serde(default)]
    pub unit: AlarmUnit,
    #[serde(default)]
    pub tank: Option<TankDimensions>,
}

// ── Runtime sections ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause between poll cycles of one endpoint.
    pub poll_interval_ms: u64,
    /// Watchdog period.
    pub watchdog_interval_ms: u64,
    /// Consecutive failed reconnects before an endpoint is disabled.
    pub reconnect_ceiling: u32,
    /// Time without reaching the off threshold before a keep-alive cycle.
    pub keep_alive_window_secs: u64,
    /// How long the pump stays off during a keep-alive cycle.
    pub keep_alive_off_secs: u64,
    /// How long the safety shutdown notice stays up.
    pub safety_notice_secs: u64,
    /// Half-period of alarm and pump flashes.
    pub flash_interval_ms: u64,
    /// Minimum time between two plays of the same cue on one channel.
    pub audio_min_interval_ms: u64,
    /// Debounce before a dirty config is written.
    pub auto_save_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 400,
            watchdog_interval_ms: 5_000,
            reconnect_ceiling: 5,
            keep_alive_window_secs: 10 * 60 * 60,
            keep_alive_off_secs: 4 * 60,
            safety_notice_secs: 10,
            flash_interval_ms: 500,
            audio_min_interval_ms: 2_000,
            auto_save_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub serial_baud: u32,
    /// Open, identify and probe timeout.
    pub timeout_ms: u64,
    /// Read timeout for level channels.
    pub level_read_timeout_ms: u64,
    /// Read timeout for pH / conductivity / TDS / salinity channels.
    pub chemistry_read_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            serial_baud: 9600,
            timeout_ms: 2_000,
            level_read_timeout_ms: 3_000,
            chemistry_read_timeout_ms: 4_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackend {
    /// Linux `/sys/class/gpio` lines.
    Sysfs,
    /// In-memory lines for bench runs without relays.
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub backend: GpioBackend,
    pub pump_a: u32,
    pub pump_b: u32,
    /// Relay that follows "any pump on".
    pub any_pump: u32,
    pub active_low: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: GpioBackend::Sysfs,
            pump_a: 4,
            pump_b: 27,
            any_pump: 17,
            active_low: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub player: String,
    pub player_args: Vec<String>,
    pub approaching_cue: PathBuf,
    pub critical_cue: PathBuf,
    /// Wait after SIGTERM before the player is killed.
    pub stop_grace_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            player: "aplay".into(),
            player_args: vec!["-q".into()],
            approaching_cue: PathBuf::from("MAIN/approaching_limit.wav"),
            critical_cue: PathBuf::from("MAIN/level_critical.wav"),
            stop_grace_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    /// Manifest location; empty disables update checks.
    pub manifest_url: String,
    /// Manifest key of this program's artifact.
    pub artifact_key: String,
    /// File to replace; defaults to the running executable.
    pub live_path: Option<PathBuf>,
    pub fetch_timeout_secs: u64,
    /// Unix time of the last completed manifest check.
    pub last_check_unix: Option<u64>,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            manifest_url: String::new(),
            artifact_key: "aquamon".into(),
            live_path: None,
            fetch_timeout_secs: 30,
            last_check_unix: None,
        }
    }
}

// ── Root ──────────────────────────────────────────────────────

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub alarms: Vec<AlarmConfig>,
    pub timing: TimingConfig,
    pub link: LinkConfig,
    pub gpio: GpioConfig,
    pub audio: AudioConfig,
    pub update: UpdateSettings,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let level = |letter, pump| EndpointConfig {
            id: EndpointId(letter),
            class: SensorClass::Level,
            transport: TransportSelection::Serial,
            tare_offset: 0.0,
            thresholds: Some(Thresholds {
                on: 315.0,
                off: 336.0,
            }),
            pump: Some(pump),
            read_temperature: true,
            firmware_version: None,
        };
        let probe = |letter, class, read_temperature| EndpointConfig {
            id: EndpointId(letter),
            class,
            transport: TransportSelection::Serial,
            tare_offset: 0.0,
            thresholds: None,
            pump: None,
            read_temperature,
            firmware_version: None,
        };

        Self {
            endpoints: vec![
                level('A', PumpId::A),
                level('B', PumpId::B),
                probe('C', SensorClass::RoTank, false),
                probe('D', SensorClass::Ph, true),
                probe('E', SensorClass::Tds, true),
            ],
            alarms: vec![
                AlarmConfig {
                    endpoint: EndpointId('C'),
                    quantity: Quantity::Level,
                    enabled: false,
                    min: 100.0,
                    max: 900.0,
                    margin: AlarmUnit::Raw.default_level_margin(),
                    unit: AlarmUnit::Raw,
                    tank: None,
                },
                AlarmConfig {
                    endpoint: EndpointId('D'),
                    quantity: Quantity::Ph,
                    enabled: false,
                    min: 6.0,
                    max: 8.5,
                    margin: 0.5,
                    unit: AlarmUnit::Raw,
                    tank: None,
                },
                AlarmConfig {
                    endpoint: EndpointId('E'),
                    quantity: Quantity::Tds,
                    enabled: false,
                    min: 0.0,
                    max: 50.0,
                    margin: 0.5,
                    unit: AlarmUnit::Raw,
                    tank: None,
                },
            ],
            timing: TimingConfig::default(),
            link: LinkConfig::default(),
            gpio: GpioConfig::default(),
            audio: AudioConfig::default(),
            update: UpdateSettings::default(),
        }
    }
}

impl SystemConfig {
    pub fn endpoint(&self, id: EndpointId) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn endpoint_mut(&mut self, id: EndpointId) -> Option<&mut EndpointConfig> {
        self.endpoints.iter_mut().find(|e| e.id == id)
    }

    /// The endpoint whose level drives `pump`.
    pub fn pump_endpoint(&self, pump: PumpId) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.pump == Some(pump))
    }

    pub fn alarm(&self, endpoint: EndpointId, quantity: Quantity) -> Option<&AlarmConfig> {
        self.alarms
            .iter()
            .find(|a| a.endpoint == endpoint && a.quantity == quantity)
    }

    /// Check every rule the control engines rely on.
    ///
    /// Reports the first violation found; invalid values are rejected,
    /// never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, ep) in self.endpoints.iter().enumerate() {
            if !ep.id.letter().is_ascii_uppercase() {
                return Err(ConfigError::ValidationFailed(
                    "endpoint id must be a single uppercase letter",
                ));
            }
            if self.endpoints[..i].iter().any(|other| other.id == ep.id) {
                return Err(ConfigError::ValidationFailed("endpoint ids must be unique"));
            }
            if let TransportSelection::Network { host, port } = &ep.transport {
                if host.trim().is_empty() {
                    return Err(ConfigError::ValidationFailed(
                        "network endpoint host must not be empty",
                    ));
                }
                if *port == 0 {
                    return Err(ConfigError::ValidationFailed(
                        "network endpoint port must be non-zero",
                    ));
                }
            }
            if !ep.tare_offset.is_finite() {
                return Err(ConfigError::ValidationFailed("tare_offset must be finite"));
            }
            if let Some(t) = ep.thresholds {
                if !(t.on.is_finite() && t.off.is_finite()) {
                    return Err(ConfigError::ValidationFailed("thresholds must be finite"));
                }
                if t.on >= t.off {
                    return Err(ConfigError::ValidationFailed(
                        "threshold on must be < threshold off",
                    ));
                }
            }
            if let Some(pump) = ep.pump {
                if ep.thresholds.is_none() {
                    return Err(ConfigError::ValidationFailed(
                        "an endpoint driving a pump needs thresholds",
                    ));
                }
                if self.endpoints[..i].iter().any(|other| other.pump == Some(pump)) {
                    return Err(ConfigError::ValidationFailed(
                        "each pump can be driven by one endpoint only",
                    ));
                }
            }
        }

        for alarm in &self.alarms {
            if self.endpoint(alarm.endpoint).is_none() {
                return Err(ConfigError::ValidationFailed(
                    "alarm refers to an unknown endpoint",
                ));
            }
            if !alarm.enabled {
                continue;
            }
            if !(alarm.min.is_finite() && alarm.max.is_finite()) || alarm.min >= alarm.max {
                return Err(ConfigError::ValidationFailed("alarm min must be < alarm max"));
            }
            if !alarm.margin.is_finite() || alarm.margin < 0.0 {
                return Err(ConfigError::ValidationFailed("alarm margin must be >= 0"));
            }
            if alarm.unit.needs_tank() {
                if alarm.quantity != Quantity::Level {
                    return Err(ConfigError::ValidationFailed(
                        "volume units apply to level channels only",
                    ));
                }
                match alarm.tank {
                    Some(t) if t.width_cm > 0.0 && t.depth_cm > 0.0 => {}
                    _ => {
                        return Err(ConfigError::ValidationFailed(
                            "tank width and depth are required for volume units",
                        ));
                    }
                }
            }
        }

        let t = &self.timing;
        if t.poll_interval_ms == 0 || t.watchdog_interval_ms == 0 || t.flash_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("timing intervals must be non-zero"));
        }
        if t.reconnect_ceiling == 0 {
            return Err(ConfigError::ValidationFailed("reconnect_ceiling must be >= 1"));
        }
        if t.keep_alive_window_secs == 0 || t.keep_alive_off_secs == 0 {
            return Err(ConfigError::ValidationFailed("keep-alive timings must be non-zero"));
        }
        if self.link.timeout_ms == 0 || self.link.serial_baud == 0 {
            return Err(ConfigError::ValidationFailed("link timeout and baud must be non-zero"));
        }
        Ok(())
    }
}
