//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AppService (domain)
//! ```
//!
//! Driven adapters (relays, audio, event sinks, settings storage) implement
//! these traits.  The [`AppService`](super::service::AppService) consumes
//! them via generics, so the control engines never touch hardware directly.
//!
//! Endpoint I/O does not pass through here: it lives on the polling threads
//! and reaches the service as [`CoreMsg`](crate::events::CoreMsg)s.

use std::path::Path;

use crate::config::{PumpId, SystemConfig};
use crate::error::HardwareError;

// ───────────────────────────────────────────────────────────────
// Relay port (driven adapter: domain → GPIO)
// ───────────────────────────────────────────────────────────────

/// A relay output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relay {
    Pump(PumpId),
    /// Aux indicator, on while either pump runs.
    AnyPump,
}

/// Write-side port for the relay bank.
pub trait RelayPort {
    fn set_relay(&mut self, relay: Relay, on: bool) -> Result<(), HardwareError>;
}

// ───────────────────────────────────────────────────────────────
// Audio port (driven adapter: domain → external player)
// ───────────────────────────────────────────────────────────────

pub trait AudioPort {
    /// Play `cue`.  Playing the cue that is already playing is a no-op;
    /// any other cue preempts it.
    fn play(&mut self, cue: &Path) -> Result<(), HardwareError>;

    /// Stop whatever is playing.
    fn stop(&mut self) -> Result<(), HardwareError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / presentation)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (log lines, a
/// display, a test recorder).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ settings file)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST call [`SystemConfig::validate`] before persisting
/// and reject invalid values with [`ConfigError::ValidationFailed`] rather
/// than clamping them.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`ConfigError::NotFound`] if nothing is stored yet.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Clock port (driven adapter: monotonic time source)
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds for timers and the auto-save delay.
pub trait ClockPort {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Settings load/save failures and validation results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No settings file yet (first start).
    NotFound,
    /// The settings file is not valid JSON for [`SystemConfig`].
    Corrupted,
    /// A config field failed validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// The settings volume is full.
    StorageFull,
    /// Any other filesystem error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}
