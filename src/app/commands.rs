//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (console,
//! settings dialog, update checker) that the
//! [`AppService`](super::service::AppService) interprets and acts upon.
//! Commands that need endpoint I/O are resolved before they get here:
//! `ApplyTare` already carries the raw reading.

use crate::config::{EndpointId, PumpId, SystemConfig, TransportSelection};

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Flip a pump.  Switching off this way disables auto mode.
    TogglePump(PumpId),

    /// Force a pump on or off.  Off disables auto mode.
    SetPump { pump: PumpId, on: bool },

    SetAutoMode { pump: PumpId, auto: bool },

    /// Hold the pump in its current state until the level drops below `on`.
    SetOverride { pump: PumpId, active: bool },

    /// Zero a level endpoint at `raw` (offset = −raw).  `None` uses the
    /// most recent reading.
    ApplyTare { endpoint: EndpointId, raw: Option<f64> },

    ClearTare { endpoint: EndpointId },

    /// Replace configuration; rejected unless it validates.
    UpdateConfig(Box<SystemConfig>),

    /// Persist the current config on the next save check.
    SaveConfig,

    /// Record a new transport selection for an endpoint.
    SetTransport {
        endpoint: EndpointId,
        selection: TransportSelection,
    },

    /// Record the time of a completed update check (unix seconds).
    RecordUpdateCheck(u64),
}
