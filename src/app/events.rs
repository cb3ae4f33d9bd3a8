//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log lines, a panel display, a test
//! recorder.

use crate::codec::Reading;
use crate::config::{EndpointId, PumpId};
use crate::control::alarm::AlarmTransition;
use crate::control::pump::PumpNotice;
use crate::drivers::flash::{FlashFrame, FlashTarget};
use crate::error::HardwareError;

use super::ports::ConfigError;

/// Structured events emitted by the application core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The application service has started.
    Started,

    /// An endpoint passed discovery.
    Connected {
        endpoint: EndpointId,
        transport: String,
        firmware: Option<String>,
    },

    /// An endpoint's link dropped; the watchdog will retry it.
    Disconnected { endpoint: EndpointId },

    /// An endpoint hit the reconnect ceiling.
    Disabled { endpoint: EndpointId, attempts: u32 },

    /// One reply from a poll cycle.  `tared` is set for valid level readings.
    Reading {
        endpoint: EndpointId,
        reading: Reading,
        tared: Option<f64>,
    },

    PumpStateChanged { pump: PumpId, on: bool },

    AutoModeChanged { pump: PumpId, auto: bool },

    OverrideChanged { pump: PumpId, active: bool },

    /// A pump's status notice changed (`None` = cleared).
    PumpNotice {
        pump: PumpId,
        notice: Option<PumpNotice>,
    },

    AlarmStateChanged(AlarmTransition),

    /// An indicator's colour for the current flash phase.
    FlashFrame(FlashFrame),

    FlashStopped(FlashTarget),

    /// Replace an endpoint's status line.
    Display { endpoint: EndpointId, text: String },

    TareApplied { endpoint: EndpointId, offset: f64 },

    /// A config update failed validation and was discarded.
    ConfigRejected(ConfigError),

    /// A relay or audio operation failed.  Logical state is unchanged.
    HardwareFault(HardwareError),
}
