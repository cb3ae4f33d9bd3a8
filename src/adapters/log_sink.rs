//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the process logger.  A panel or web adapter would implement the same
//! trait.

use log::{debug, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::drivers::flash::Hex;

/// Adapter that logs every [`AppEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started => info!("START | core running"),
            AppEvent::Connected {
                endpoint,
                transport,
                firmware,
            } => info!(
                "LINK  | {} connected via {} (fw {})",
                endpoint,
                transport,
                firmware.as_deref().unwrap_or("?")
            ),
            AppEvent::Disconnected { endpoint } => info!("LINK  | {} disconnected", endpoint),
            AppEvent::Disabled { endpoint, attempts } => {
                warn!("LINK  | {} disabled after {} attempts", endpoint, attempts);
            }
            AppEvent::Reading {
                endpoint,
                reading,
                tared,
            } => match (reading.value, tared) {
                (Some(_), Some(t)) => debug!(
                    "READ  | {} {:?}={} (tared {:.1} {})",
                    endpoint,
                    reading.quantity,
                    reading.raw,
                    t,
                    reading.quantity.unit()
                ),
                (Some(_), None) => debug!("READ  | {} {:?}={}", endpoint, reading.quantity, reading.raw),
                (None, _) => debug!(
                    "READ  | {} {:?} invalid reply {:?}",
                    endpoint, reading.quantity, reading.raw
                ),
            },
            AppEvent::PumpStateChanged { pump, on } => {
                info!("PUMP  | {} {}", pump, if *on { "ON" } else { "OFF" });
            }
            AppEvent::AutoModeChanged { pump, auto } => {
                info!("PUMP  | {} auto={}", pump, auto);
            }
            AppEvent::OverrideChanged { pump, active } => {
                info!("PUMP  | {} override={}", pump, active);
            }
            AppEvent::PumpNotice { pump, notice } => match notice {
                Some(n) => info!("PUMP  | {} notice: {}", pump, n.as_str()),
                None => debug!("PUMP  | {} notice cleared", pump),
            },
            AppEvent::AlarmStateChanged(t) => info!(
                "ALARM | {} {:?}: {:?} -> {:?}",
                t.endpoint, t.quantity, t.from, t.to
            ),
            AppEvent::FlashFrame(frame) => {
                debug!("FLASH | {} {:?} {}", frame.target, frame.style, Hex(frame.colour));
            }
            AppEvent::FlashStopped(target) => debug!("FLASH | {} stopped", target),
            AppEvent::Display { endpoint, text } => info!("PANEL | {}: {}", endpoint, text),
            AppEvent::TareApplied { endpoint, offset } => {
                info!("TARE  | {} offset {:.2}", endpoint, offset);
            }
            AppEvent::ConfigRejected(e) => warn!("CONFIG| rejected: {}", e),
            AppEvent::HardwareFault(e) => warn!("FAULT | {}", e),
        }
    }
}
