//! Relay bank: two pump outputs plus the "any pump on" indicator.
//!
//! Dumb actuator.  Interlocks live in the pump engine; this driver only
//! maps logical on/off to pin levels (honouring `active_low`) and reports
//! write failures as [`HardwareError::GpioWrite`].

use embedded_hal::digital::{Error as _, OutputPin, PinState};

use crate::app::ports::{Relay, RelayPort};
use crate::config::PumpId;
use crate::error::HardwareError;

struct RelayLine<P> {
    pin: P,
    line: u32,
    on: bool,
}

pub struct RelayBank<P: OutputPin> {
    pump_a: RelayLine<P>,
    pump_b: RelayLine<P>,
    any_pump: RelayLine<P>,
    active_low: bool,
}

impl<P: OutputPin> RelayBank<P> {
    /// Pins are given as `(pin, line number)`; the line number only labels
    /// errors.
    pub fn new(pump_a: (P, u32), pump_b: (P, u32), any_pump: (P, u32), active_low: bool) -> Self {
        let line = |(pin, line): (P, u32)| RelayLine {
            pin,
            line,
            on: false,
        };
        Self {
            pump_a: line(pump_a),
            pump_b: line(pump_b),
            any_pump: line(any_pump),
            active_low,
        }
    }

    fn line_mut(&mut self, relay: Relay) -> &mut RelayLine<P> {
        match relay {
            Relay::Pump(PumpId::A) => &mut self.pump_a,
            Relay::Pump(PumpId::B) => &mut self.pump_b,
            Relay::AnyPump => &mut self.any_pump,
        }
    }

    /// Last level successfully written.
    pub fn is_on(&self, relay: Relay) -> bool {
        match relay {
            Relay::Pump(PumpId::A) => self.pump_a.on,
            Relay::Pump(PumpId::B) => self.pump_b.on,
            Relay::AnyPump => self.any_pump.on,
        }
    }

    /// Drive every line to off, continuing past failures.
    pub fn all_off(&mut self) -> Result<(), HardwareError> {
        let mut first = Ok(());
        for relay in [Relay::Pump(PumpId::A), Relay::Pump(PumpId::B), Relay::AnyPump] {
            if let Err(e) = self.set_relay(relay, false) {
                if first.is_ok() {
                    first = Err(e);
                }
            }
        }
        first
    }
}

impl<P: OutputPin> RelayPort for RelayBank<P> {
    fn set_relay(&mut self, relay: Relay, on: bool) -> Result<(), HardwareError> {
        let level = PinState::from(on != self.active_low);
        let line = self.line_mut(relay);
        line.pin
            .set_state(level)
            .map_err(|e| HardwareError::GpioWrite {
                line: line.line,
                detail: format!("{:?}", e.kind()),
            })?;
        line.on = on;
        Ok(())
    }
}
