//! Per-endpoint polling loop.
//!
//! Runs on its own thread while the endpoint's `running` flag is set.  The
//! flag is checked before every exchange; a stop never interrupts an
//! exchange already on the wire.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use super::endpoint::EndpointRecord;
use crate::codec::{Quantity, Reading};
use crate::config::{LinkConfig, SensorClass};
use crate::events::{CoreMsg, CoreSender};
use crate::link::Exchange;

/// One read in a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStep {
    pub quantity: Quantity,
    pub exchange: Exchange,
}

/// Reads issued each cycle for a sensor class, in order.
pub fn poll_plan(class: SensorClass, read_temperature: bool, link: &LinkConfig) -> Vec<PollStep> {
    let short = Duration::from_millis(link.timeout_ms);
    let level = Duration::from_millis(link.level_read_timeout_ms);
    let chemistry = Duration::from_millis(link.chemistry_read_timeout_ms);
    let step = |quantity, exchange| PollStep { quantity, exchange };

    let temperature_settle = match class {
        SensorClass::Level | SensorClass::RoTank => Duration::from_millis(100),
        SensorClass::Ph | SensorClass::Tds => Duration::from_millis(200),
    };

    let mut plan = Vec::with_capacity(4);
    if read_temperature {
        plan.push(step(
            Quantity::Temperature,
            Exchange::new(short).with_settle(temperature_settle),
        ));
    }
    match class {
        SensorClass::Level | SensorClass::RoTank => {
            plan.push(step(Quantity::Level, Exchange::new(level)));
        }
        SensorClass::Ph => plan.push(step(Quantity::Ph, Exchange::new(chemistry))),
        SensorClass::Tds => {
            for q in [Quantity::Conductivity, Quantity::Tds, Quantity::Salinity] {
                plan.push(step(q, Exchange::new(chemistry)));
            }
        }
    }
    plan
}

/// Body of the polling thread.
pub(crate) fn run(record: Arc<EndpointRecord>, plan: Vec<PollStep>, interval: Duration, queue: CoreSender) {
    let id = record.id;
    info!("Poller {}: started ({} reads per cycle)", id, plan.len());

    'cycle: while record.is_running() {
        let mut readings = Vec::with_capacity(plan.len());
        for step in &plan {
            if !record.is_running() {
                break 'cycle;
            }
            match record
                .session
                .exchange(&step.quantity.read_command().token(), step.exchange)
            {
                Ok(reply) => readings.push(Reading::from_reply(step.quantity, reply.unwrap_or_default())),
                Err(e) => {
                    warn!("Poller {}: transport error: {}", id, e);
                    if record.mark_disconnected() {
                        queue.send(CoreMsg::Disconnected { endpoint: id });
                    }
                    return;
                }
            }
        }

        if !queue.send(CoreMsg::Readings {
            endpoint: id,
            readings,
        }) {
            record.set_running(false);
            break;
        }
        sleep_while_running(&record, interval);
    }
    info!("Poller {}: stopped", id);
}

fn sleep_while_running(record: &EndpointRecord, interval: Duration) {
    let deadline = Instant::now() + interval;
    let slice = Duration::from_millis(50);
    while record.is_running() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(slice));
    }
}
