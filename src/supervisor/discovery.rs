//! Linear scan-and-probe discovery.
//!
//! A candidate transport is accepted for an endpoint only after it
//! 1. answers the identify command with the endpoint's letter, and
//! 2. gives a non-empty reply to the probe command for its sensor class.
//!
//! The firmware version is then queried once for display.

use std::time::Duration;

use log::{debug, info};

use crate::codec::{self, Command};
use crate::config::{EndpointId, SensorClass};
use crate::error::{Error, ProtocolError, TransportError};
use crate::link::serial;
use crate::link::session::{run_exchange, Exchange};
use crate::link::tcp;
use crate::link::Transport;

/// Opens candidate transports.  Swapped for a fake in tests.
pub trait Connector: Send + Sync {
    fn open_network(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, TransportError>;

    /// Serial device paths available right now.
    fn serial_ports(&self) -> Vec<String>;

    fn open_serial(&self, path: &str) -> Result<Box<dyn Transport>, TransportError>;

    /// Bound on identify, probe and firmware replies.
    fn reply_timeout(&self) -> Duration;
}

/// Real serial ports and TCP sockets.
pub struct SystemConnector {
    baud: u32,
    timeout: Duration,
}

impl SystemConnector {
    pub fn new(baud: u32, timeout: Duration) -> Self {
        Self { baud, timeout }
    }
}

impl Connector for SystemConnector {
    fn open_network(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(tcp::connect(host, port, self.timeout)?))
    }

    fn serial_ports(&self) -> Vec<String> {
        serial::available_ports()
    }

    fn open_serial(&self, path: &str) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(serial::open(path, self.baud, self.timeout)?))
    }

    fn reply_timeout(&self) -> Duration {
        self.timeout
    }
}

/// A transport that passed identify and probe.
pub struct Candidate {
    pub transport: Box<dyn Transport>,
    pub firmware: Option<String>,
}

/// Ask the transport which endpoint it is.
pub fn identify(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<Option<EndpointId>, TransportError> {
    let reply = run_exchange(transport, &Command::Identify.token(), Exchange::new(timeout))?;
    Ok(reply.as_deref().and_then(codec::decode_reply).and_then(EndpointId::parse))
}

/// Probe the class channel and fetch the firmware version.
pub fn confirm(
    transport: &mut dyn Transport,
    id: EndpointId,
    class: SensorClass,
    timeout: Duration,
) -> Result<Option<String>, Error> {
    let probe = Command::probe_for(class);
    let reply = run_exchange(transport, &probe.token(), Exchange::new(timeout))?;
    if reply.as_deref().and_then(codec::decode_reply).is_none() {
        return Err(ProtocolError::NoReply(probe.name()).into());
    }
    let firmware = run_exchange(transport, &Command::FirmwareVersion.token(), Exchange::new(timeout))?
        .and_then(|raw| codec::parse_firmware(&raw, id));
    Ok(firmware)
}

/// Full acceptance test of one freshly opened transport.
pub fn accept(
    mut transport: Box<dyn Transport>,
    id: EndpointId,
    class: SensorClass,
    timeout: Duration,
) -> Result<Candidate, Error> {
    match identify(transport.as_mut(), timeout)? {
        Some(got) if got == id => {}
        other => {
            return Err(ProtocolError::IdentityMismatch {
                expected: id.letter(),
                got: other.map(|o| o.to_string()).unwrap_or_default(),
            }
            .into());
        }
    }
    let firmware = confirm(transport.as_mut(), id, class, timeout)?;
    Ok(Candidate {
        transport,
        firmware,
    })
}

/// Try the configured network endpoint.
pub fn try_network(
    connector: &dyn Connector,
    id: EndpointId,
    class: SensorClass,
    host: &str,
    port: u16,
) -> Result<Candidate, Error> {
    let transport = connector.open_network(host, port)?;
    let candidate = accept(transport, id, class, connector.reply_timeout())?;
    info!("Discovery: {} found at {}:{}", id, host, port);
    Ok(candidate)
}

/// One pass over the unclaimed serial ports, matching any of `wanted`.
///
/// Each port is opened once; its identify reply decides which endpoint
/// (if any) it belongs to.
pub fn scan_serial(
    connector: &dyn Connector,
    wanted: &[(EndpointId, SensorClass)],
    claimed: &[String],
) -> Vec<(EndpointId, Candidate)> {
    let timeout = connector.reply_timeout();
    let mut found: Vec<(EndpointId, Candidate)> = Vec::new();

    for path in connector.serial_ports() {
        if found.len() == wanted.len() {
            break;
        }
        if claimed.iter().any(|c| *c == path) {
            continue;
        }
        let mut transport = match connector.open_serial(&path) {
            Ok(t) => t,
            Err(e) => {
                debug!("Discovery: skip {}: {}", path, e);
                continue;
            }
        };
        let id = match identify(transport.as_mut(), timeout) {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("Discovery: {} did not identify", path);
                continue;
            }
            Err(e) => {
                debug!("Discovery: {} identify failed: {}", path, e);
                continue;
            }
        };
        let Some(&(_, class)) = wanted.iter().find(|(w, _)| *w == id) else {
            debug!("Discovery: {} is endpoint {}, not wanted", path, id);
            continue;
        };
        if found.iter().any(|(f, _)| *f == id) {
            continue;
        }
        match confirm(transport.as_mut(), id, class, timeout) {
            Ok(firmware) => {
                info!("Discovery: {} found on {}", id, path);
                found.push((
                    id,
                    Candidate {
                        transport,
                        firmware,
                    },
                ));
            }
            Err(e) => debug!("Discovery: {} on {} failed probe: {}", id, path, e),
        }
    }
    found
}
