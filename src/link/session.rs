//! Link session: one transport, one exchange in flight.
//!
//! ```text
//!   lock ─▶ drain ─▶ write ─▶ settle ─▶ read line ─▶ drain ─▶ unlock
//! ```
//!
//! The drain before the write drops a late reply left over from the
//! previous exchange, so it cannot be taken as this command's answer.
//! The drain after the read drops extra lines from devices that answer
//! twice.
//!
//! The same lock also guards the endpoint status `S` that the supervisor
//! keeps next to the transport.  Reconnects and polls therefore serialise
//! on one mutex.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, trace};
use parking_lot::Mutex;

use super::transport::Transport;
use crate::error::TransportError;

/// Timing of one request/response pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    /// Pause between write and read for channels that need device-side settling.
    pub settle: Duration,
    /// Bound on the reply read.
    pub timeout: Duration,
}

impl Exchange {
    pub const fn new(timeout: Duration) -> Self {
        Self {
            settle: Duration::ZERO,
            timeout,
        }
    }

    pub const fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// Run one exchange on a transport the caller already holds exclusively.
///
/// `Ok(None)` is a timeout.  A non-empty reply is trimmed of the line ending.
pub fn run_exchange(
    transport: &mut dyn Transport,
    line: &str,
    exchange: Exchange,
) -> Result<Option<String>, TransportError> {
    let stale = transport.discard_pending()?;
    if stale > 0 {
        debug!("{}: dropped {} stale bytes before {:?}", transport.label(), stale, line);
    }
    transport.write_line(line)?;
    if !exchange.settle.is_zero() {
        thread::sleep(exchange.settle);
    }
    let reply = transport.read_line(exchange.timeout)?;
    let trailing = transport.discard_pending()?;
    if trailing > 0 {
        debug!("{}: dropped {} trailing bytes after {:?}", transport.label(), trailing, line);
    }
    trace!("{}: {:?} -> {:?}", transport.label(), line, reply);
    Ok(reply.map(|r| r.trim_end().to_owned()))
}

/// Counters kept per session for diagnostics.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub exchanges: AtomicU64,
    pub timeouts: AtomicU64,
    pub errors: AtomicU64,
}

/// Snapshot of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub exchanges: u64,
    pub timeouts: u64,
    pub errors: u64,
}

struct Slot<S> {
    transport: Option<Box<dyn Transport>>,
    status: S,
}

/// Exclusive owner of one endpoint's transport and status.
pub struct LinkSession<S> {
    slot: Mutex<Slot<S>>,
    stats: SessionStats,
}

impl<S> LinkSession<S> {
    pub fn new(status: S) -> Self {
        Self {
            slot: Mutex::new(Slot {
                transport: None,
                status,
            }),
            stats: SessionStats::default(),
        }
    }

    /// One exchange under the session lock, reporting transport failures.
    pub fn exchange(&self, line: &str, exchange: Exchange) -> Result<Option<String>, TransportError> {
        let mut slot = self.slot.lock();
        let transport = slot.transport.as_mut().ok_or(TransportError::NotAttached)?;
        self.stats.exchanges.fetch_add(1, Ordering::Relaxed);
        match run_exchange(transport.as_mut(), line, exchange) {
            Ok(None) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Reply text, or an empty string on timeout or any failure.
    pub fn query(&self, line: &str, exchange: Exchange) -> String {
        match self.exchange(line, exchange) {
            Ok(Some(reply)) => reply,
            Ok(None) => String::new(),
            Err(e) => {
                debug!("Session: {:?} failed: {}", line, e);
                String::new()
            }
        }
    }

    /// Install a live transport, replacing (and dropping) any previous one.
    pub fn attach(&self, transport: Box<dyn Transport>, update: impl FnOnce(&mut S, &dyn Transport)) {
        let mut slot = self.slot.lock();
        update(&mut slot.status, transport.as_ref());
        slot.transport = Some(transport);
    }

    /// Remove the live transport; the caller decides whether to drop it.
    pub fn detach(&self, update: impl FnOnce(&mut S)) -> Option<Box<dyn Transport>> {
        let mut slot = self.slot.lock();
        update(&mut slot.status);
        slot.transport.take()
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().transport.is_some()
    }

    /// Read or mutate the status under the session lock.
    pub fn with_status<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.slot.lock().status)
    }

    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            exchanges: self.stats.exchanges.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }
}

impl<S: Clone> LinkSession<S> {
    pub fn status(&self) -> S {
        self.slot.lock().status.clone()
    }
}
