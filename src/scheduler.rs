//! One-shot timer queue for the application loop.
//!
//! Everything that must happen "later" on the application queue goes
//! through here: keep-alive restores, notice expiry and flash ticks.  The
//! owning component keeps the returned [`TimerId`] and cancels it when the
//! callback is no longer wanted, so a stale timer can never fire into a
//! newer state.
//!
//! ```text
//!  PumpEngine ──schedule──▶ ┌────────────┐ ──pop_due(now)──▶ AppService
//!  Flasher    ──cancel────▶ │ TimerQueue │
//!                           └────────────┘
//!                 next_due() ─▶ recv_timeout(deadline)
//! ```

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::config::PumpId;
use crate::drivers::flash::FlashTarget;

/// Handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What to do when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// End of a keep-alive off period.
    KeepAliveRestore(PumpId),
    /// Expire the pump's current notice.
    ClearPumpNotice(PumpId),
    /// Advance a flash to its next phase.
    FlashTick(FlashTarget),
}

/// Timers ordered by deadline (ms on the service clock), ties broken by
/// scheduling order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    due: BTreeMap<(u64, TimerId), TimerKind>,
    index: HashMap<TimerId, u64>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at_ms: u64, kind: TimerKind) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.due.insert((at_ms, id), kind);
        self.index.insert(id, at_ms);
        debug!("Timers: {:?} scheduled for t={}ms", kind, at_ms);
        id
    }

    /// Cancel a timer.  Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.index.remove(&id) {
            Some(at) => self.due.remove(&(at, id)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.index.contains_key(&id)
    }

    /// Earliest pending deadline.
    pub fn next_due(&self) -> Option<u64> {
        self.due.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return the earliest timer due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<(TimerId, TimerKind)> {
        let (&(at, id), _) = self.due.iter().next()?;
        if at > now_ms {
            return None;
        }
        self.index.remove(&id);
        self.due.remove(&(at, id)).map(|kind| (id, kind))
    }

    pub fn len(&self) -> usize {
        self.due.len()
    }

    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }
}
