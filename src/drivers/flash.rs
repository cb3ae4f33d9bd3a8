//! Two-phase flash engine for pump and alarm indicators.
//!
//! Each flashing indicator alternates between a base and an alternate
//! colour every `interval_ms`.  The phase is advanced by a
//! [`TimerKind::FlashTick`] timer; the rendered colour is a pure function
//! of style and phase, see [`shade`].
//!
//! | Style      | Base    | Alternate | Used for                 |
//! |-----------|---------|-----------|--------------------------|
//! | AutoTopUp  | red     | green     | pump filling in auto     |
//! | Approaching| orange  | #CC8400   | alarm near limit         |
//! | Critical   | red     | #A52A2A   | alarm at/over limit      |

use std::collections::HashMap;
use std::fmt;

use crate::codec::Quantity;
use crate::config::{EndpointId, PumpId};
use crate::scheduler::{TimerId, TimerKind, TimerQueue};

/// Colour as (R, G, B), each 0–255.
pub type Rgb = (u8, u8, u8);

pub const COLOUR_RED: Rgb = (255, 0, 0);
pub const COLOUR_GREEN: Rgb = (0, 128, 0);
pub const COLOUR_ORANGE: Rgb = (255, 165, 0);
pub const COLOUR_DARK_ORANGE: Rgb = (0xCC, 0x84, 0x00);
pub const COLOUR_BROWN: Rgb = (0xA5, 0x2A, 0x2A);

/// Hex form used in logs and display hooks.
pub struct Hex(pub Rgb);

impl fmt::Display for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (r, g, b) = self.0;
        write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
    }
}

/// Which indicator is flashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashTarget {
    Pump(PumpId),
    Alarm(EndpointId, Quantity),
}

impl fmt::Display for FlashTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pump(p) => write!(f, "pump {}", p),
            Self::Alarm(ep, q) => write!(f, "{} {:?}", ep, q),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStyle {
    AutoTopUp,
    Approaching,
    Critical,
}

/// Colour of `style` in the given phase (`false` = base).
pub fn shade(style: FlashStyle, alternate: bool) -> Rgb {
    match (style, alternate) {
        (FlashStyle::AutoTopUp, false) => COLOUR_RED,
        (FlashStyle::AutoTopUp, true) => COLOUR_GREEN,
        (FlashStyle::Approaching, false) => COLOUR_ORANGE,
        (FlashStyle::Approaching, true) => COLOUR_DARK_ORANGE,
        (FlashStyle::Critical, false) => COLOUR_RED,
        (FlashStyle::Critical, true) => COLOUR_BROWN,
    }
}

/// One rendered step of a flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashFrame {
    pub target: FlashTarget,
    pub style: FlashStyle,
    pub colour: Rgb,
}

#[derive(Debug)]
struct FlashEntry {
    style: FlashStyle,
    alternate: bool,
    timer: TimerId,
}

/// Running flashes keyed by target.  At most one per target.
#[derive(Debug)]
pub struct Flasher {
    entries: HashMap<FlashTarget, FlashEntry>,
    interval_ms: u64,
}

impl Flasher {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            interval_ms,
        }
    }

    /// New phase length; running flashes pick it up at their next tick.
    pub fn set_interval(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    /// Start (or restart) a flash and return its first frame.  Any flash
    /// already running on the target is cancelled first.
    pub fn start(
        &mut self,
        target: FlashTarget,
        style: FlashStyle,
        now_ms: u64,
        timers: &mut TimerQueue,
    ) -> FlashFrame {
        self.stop(target, timers);
        let timer = timers.schedule(now_ms + self.interval_ms, TimerKind::FlashTick(target));
        self.entries.insert(
            target,
            FlashEntry {
                style,
                alternate: false,
                timer,
            },
        );
        FlashFrame {
            target,
            style,
            colour: shade(style, false),
        }
    }

    /// Stop a flash.  Returns `false` if none was running.
    pub fn stop(&mut self, target: FlashTarget, timers: &mut TimerQueue) -> bool {
        match self.entries.remove(&target) {
            Some(entry) => {
                timers.cancel(entry.timer);
                true
            }
            None => false,
        }
    }

    /// Advance the flash whose timer `fired`.  Stale timers are ignored.
    pub fn tick(
        &mut self,
        target: FlashTarget,
        fired: TimerId,
        now_ms: u64,
        timers: &mut TimerQueue,
    ) -> Option<FlashFrame> {
        let entry = self.entries.get_mut(&target)?;
        if entry.timer != fired {
            return None;
        }
        entry.alternate = !entry.alternate;
        entry.timer = timers.schedule(now_ms + self.interval_ms, TimerKind::FlashTick(target));
        Some(FlashFrame {
            target,
            style: entry.style,
            colour: shade(entry.style, entry.alternate),
        })
    }

    pub fn style(&self, target: FlashTarget) -> Option<FlashStyle> {
        self.entries.get(&target).map(|e| e.style)
    }

    pub fn is_flashing(&self, target: FlashTarget) -> bool {
        self.entries.contains_key(&target)
    }

    pub fn active_count(&self) -> usize {
        self.entries.len()
    }
}
