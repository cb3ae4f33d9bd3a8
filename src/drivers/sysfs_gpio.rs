//! GPIO output pins: Linux sysfs and an in-memory simulation.
//!
//! Both implement the `embedded-hal` 1.0 [`OutputPin`] trait so the relay
//! bank is backend-agnostic.  [`GpioPin`] picks the backend at runtime from
//! [`GpioConfig`](crate::config::GpioConfig).

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin};
use log::debug;

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// I/O failure on a sysfs attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsError {
    pub line: u32,
    pub kind: io::ErrorKind,
}

impl digital::Error for SysfsError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl core::fmt::Display for SysfsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "gpio{}: {}", self.line, self.kind)
    }
}

// ── Sysfs backend ─────────────────────────────────────────────

#[derive(Debug)]
pub struct SysfsPin {
    line: u32,
    value: PathBuf,
}

impl SysfsPin {
    pub fn open(line: u32) -> io::Result<Self> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), line)
    }

    /// Export `line` under `root` (if needed) and configure it as an output.
    pub fn open_at(root: &Path, line: u32) -> io::Result<Self> {
        let dir = root.join(format!("gpio{}", line));
        if !dir.exists() {
            fs::write(root.join("export"), line.to_string())?;
            // udev needs a moment to fix permissions on the new node.
            for _ in 0..10 {
                if dir.join("direction").exists() {
                    break;
                }
                thread::sleep(Duration::from_millis(20));
            }
        }
        fs::write(dir.join("direction"), "out")?;
        debug!("GPIO: line {} exported as output", line);
        Ok(Self {
            line,
            value: dir.join("value"),
        })
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    fn write_level(&mut self, high: bool) -> Result<(), SysfsError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.value)
            .map_err(|e| self.err(e))?;
        file.write_all(if high { b"1" } else { b"0" })
            .map_err(|e| self.err(e))
    }

    fn err(&self, e: io::Error) -> SysfsError {
        SysfsError {
            line: self.line,
            kind: e.kind(),
        }
    }
}

impl ErrorType for SysfsPin {
    type Error = SysfsError;
}

impl OutputPin for SysfsPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write_level(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write_level(true)
    }
}

// ── Simulated backend ─────────────────────────────────────────

/// Pin that only remembers its level.  Used off-target and in tests.
#[derive(Debug, Default)]
pub struct SimulatedPin {
    pub line: u32,
    pub high: bool,
}

impl SimulatedPin {
    pub fn new(line: u32) -> Self {
        Self { line, high: false }
    }
}

impl ErrorType for SimulatedPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for SimulatedPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }
}

// ── Runtime-selected backend ──────────────────────────────────

#[derive(Debug)]
pub enum GpioPin {
    Sysfs(SysfsPin),
    Simulated(SimulatedPin),
}

impl ErrorType for GpioPin {
    type Error = SysfsError;
}

impl OutputPin for GpioPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        match self {
            Self::Sysfs(p) => p.set_low(),
            Self::Simulated(p) => {
                p.high = false;
                Ok(())
            }
        }
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        match self {
            Self::Sysfs(p) => p.set_high(),
            Self::Simulated(p) => {
                p.high = true;
                Ok(())
            }
        }
    }
}
