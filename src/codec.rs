//! Line-based command codec.
//!
//! Wire format: one ASCII command per line, one reply line per command.
//! ```text
//! host ──▶ "RX203\n"
//! host ◀── "318.4mmWG\r\n"
//! ```
//!
//! The codec formats outgoing commands and parses replies.  Apart from the
//! streaming [`LineDecoder`] buffer it holds no state.  A single
//! `Transport` read may return part of a line, a whole line, or several
//! lines at once; the decoder turns that into complete lines.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::EndpointId;
use crate::error::ProtocolError;

/// Longest accepted reply line.  Longer lines are discarded whole.
pub const MAX_LINE_LEN: usize = 256;

/// Unit suffixes endpoints append to numeric replies.
const UNIT_SUFFIXES: &[&str] = &[
    "mmWG", "mmwg", "mBar", "mbar", "µS/cm", "uS/cm", "ppm", "PSU", "psu", "°C", "C",
];

// ── Vocabulary ────────────────────────────────────────────────

/// A measurable channel on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Temperature,
    Level,
    Ph,
    Conductivity,
    Tds,
    Salinity,
}

impl Quantity {
    pub const fn read_command(self) -> Command {
        Command::Read(self)
    }

    /// Display unit; level endpoints may report either pressure-height unit.
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Level => "mmWG",
            Self::Ph => "pH",
            Self::Conductivity => "µS/cm",
            Self::Tds => "ppm",
            Self::Salinity => "PSU",
        }
    }
}

/// Every command the host sends.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Identify,
    Read(Quantity),
    /// TDS probe calibration report.
    TdsConfig,
    SetKFactor(f64),
    SetTemperatureCompensation(bool),
    SetAlpha(f64),
    SaveCalibration,
    RestoreDefaults,
    FirmwareVersion,
    Model,
    Variant,
    Diagnostics,
    Reboot,
    UpdateQuery,
    UpdateApply,
}

impl Command {
    /// Wire token without the trailing newline.
    pub fn token(&self) -> String {
        match self {
            Self::Identify => "RX800".into(),
            Self::Read(q) => match q {
                Quantity::Temperature => "RX201",
                Quantity::Level => "RX203",
                Quantity::Ph => "RX205",
                Quantity::Conductivity => "RX206",
                Quantity::Tds => "RX207",
                Quantity::Salinity => "RX208",
            }
            .into(),
            Self::TdsConfig => "RX209".into(),
            Self::SetKFactor(k) => format!("RX240 {k}"),
            Self::SetTemperatureCompensation(on) => format!("RX241 {}", u8::from(*on)),
            Self::SetAlpha(a) => format!("RX242 {a}"),
            Self::SaveCalibration => "RX243".into(),
            Self::RestoreDefaults => "RX244".into(),
            Self::FirmwareVersion => "RX245".into(),
            Self::Model => "RX246".into(),
            Self::Variant => "RX247".into(),
            Self::Diagnostics => "RX260".into(),
            Self::Reboot => "r".into(),
            Self::UpdateQuery => "UPDATE?".into(),
            Self::UpdateApply => "UPDATE".into(),
        }
    }

    /// Short name for logs and errors.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Read(Quantity::Temperature) => "read-temperature",
            Self::Read(Quantity::Level) => "read-level",
            Self::Read(Quantity::Ph) => "read-ph",
            Self::Read(Quantity::Conductivity) => "read-conductivity",
            Self::Read(Quantity::Tds) => "read-tds",
            Self::Read(Quantity::Salinity) => "read-salinity",
            Self::TdsConfig => "tds-config",
            Self::SetKFactor(_) => "set-k-factor",
            Self::SetTemperatureCompensation(_) => "set-temp-compensation",
            Self::SetAlpha(_) => "set-alpha",
            Self::SaveCalibration => "save-calibration",
            Self::RestoreDefaults => "restore-defaults",
            Self::FirmwareVersion => "firmware-version",
            Self::Model => "model",
            Self::Variant => "variant",
            Self::Diagnostics => "diagnostics",
            Self::Reboot => "reboot",
            Self::UpdateQuery => "update-query",
            Self::UpdateApply => "update-apply",
        }
    }

    /// Newline-terminated wire form.
    pub fn encode(&self) -> String {
        encode_line(&self.token())
    }

    /// Channel probe used during discovery for a sensor class.
    pub const fn probe_for(class: crate::config::SensorClass) -> Command {
        use crate::config::SensorClass;
        match class {
            SensorClass::Level | SensorClass::RoTank => Command::Read(Quantity::Level),
            SensorClass::Ph => Command::Read(Quantity::Ph),
            SensorClass::Tds => Command::Read(Quantity::Tds),
        }
    }
}

/// One decoded reply from a read command.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub quantity: Quantity,
    /// Reply text as received (line ending removed).
    pub raw: String,
    /// Parsed value; `None` when the reply was not a valid reading.
    pub value: Option<f64>,
}

impl Reading {
    pub fn from_reply(quantity: Quantity, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let value = parse_numeric(&raw);
        Self {
            quantity,
            raw,
            value,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }
}

// ── Encoding / decoding ───────────────────────────────────────

/// Append `\n` unless the line already ends with one.
pub fn encode_line(line: &str) -> String {
    if line.ends_with('\n') {
        line.to_owned()
    } else {
        let mut out = String::with_capacity(line.len() + 1);
        out.push_str(line);
        out.push('\n');
        out
    }
}

/// Trim a reply; `None` means the endpoint had no data.
pub fn decode_reply(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(trimmed)
    }
}

fn is_no_data(text: &str) -> bool {
    text.is_empty()
        || text.eq_ignore_ascii_case("none")
        || text.eq_ignore_ascii_case("err")
        || text == "--"
        || text == "?"
}

/// Remove one trailing unit suffix, if present.
pub fn strip_unit(raw: &str) -> &str {
    let text = raw.trim();
    for suffix in UNIT_SUFFIXES {
        if let Some(rest) = text.strip_suffix(suffix) {
            return rest.trim_end();
        }
    }
    text
}

/// Whether a reply is a usable numeric reading.
///
/// Accepts an optionally signed decimal with at most one `.`, after the
/// unit suffix is removed.
pub fn is_valid_reading(raw: &str) -> bool {
    let text = strip_unit(raw);
    if is_no_data(text) {
        return false;
    }
    let body = text.strip_prefix(['-', '+']).unwrap_or(text);
    if body.matches('.').count() > 1 {
        return false;
    }
    body.chars().all(|c| c.is_ascii_digit() || c == '.') && body.chars().any(|c| c.is_ascii_digit())
}

/// Numeric value of a reading reply.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    if !is_valid_reading(raw) {
        return None;
    }
    strip_unit(raw).parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Firmware replies carry the endpoint letter as prefix (`D1.1.0`).
pub fn parse_firmware(raw: &str, id: EndpointId) -> Option<String> {
    let text = decode_reply(raw)?;
    if text == "?" {
        return None;
    }
    let version = text.strip_prefix(id.letter()).unwrap_or(text).trim();
    (!version.is_empty()).then(|| version.to_owned())
}

/// `OK` / `ERR` acknowledgement of a set or save command.
pub fn parse_ack(raw: &str, command: &Command) -> Result<(), ProtocolError> {
    match decode_reply(raw) {
        Some(text) if text.eq_ignore_ascii_case("ok") => Ok(()),
        Some(text) => Err(ProtocolError::Rejected(text.to_owned())),
        None => Err(ProtocolError::NoReply(command.name())),
    }
}

/// Reply to the update query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUpdateStatus {
    UpToDate,
    Available(String),
}

pub fn parse_update_status(raw: &str) -> Result<RemoteUpdateStatus, ProtocolError> {
    let Some(text) = decode_reply(raw) else {
        // `NONE` decodes as "no data", which here means no update.
        return if raw.trim().is_empty() {
            Err(ProtocolError::NoReply(Command::UpdateQuery.name()))
        } else {
            Ok(RemoteUpdateStatus::UpToDate)
        };
    };
    if let Some(version) = text.strip_prefix("AVAILABLE") {
        let version = version.trim();
        if !version.is_empty() {
            return Ok(RemoteUpdateStatus::Available(version.to_owned()));
        }
    }
    Err(ProtocolError::Unexpected {
        command: Command::UpdateQuery.name(),
        reply: text.to_owned(),
    })
}

/// TDS probe calibration as reported by `RX209`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TdsCalibration {
    pub mode: Option<String>,
    pub k_factor: Option<f64>,
    pub temperature_compensation: Option<bool>,
    pub alpha: Option<f64>,
    pub firmware: Option<String>,
}

/// Parse `MODE=TDS;K=0.50;TC=ON;ALPHA=0.020;FW=E1.2`.
pub fn parse_tds_config(raw: &str) -> Result<TdsCalibration, ProtocolError> {
    let text = decode_reply(raw).ok_or(ProtocolError::NoReply(Command::TdsConfig.name()))?;
    let mut cal = TdsCalibration::default();
    let mut seen = false;
    for field in text.split(';') {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        let value = value.trim();
        seen = true;
        match key.trim().to_ascii_uppercase().as_str() {
            "MODE" => cal.mode = Some(value.to_owned()),
            "K" => cal.k_factor = value.parse().ok(),
            "TC" => cal.temperature_compensation = Some(value.eq_ignore_ascii_case("on")),
            "ALPHA" => cal.alpha = value.parse().ok(),
            "FW" => cal.firmware = Some(value.to_owned()),
            _ => {}
        }
    }
    if seen {
        Ok(cal)
    } else {
        Err(ProtocolError::Unexpected {
            command: Command::TdsConfig.name(),
            reply: text.to_owned(),
        })
    }
}

// ── Streaming decoder ─────────────────────────────────────────

/// Accumulates incoming bytes and yields complete lines.
///
/// `\r` is ignored.  A line longer than [`MAX_LINE_LEN`] is dropped up to
/// its terminating newline.
#[derive(Debug, Default)]
pub struct LineDecoder {
    partial: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
    overflowed: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        for &byte in data {
            match byte {
                b'\n' => {
                    if !self.overflowed {
                        self.ready.push_back(core::mem::take(&mut self.partial));
                    }
                    self.partial.clear();
                    self.overflowed = false;
                }
                b'\r' => {}
                _ if self.overflowed => {}
                _ if self.partial.len() >= MAX_LINE_LEN => {
                    self.overflowed = true;
                    self.partial.clear();
                }
                _ => self.partial.push(byte),
            }
        }
    }

    /// Next complete line, if any.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Bytes held (complete lines plus partial tail).
    pub fn buffered(&self) -> usize {
        self.partial.len() + self.ready.iter().map(|l| l.len() + 1).sum::<usize>()
    }

    /// Drop everything buffered; returns how many bytes were discarded.
    pub fn reset(&mut self) -> usize {
        let dropped = self.buffered();
        self.partial.clear();
        self.ready.clear();
        self.overflowed = false;
        dropped
    }
}
