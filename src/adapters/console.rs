//! Console adapter: line commands from stdin.
//!
//! **Transport-decoupled**: [`parse_console_line`] turns one line into a
//! [`ConsoleCommand`]; [`Console::execute`] runs it.  Commands that need
//! endpoint I/O (tare, reset, info, calibration) go to the supervisor
//! directly; the results that change core state are forwarded to the
//! application queue as [`AppCommand`]s.
//!
//! ```text
//!  toggle A | pump A on|off | auto A on|off | override A on|off
//!  tare C [clear] | reset C | transport C serial | transport C tcp HOST[:PORT]
//!  status | info C | diag C | reboot C | update C
//!  tds E config|k N|tc on|off|alpha N|save|defaults
//!  save | help | quit
//! ```

use core::fmt;
use std::fmt::Write as _;
use std::io::{BufRead, Write};
use std::sync::Arc;

use log::{info, warn};

use crate::app::commands::AppCommand;
use crate::codec::{Command, RemoteUpdateStatus};
use crate::config::{EndpointId, PumpId, TransportSelection, DEFAULT_TCP_PORT};
use crate::error::Error;
use crate::events::{CoreMsg, CoreSender};
use crate::supervisor::Supervisor;

pub const HELP: &str = "commands: toggle A | pump A on|off | auto A on|off | override A on|off | \
tare C [clear] | reset C | transport C serial|tcp HOST[:PORT] | status | info C | diag C | \
reboot C | update C | tds E config|k N|tc on|off|alpha N|save|defaults | save | quit";

/// TDS probe calibration sub-commands.
#[derive(Debug, Clone, PartialEq)]
pub enum TdsOp {
    Config,
    KFactor(f64),
    TemperatureCompensation(bool),
    Alpha(f64),
    Save,
    Defaults,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Toggle(PumpId),
    Pump { pump: PumpId, on: bool },
    Auto { pump: PumpId, auto: bool },
    Override { pump: PumpId, active: bool },
    Tare(EndpointId),
    ClearTare(EndpointId),
    Reset(EndpointId),
    Transport {
        endpoint: EndpointId,
        selection: TransportSelection,
    },
    Status,
    Info(EndpointId),
    Diag(EndpointId),
    Reboot(EndpointId),
    Update(EndpointId),
    Tds { endpoint: EndpointId, op: TdsOp },
    Save,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    Empty,
    Unknown(String),
    Usage(&'static str),
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty command"),
            Self::Unknown(word) => write!(f, "unknown command {word:?} (try help)"),
            Self::Usage(usage) => write!(f, "usage: {usage}"),
        }
    }
}

impl std::error::Error for ConsoleError {}

fn on_off(token: Option<&str>) -> Option<bool> {
    match token?.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Some(true),
        "off" | "0" | "false" => Some(false),
        _ => None,
    }
}

fn parse_network(target: &str) -> Option<TransportSelection> {
    let (host, port) = match target.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok().filter(|p| *p != 0)?),
        None => (target, DEFAULT_TCP_PORT),
    };
    (!host.is_empty()).then(|| TransportSelection::Network {
        host: host.to_owned(),
        port,
    })
}

fn parse_tds(words: &[&str]) -> Option<TdsOp> {
    let number = || words.get(1)?.parse::<f64>().ok().filter(|v| v.is_finite());
    Some(match words.first()?.to_ascii_lowercase().as_str() {
        "config" => TdsOp::Config,
        "k" => TdsOp::KFactor(number()?),
        "tc" => TdsOp::TemperatureCompensation(on_off(words.get(1).copied())?),
        "alpha" => TdsOp::Alpha(number()?),
        "save" => TdsOp::Save,
        "defaults" => TdsOp::Defaults,
        _ => return None,
    })
}

/// Parse one console line.
pub fn parse_console_line(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&head, rest)) = words.split_first() else {
        return Err(ConsoleError::Empty);
    };
    let head = head.to_ascii_lowercase();
    let pump = || rest.first().and_then(|t| PumpId::parse(t));
    let endpoint = || rest.first().and_then(|t| EndpointId::parse(t));
    let flag = || on_off(rest.get(1).copied());

    let usage = ConsoleError::Usage;
    match head.as_str() {
        "toggle" => pump().map(ConsoleCommand::Toggle).ok_or(usage("toggle A|B")),
        "pump" => match (pump(), flag()) {
            (Some(pump), Some(on)) => Ok(ConsoleCommand::Pump { pump, on }),
            _ => Err(usage("pump A|B on|off")),
        },
        "auto" => match (pump(), flag()) {
            (Some(pump), Some(auto)) => Ok(ConsoleCommand::Auto { pump, auto }),
            _ => Err(usage("auto A|B on|off")),
        },
        "override" => match (pump(), flag()) {
            (Some(pump), Some(active)) => Ok(ConsoleCommand::Override { pump, active }),
            _ => Err(usage("override A|B on|off")),
        },
        "tare" => match (endpoint(), rest.get(1).copied()) {
            (Some(ep), None) => Ok(ConsoleCommand::Tare(ep)),
            (Some(ep), Some("clear")) => Ok(ConsoleCommand::ClearTare(ep)),
            _ => Err(usage("tare ID [clear]")),
        },
        "reset" => endpoint().map(ConsoleCommand::Reset).ok_or(usage("reset ID")),
        "transport" => {
            let selection = match (rest.get(1).copied(), rest.get(2).copied()) {
                (Some("serial"), None) => Some(TransportSelection::Serial),
                (Some("tcp" | "network"), Some(target)) => parse_network(target),
                _ => None,
            };
            match (endpoint(), selection) {
                (Some(endpoint), Some(selection)) => Ok(ConsoleCommand::Transport {
                    endpoint,
                    selection,
                }),
                _ => Err(usage("transport ID serial | transport ID tcp HOST[:PORT]")),
            }
        }
        "status" => Ok(ConsoleCommand::Status),
        "info" => endpoint().map(ConsoleCommand::Info).ok_or(usage("info ID")),
        "diag" => endpoint().map(ConsoleCommand::Diag).ok_or(usage("diag ID")),
        "reboot" => endpoint().map(ConsoleCommand::Reboot).ok_or(usage("reboot ID")),
        "update" => endpoint().map(ConsoleCommand::Update).ok_or(usage("update ID")),
        "tds" => match (endpoint(), rest.get(1..).and_then(parse_tds)) {
            (Some(endpoint), Some(op)) => Ok(ConsoleCommand::Tds { endpoint, op }),
            _ => Err(usage("tds ID config|k N|tc on|off|alpha N|save|defaults")),
        },
        "save" => Ok(ConsoleCommand::Save),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        _ => Err(ConsoleError::Unknown(head)),
    }
}

// ───────────────────────────────────────────────────────────────
// Dispatcher
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleOutcome {
    Reply(String),
    Quit,
}

pub struct Console {
    supervisor: Arc<Supervisor>,
    queue: CoreSender,
}

impl Console {
    pub fn new(supervisor: Arc<Supervisor>, queue: CoreSender) -> Self {
        Self { supervisor, queue }
    }

    fn forward(&self, cmd: AppCommand) -> ConsoleOutcome {
        let text = format!("{cmd:?}");
        if self.queue.send(CoreMsg::Command(cmd)) {
            ConsoleOutcome::Reply(format!("queued {text}"))
        } else {
            ConsoleOutcome::Reply("core is not running".into())
        }
    }

    fn status(&self) -> String {
        let mut out = String::new();
        for s in self.supervisor.snapshots() {
            let _ = writeln!(
                out,
                "{} {:?} {:?} via {} fw {} failures {} exchanges {}",
                s.id,
                s.class,
                s.state,
                s.transport.as_deref().unwrap_or("-"),
                s.firmware.as_deref().unwrap_or("?"),
                s.failures,
                s.counters.exchanges,
            );
        }
        out.trim_end().to_owned()
    }

    fn tare(&self, endpoint: EndpointId) -> ConsoleOutcome {
        let raw = match self.supervisor.read_level(endpoint) {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!("Console: live level read of {} failed ({}), using last reading", endpoint, e);
                None
            }
        };
        self.forward(AppCommand::ApplyTare { endpoint, raw })
    }

    fn tds(&self, endpoint: EndpointId, op: TdsOp) -> Result<String, Error> {
        let command = match op {
            TdsOp::Config => {
                let cal = self.supervisor.tds_calibration(endpoint)?;
                return Ok(format!(
                    "mode {} k {} tc {} alpha {} fw {}",
                    cal.mode.as_deref().unwrap_or("?"),
                    cal.k_factor.map_or_else(|| "?".into(), |k| k.to_string()),
                    cal.temperature_compensation
                        .map_or("?", |on| if on { "on" } else { "off" }),
                    cal.alpha.map_or_else(|| "?".into(), |a| a.to_string()),
                    cal.firmware.as_deref().unwrap_or("?"),
                ));
            }
            TdsOp::KFactor(k) => Command::SetKFactor(k),
            TdsOp::TemperatureCompensation(on) => Command::SetTemperatureCompensation(on),
            TdsOp::Alpha(a) => Command::SetAlpha(a),
            TdsOp::Save => Command::SaveCalibration,
            TdsOp::Defaults => Command::RestoreDefaults,
        };
        self.supervisor.calibrate(endpoint, &command)?;
        Ok(format!("{} ok", command.name()))
    }

    fn io_command(&self, cmd: ConsoleCommand) -> Result<String, Error> {
        Ok(match cmd {
            ConsoleCommand::Reset(id) => {
                self.supervisor.reset(id)?;
                format!("{id} reconnected")
            }
            ConsoleCommand::Info(id) => {
                let info = self.supervisor.info(id)?;
                format!(
                    "{} firmware {} model {} variant {}",
                    id,
                    info.firmware.as_deref().unwrap_or("?"),
                    info.model.as_deref().unwrap_or("?"),
                    info.variant.as_deref().unwrap_or("?"),
                )
            }
            ConsoleCommand::Diag(id) => self.supervisor.diagnostics(id)?,
            ConsoleCommand::Reboot(id) => {
                self.supervisor.reboot(id)?;
                format!("{id} rebooting")
            }
            ConsoleCommand::Update(id) => match self.supervisor.remote_update(id)? {
                RemoteUpdateStatus::UpToDate => format!("{id} is up to date"),
                RemoteUpdateStatus::Available(v) => format!("{id} updating to {v}"),
            },
            ConsoleCommand::Tds { endpoint, op } => self.tds(endpoint, op)?,
            other => format!("{other:?} needs no endpoint I/O"),
        })
    }

    pub fn execute(&self, cmd: ConsoleCommand) -> ConsoleOutcome {
        match cmd {
            ConsoleCommand::Toggle(pump) => self.forward(AppCommand::TogglePump(pump)),
            ConsoleCommand::Pump { pump, on } => self.forward(AppCommand::SetPump { pump, on }),
            ConsoleCommand::Auto { pump, auto } => self.forward(AppCommand::SetAutoMode { pump, auto }),
            ConsoleCommand::Override { pump, active } => {
                self.forward(AppCommand::SetOverride { pump, active })
            }
            ConsoleCommand::Tare(endpoint) => self.tare(endpoint),
            ConsoleCommand::ClearTare(endpoint) => self.forward(AppCommand::ClearTare { endpoint }),
            ConsoleCommand::Transport {
                endpoint,
                selection,
            } => {
                self.queue.send(CoreMsg::Command(AppCommand::SetTransport {
                    endpoint,
                    selection: selection.clone(),
                }));
                ConsoleOutcome::Reply(match self.supervisor.apply_selection(endpoint, selection) {
                    Ok(()) => format!("{endpoint} reconnected"),
                    Err(e) => format!("{endpoint} saved; reconnect failed: {e}"),
                })
            }
            ConsoleCommand::Status => ConsoleOutcome::Reply(self.status()),
            ConsoleCommand::Save => self.forward(AppCommand::SaveConfig),
            ConsoleCommand::Help => ConsoleOutcome::Reply(HELP.into()),
            ConsoleCommand::Quit => {
                self.queue.send(CoreMsg::Shutdown);
                ConsoleOutcome::Quit
            }
            io => ConsoleOutcome::Reply(match self.io_command(io) {
                Ok(text) => text,
                Err(e) => format!("error: {e}"),
            }),
        }
    }

    /// Read commands until `quit` or end of input, writing one reply per line.
    pub fn run(&self, input: impl BufRead, mut output: impl Write) {
        info!("Console: ready");
        for line in input.lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            let reply = match parse_console_line(&line) {
                Ok(cmd) => match self.execute(cmd) {
                    ConsoleOutcome::Reply(text) => text,
                    ConsoleOutcome::Quit => break,
                },
                Err(e) => e.to_string(),
            };
            if writeln!(output, "{reply}").and_then(|()| output.flush()).is_err() {
                break;
            }
        }
        info!("Console: closed");
    }
}
