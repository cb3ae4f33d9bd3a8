//! Unified error types for the coordinator.
//!
//! A single [`Error`] enum that every subsystem converts into, so the binary
//! entry point and the console can report failures uniformly.  Subsystem
//! enums stay small and descriptive; none of them carry boxed sources.

use core::fmt;
use std::io;

use crate::app::ports::ConfigError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A link to an endpoint failed or is absent.
    Transport(TransportError),
    /// An endpoint replied with something the codec could not accept.
    Protocol(ProtocolError),
    /// Configuration is invalid or could not be loaded / stored.
    Config(ConfigError),
    /// A relay or audio driver failed.
    Hardware(HardwareError),
    /// The update flow was aborted.
    Update(UpdateError),
    /// A supervisor operation was refused.
    Supervisor(SupervisorError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Hardware(e) => write!(f, "hardware: {e}"),
            Self::Update(e) => write!(f, "update: {e}"),
            Self::Supervisor(e) => write!(f, "supervisor: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failures of the byte stream underneath a link session.
///
/// All of these are transient from the supervisor's point of view: they end
/// the current connection and leave recovery to the watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The candidate could not be opened at all.
    Open(String),
    /// The peer closed the stream.
    Closed,
    /// An I/O error other than a timeout.
    Io(io::ErrorKind),
    /// The session has no live transport attached.
    NotAttached,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(detail) => write!(f, "open failed: {detail}"),
            Self::Closed => write!(f, "stream closed by peer"),
            Self::Io(kind) => write!(f, "I/O error: {kind}"),
            Self::NotAttached => write!(f, "no transport attached"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::Closed,
            kind => Self::Io(kind),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The identify reply named a different endpoint.
    IdentityMismatch { expected: char, got: String },
    /// The endpoint gave no usable reply.
    NoReply(&'static str),
    /// The endpoint answered `ERR` or `?`.
    Rejected(String),
    /// The reply did not have the expected shape.
    Unexpected { command: &'static str, reply: String },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentityMismatch { expected, got } => {
                write!(f, "identify mismatch: expected {expected}, got {got:?}")
            }
            Self::NoReply(cmd) => write!(f, "no reply to {cmd}"),
            Self::Rejected(reply) => write!(f, "command rejected: {reply}"),
            Self::Unexpected { command, reply } => {
                write!(f, "unexpected reply to {command}: {reply:?}")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Hardware errors
// ---------------------------------------------------------------------------

/// Driver boundary failures (relay GPIO, audio player).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// A GPIO line could not be exported or written.
    GpioWrite { line: u32, detail: String },
    /// The audio player could not be spawned.
    AudioSpawn(String),
    /// The audio player could not be stopped.
    AudioStop(String),
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioWrite { line, detail } => write!(f, "GPIO {line} write failed: {detail}"),
            Self::AudioSpawn(detail) => write!(f, "audio spawn failed: {detail}"),
            Self::AudioStop(detail) => write!(f, "audio stop failed: {detail}"),
        }
    }
}

impl std::error::Error for HardwareError {}

impl From<HardwareError> for Error {
    fn from(e: HardwareError) -> Self {
        Self::Hardware(e)
    }
}

// ---------------------------------------------------------------------------
// Update errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// The manifest or an artifact could not be downloaded.
    Fetch(String),
    /// The manifest was not valid JSON.
    ManifestParse(String),
    /// The manifest has no entry for this artifact key.
    MissingEntry(String),
    /// A required manifest field is absent.
    MissingField(&'static str),
    /// The running version is older than the manifest's minimum.
    Unsupported { current: String, minimum: String },
    /// The downloaded bytes do not hash to the manifest value.
    HashMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    /// A filesystem step failed.
    Io { step: &'static str, detail: String },
    /// Re-exec of the new artifact failed.
    Restart(String),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(detail) => write!(f, "download failed: {detail}"),
            Self::ManifestParse(detail) => write!(f, "manifest parse failed: {detail}"),
            Self::MissingEntry(key) => write!(f, "manifest has no entry for {key:?}"),
            Self::MissingField(field) => write!(f, "manifest is missing {field}"),
            Self::Unsupported { current, minimum } => write!(
                f,
                "version {current} is below minimum supported {minimum}; manual update required"
            ),
            Self::HashMismatch {
                file,
                expected,
                actual,
            } => write!(
                f,
                "hash mismatch for {file}: expected {expected}, got {actual}"
            ),
            Self::Io { step, detail } => write!(f, "{step} failed: {detail}"),
            Self::Restart(detail) => write!(f, "restart failed: {detail}"),
        }
    }
}

impl std::error::Error for UpdateError {}

impl From<UpdateError> for Error {
    fn from(e: UpdateError) -> Self {
        Self::Update(e)
    }
}

// ---------------------------------------------------------------------------
// Supervisor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// No endpoint with this ID is configured.
    UnknownEndpoint(char),
    /// The endpoint is not currently connected.
    NotConnected(char),
    /// Every candidate transport was tried and none answered as the endpoint.
    NotFound(char),
    /// Another connect attempt for this endpoint is in progress.
    Busy(char),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEndpoint(id) => write!(f, "unknown endpoint {id}"),
            Self::NotConnected(id) => write!(f, "endpoint {id} is not connected"),
            Self::NotFound(id) => write!(f, "endpoint {id} not found on any transport"),
            Self::Busy(id) => write!(f, "endpoint {id} is already reconnecting"),
        }
    }
}

impl std::error::Error for SupervisorError {}

impl From<SupervisorError> for Error {
    fn from(e: SupervisorError) -> Self {
        Self::Supervisor(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
