//! Error kinds for the daemon, grouped by failure domain per spec §7.
//!
//! Each domain follows the shape of the teacher's `flux::shared::NetworkError`:
//! a small enum with a non-fatal variant for expected backpressure
//! (`IoError::Wait`) and a `From<io::Error>` impl that folds `WouldBlock`
//! into it rather than treating it as failure.

use std::fmt;
use std::io;

/// Errors from reloading a database dump file from disk (§4.5, §7).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReloadError {
    WrongMagic,
    Version,
    Corrupt,
    Access,
    NotExist,
    Merge,
}

impl fmt::Display for ReloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReloadError::WrongMagic => "wrong magic number in database header",
            ReloadError::Version => "incompatible database version",
            ReloadError::Corrupt => "corrupt database file",
            ReloadError::Access => "could not access database file",
            ReloadError::NotExist => "database file does not exist",
            ReloadError::Merge => "cannot reload a merged database from disk",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ReloadError {}

/// Transport-level I/O errors (§4.2, §7). `Wait` is not a failure: it means
/// the non-blocking call would have blocked and should be retried on the
/// next readiness notification.
#[derive(Debug)]
pub enum IoError {
    Wait,
    Timeout,
    PeerClosed,
    Fatal(io::Error),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Wait => write!(f, "operation would block"),
            IoError::Timeout => write!(f, "i/o timeout"),
            IoError::PeerClosed => write!(f, "peer closed connection"),
            IoError::Fatal(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for IoError {}

impl From<io::Error> for IoError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => IoError::Wait,
            io::ErrorKind::UnexpectedEof => IoError::PeerClosed,
            _ => IoError::Fatal(e),
        }
    }
}

impl IoError {
    /// Mirrors the teacher's `ErrorUtils::has_failed`: `Wait` is not failure.
    pub fn has_failed(&self) -> bool {
        !matches!(self, IoError::Wait)
    }
}

/// Wire-protocol validation errors (§4.1, §7). Any of these close the
/// connection; there is no partial acceptance.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProtocolError {
    BadMagic,
    BadType,
    BadLength,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolError::BadMagic => "protocol: bad service or endian magic",
            ProtocolError::BadType => "protocol: unknown message type",
            ProtocolError::BadLength => "protocol: message length out of range",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ProtocolError {}

/// Tuner/driver errors (§4.8, §7). These never stop acquisition; the
/// tuner control state machine folds them into `forced-passive`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TuneError {
    NoTuner,
    NoFreq,
    DeviceBusy,
}

impl fmt::Display for TuneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TuneError::NoTuner => "selected input source is not a tuner",
            TuneError::NoFreq => "no frequency known for this channel",
            TuneError::DeviceBusy => "capture device is busy",
        };
        f.write_str(s)
    }
}

impl std::error::Error for TuneError {}

/// Config-file parse errors (§6, §7). Fatal at startup, reported-and-rolled-back
/// at runtime.
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Syntax { line: usize, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config i/o error: {}", e),
            ConfigError::Syntax { line, message } => {
                write!(f, "config syntax error at line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Top-level error surfaced by the public acquisition/server API.
#[derive(Debug)]
pub enum AcqError {
    Reload(ReloadError),
    Io(IoError),
    Protocol(ProtocolError),
    Tune(TuneError),
    Config(ConfigError),
    /// `queue-overflow` per §7: informational, acquisition keeps running.
    QueueOverflow { depth: usize },
}

impl fmt::Display for AcqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcqError::Reload(e) => write!(f, "{}", e),
            AcqError::Io(e) => write!(f, "{}", e),
            AcqError::Protocol(e) => write!(f, "{}", e),
            AcqError::Tune(e) => write!(f, "{}", e),
            AcqError::Config(e) => write!(f, "{}", e),
            AcqError::QueueOverflow { depth } => {
                write!(f, "acquisition queue overflow ({} blocks pending)", depth)
            }
        }
    }
}

impl std::error::Error for AcqError {}

impl From<ReloadError> for AcqError {
    fn from(e: ReloadError) -> Self {
        AcqError::Reload(e)
    }
}
impl From<IoError> for AcqError {
    fn from(e: IoError) -> Self {
        AcqError::Io(e)
    }
}
impl From<ProtocolError> for AcqError {
    fn from(e: ProtocolError) -> Self {
        AcqError::Protocol(e)
    }
}
impl From<TuneError> for AcqError {
    fn from(e: TuneError) -> Self {
        AcqError::Tune(e)
    }
}
impl From<ConfigError> for AcqError {
    fn from(e: ConfigError) -> Self {
        AcqError::Config(e)
    }
}
