//! Validation of user input before it reaches the timer.
//!
//! The state machine has no fallible operations. Everything that can be
//! malformed (durations typed by a user, ports, dial targets, command lines,
//! commands arriving from a child) is checked here and turned into typed
//! values first.

use cue_types::Request;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors for rejected user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// Nothing was entered.
    #[error("empty input")]
    Empty,

    /// Not a number or clock value.
    #[error("not a valid duration: {0:?}")]
    InvalidNumber(String),

    /// Negative, NaN or infinite.
    #[error("duration must be a finite, non-negative number of seconds")]
    OutOfRange,

    /// Not a usable TCP port.
    #[error("not a valid port: {0:?}")]
    InvalidPort(String),

    /// Not a `host:port` pair.
    #[error("not a valid dial target (expected host:port): {0:?}")]
    InvalidTarget(String),

    /// Unrecognized command word.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// A command was missing one of its arguments.
    #[error("{command}: missing {argument}")]
    MissingArgument {
        /// The command being parsed.
        command: &'static str,
        /// The argument that was expected.
        argument: &'static str,
    },
}

/// A validated, finite, non-negative number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Seconds(f64);

impl Seconds {
    /// Zero seconds.
    pub const ZERO: Seconds = Seconds(0.0);

    /// Validate a raw number of seconds.
    pub fn new(value: f64) -> Result<Self, InputError> {
        if value.is_finite() && value >= 0.0 {
            Ok(Self(value))
        } else {
            Err(InputError::OutOfRange)
        }
    }

    /// The number of seconds.
    pub fn get(self) -> f64 {
        self.0
    }
}

impl FromStr for Seconds {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_seconds(s)
    }
}

/// Parse a duration: plain seconds (`"90"`, `"1.5"`), `m:ss` or `h:mm:ss`.
pub fn parse_seconds(text: &str) -> Result<Seconds, InputError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(InputError::Empty);
    }

    let invalid = || InputError::InvalidNumber(text.to_string());
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() > 3 {
        return Err(invalid());
    }

    let mut total = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let value: f64 = part.trim().parse().map_err(|_| invalid())?;
        if !value.is_finite() || value < 0.0 {
            return Err(InputError::OutOfRange);
        }
        // Minutes and seconds fields of a clock value stay below 60.
        if i > 0 && value >= 60.0 {
            return Err(invalid());
        }
        total = total * 60.0 + value;
    }
    Seconds::new(total)
}

/// Parse a TCP port. Port 0 is rejected.
pub fn parse_port(text: &str) -> Result<u16, InputError> {
    let text = text.trim();
    match text.parse::<u16>() {
        Ok(0) | Err(_) => Err(InputError::InvalidPort(text.to_string())),
        Ok(port) => Ok(port),
    }
}

/// Where a child dials its parent.
///
/// This is the output of pairing (QR scan, deep link, manual entry); how it
/// was obtained doesn't matter here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl DialTarget {
    /// Create a dial target.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for DialTarget {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| InputError::InvalidTarget(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(InputError::InvalidTarget(s.to_string()));
        }
        let port = parse_port(port)?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A validated user action for the parent's timer.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    /// Start a countdown of this length (zero starts counting up).
    Start(Seconds),
    /// Pause.
    Pause,
    /// Resume.
    Resume,
    /// Reset to Idle.
    Reset,
    /// Schedule a stop-and-hold.
    AddStop {
        /// Elapsed seconds at which to stop.
        fire_offset: Seconds,
        /// How long to hold.
        hold: Seconds,
    },
    /// Add a cue marker.
    AddCue {
        /// Elapsed seconds of the marker.
        fire_offset: Seconds,
        /// Attached asset identifier.
        asset_id: Option<String>,
    },
    /// Add a restart marker.
    AddRestart(Seconds),
    /// Fire a manual flash.
    Flash,
}

impl UserAction {
    /// Validate a command that arrived from a child.
    ///
    /// Returns `Ok(None)` for requests that aren't timer commands.
    pub fn from_request(request: &Request) -> Result<Option<Self>, InputError> {
        let action = match request {
            Request::Start { duration } => UserAction::Start(Seconds::new(*duration)?),
            Request::Pause => UserAction::Pause,
            Request::Resume => UserAction::Resume,
            Request::Reset => UserAction::Reset,
            Request::Flash => UserAction::Flash,
            Request::Snapshot | Request::Unknown => return Ok(None),
        };
        Ok(Some(action))
    }
}

/// Parse one command line.
///
/// ```text
/// start <duration>          pause | resume | reset | flash
/// stop <offset> <hold>      cue <offset> [asset]      restart <offset>
/// ```
pub fn parse_action(line: &str) -> Result<UserAction, InputError> {
    let mut words = line.split_whitespace();
    let command = words.next().ok_or(InputError::Empty)?;

    let action = match command.to_ascii_lowercase().as_str() {
        "start" => UserAction::Start(next_seconds(&mut words, "start", "duration")?),
        "pause" => UserAction::Pause,
        "resume" => UserAction::Resume,
        "reset" => UserAction::Reset,
        "flash" => UserAction::Flash,
        "stop" => UserAction::AddStop {
            fire_offset: next_seconds(&mut words, "stop", "offset")?,
            hold: next_seconds(&mut words, "stop", "hold")?,
        },
        "cue" => UserAction::AddCue {
            fire_offset: next_seconds(&mut words, "cue", "offset")?,
            asset_id: words.next().map(str::to_string),
        },
        "restart" => UserAction::AddRestart(next_seconds(&mut words, "restart", "offset")?),
        other => return Err(InputError::UnknownCommand(other.to_string())),
    };
    Ok(action)
}

fn next_seconds<'a>(
    words: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
    argument: &'static str,
) -> Result<Seconds, InputError> {
    let word = words
        .next()
        .ok_or(InputError::MissingArgument { command, argument })?;
    parse_seconds(word)
}
