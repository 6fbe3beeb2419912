use serde::{Deserialize, Serialize};

use crate::{AppRun, LogLine, ParsedGoRoutine, RegistrationError, RuntimeStats, WatchDecl, WatchSample};

/// Envelope wrapping every message sent after the handshake. `full`
/// distinguishes a complete resend of a stream's current state (sent once
/// per connection, right after a (re)connect) from an incremental delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub full: bool,
    pub sent_at_unix_ms: i64,
    pub body: PacketBody,
}

impl Packet {
    pub fn full(sent_at_unix_ms: i64, body: PacketBody) -> Self {
        Self { full: true, sent_at_unix_ms, body }
    }

    pub fn delta(sent_at_unix_ms: i64, body: PacketBody) -> Self {
        Self { full: false, sent_at_unix_ms, body }
    }
}

/// Discriminated union of every packet kind a connection carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PacketBody {
    AppRun(AppRun),
    WatchDecls { decls: Vec<WatchDecl> },
    WatchSamples { samples: Vec<WatchSample> },
    RegistrationErrors { errors: Vec<RegistrationError> },
    LogLines { lines: Vec<LogLine> },
    GoRoutines { routines: Vec<ParsedGoRoutine> },
    RuntimeStats(RuntimeStats),
    Status(StatusPacket),
    AppDone,
}

/// Periodic health packet: lets the monitor observe drop counts without a
/// dedicated RPC, the same way a heartbeat piggybacks diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPacket {
    pub dropped_watch_samples: u64,
    pub dropped_log_lines: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

/// Structured error payload, used when a connection must report a protocol
/// failure (e.g. a mid-stream decode error) rather than a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: String,
    pub message: String,
}
