//! Wire-format types shared between an instrumented process and the
//! Outrig monitor it streams telemetry to.
//!
//! This crate has no I/O and no async runtime dependency: it exists purely
//! to give both ends of the socket a single, versioned vocabulary for the
//! newline-delimited JSON packets described in the protocol section of the
//! SDK documentation.

mod apprun;
mod error;
mod goroutine;
mod handshake;
mod log;
mod packet;
mod runtime_stats;
mod version;
mod watch;

pub use apprun::AppRun;
pub use error::Error;
pub use goroutine::{ParsedGoRoutine, StackFrame, TimeSpan};
pub use handshake::{
    ClientHandshake, ConnMode, ServerHandshake, ServerHello, MIN_REQUIRED_SERVER_VERSION,
};
pub use log::{LogLine, LogSource};
pub use packet::{Packet, PacketBody, ProtocolError, StatusPacket};
pub use runtime_stats::RuntimeStats;
pub use version::SdkVersion;
pub use watch::{
    FormatTag, RegistrationError, WatchDecl, WatchKind, WatchSample, WatchValue, WatchValueKind,
};

/// Current wire protocol major version, exchanged during the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Magic line a TCP client sends before the JSON handshake line, so a
/// listener speaking some unrelated protocol on the same port fails fast
/// instead of hanging on a read.
pub const MAGIC_LINE: &str = "!OUTRIG";
