use serde::{Deserialize, Serialize};

/// A single captured line of process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub seq: u64,
    pub source: LogSource,
    pub text: String,
    pub logged_at_unix_ms: i64,
}

/// Which capture path produced a [`LogLine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Tee'd from a `tracing_subscriber::fmt` writer the host already owns.
    Tracing,
    /// Captured via raw file-descriptor duplication (stdout).
    Stdout,
    /// Captured via raw file-descriptor duplication (stderr).
    Stderr,
}
