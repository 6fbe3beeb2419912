use serde::{Deserialize, Serialize};

/// A span of wall-clock time during which a tracked task was actively
/// running rather than merely alive-but-idle. `start_idx`/`end_idx`
/// reference the goroutine collector's tick sequence rather than wall
/// clock, so a receiver can order spans even if clocks are coarse or skew.
/// `end_unix_ms = None` (and `end_idx = None`) means the span is ongoing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start_unix_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_unix_ms: Option<i64>,
    pub start_idx: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_idx: Option<u64>,
    /// Whether `end_unix_ms` is the moment the span actually closed, as
    /// opposed to an estimate (e.g. the process exited mid-span and the
    /// close time was backfilled from the last observed tick).
    #[serde(default = "default_exact")]
    pub exact: bool,
}

fn default_exact() -> bool {
    true
}

impl TimeSpan {
    pub fn open(start_unix_ms: i64, start_idx: u64) -> Self {
        Self { start_unix_ms, end_unix_ms: None, start_idx, end_idx: None, exact: true }
    }

    pub fn is_active(&self) -> bool {
        self.end_unix_ms.is_none()
    }

    pub fn close(&mut self, end_unix_ms: i64, end_idx: u64) {
        self.end_unix_ms = Some(end_unix_ms);
        self.end_idx = Some(end_idx);
    }
}

/// One frame of a parsed stack/span trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub is_user_module: bool,
    pub is_system_module: bool,
}

/// A reporting-tick snapshot of one tracked concurrent unit of work (a
/// tokio task, standing in for the source runtime's goroutine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedGoRoutine {
    pub goid: u64,
    pub raw_state: String,
    pub primary_state: String,
    pub active: bool,
    pub active_span: TimeSpan,
    #[serde(default)]
    pub parsed_frames: Vec<StackFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_goid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_frame: Option<StackFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}
