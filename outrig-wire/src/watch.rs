use serde::{Deserialize, Serialize};

/// How a watch's value is formatted for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    Json,
    Stringer,
    Gofmt,
}

/// The registration shape a watch was declared with. Determines polling and
/// delta behavior in the collector; carried on the wire mainly so the
/// monitor can render a hint (e.g. "push-only") without inferring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchKind {
    Sync,
    Atomic,
    Func,
    Push,
    Static,
}

/// A closed classification of what shape of value a sample carries,
/// mirroring the source SDK's reflection-derived kind code. Most watches in
/// a Rust host are `Primitive` or `Aggregate`; `Pointer`/`UnsafePointer` are
/// reserved for the raw-pointer atomic registration path, and `Func`/`Chan`
/// are carried for wire compatibility even though this SDK has no
/// first-class channel watch type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchValueKind {
    Primitive,
    Aggregate,
    Pointer,
    Func,
    Chan,
    UnsafePointer,
    Invalid,
}

/// Declaration of a single named watch, sent once (and re-sent only on
/// reconnect, as part of a full snapshot, or as a delta when added/removed
/// mid-connection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchDecl {
    pub name: String,
    pub kind: WatchKind,
    pub format: FormatTag,
    #[serde(default)]
    pub tags: Vec<String>,
    /// File:line of the `register_*`/`NewWatch` call site, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<String>,
    /// Set once [`crate::watch::unregister`] has been called for this
    /// name; the decl is still transmitted (as a delta) so the monitor can
    /// show the watch disappearing rather than just going silent.
    #[serde(default)]
    pub unregistered: bool,
}

/// A formatted watch value, or a marker meaning "unchanged since the value
/// last sent for this watch" — the delta-elision mechanism that keeps
/// steady-state polling cheap. When `Same`, every other value-bearing field
/// on the enclosing [`WatchSample`] is cleared; the receiver must reuse the
/// previous snapshot's values for this name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WatchValue {
    Same,
    Value {
        formatted: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        len: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cap: Option<usize>,
    },
    Error {
        message: String,
    },
}

/// One tick's sample for one watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSample {
    pub name: String,
    pub value: WatchValue,
    pub sampled_at_unix_ms: i64,
    pub format: FormatTag,
    pub type_name: String,
    pub value_kind: WatchValueKind,
    pub poll_duration_us: u64,
    /// Hex addresses of every pointer dereferenced while reaching this
    /// value, deepest last. Empty for non-pointer watches; capped at the
    /// pointer-chase depth limit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addrs: Vec<String>,
}

impl WatchSample {
    /// Clears every value-bearing field per the `Same` invariant, so a
    /// caller can't accidentally ship a stale formatted value alongside
    /// `WatchValue::Same`.
    pub fn same(name: String, sampled_at_unix_ms: i64) -> Self {
        Self {
            name,
            value: WatchValue::Same,
            sampled_at_unix_ms,
            format: FormatTag::Json,
            type_name: String::new(),
            value_kind: WatchValueKind::Invalid,
            poll_duration_us: 0,
            addrs: Vec::new(),
        }
    }
}

/// A registration failure (duplicate name, invalid name, panicking
/// formatter, value over the size cap, and so on), reported as its own
/// delta-tracked stream so the monitor can surface "this watch stopped
/// reporting" without the collector needing to retry indefinitely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationError {
    pub name: String,
    pub message: String,
    pub occurred_at_unix_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<String>,
}
