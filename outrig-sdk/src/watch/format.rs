use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicIsize, AtomicU64, AtomicUsize, Ordering};

use outrig_wire::{FormatTag, WatchValueKind};

/// Maximum depth walked through nested container/pointer-like values before
/// giving up, mirroring the dereference-chain cap reflection-based
/// formatters use for cyclic or very deep structures.
///
/// This SDK's capture paths never actually walk more than one level of
/// indirection (a direct reference to the user's mutex-guarded value or
/// atomic cell), since Rust has no reflective "follow every pointer field"
/// operation to substitute for. The constant is kept and exposed so the
/// wire contract's `addr[]` field carries a documented, tuned upper bound
/// rather than an unbounded one; see `DESIGN.md` for this Open Question's
/// resolution.
pub(crate) const MAX_CHASE_DEPTH: usize = 10;

/// Maximum size, in bytes, of a single formatted watch value. Larger values
/// are reported as a formatting error instead of being sent, so one
/// oversized watch can't dominate the outgoing packet queue.
pub(crate) const MAX_VALUE_BYTES: usize = 128 * 1024;

/// The result of formatting one watch value: the text that goes on the
/// wire, plus the metadata a receiver needs to render it without its own
/// copy of the watched type (kind, type name, container length/capacity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub formatted: String,
    pub value_kind: WatchValueKind,
    pub type_name: String,
    pub len: Option<usize>,
    pub cap: Option<usize>,
}

impl Captured {
    pub fn primitive(formatted: String, type_name: &str) -> Self {
        Self {
            formatted,
            value_kind: WatchValueKind::Primitive,
            type_name: type_name.to_string(),
            len: None,
            cap: None,
        }
    }

    pub fn aggregate(formatted: String, type_name: &str, len: usize, cap: Option<usize>) -> Self {
        Self {
            formatted,
            value_kind: WatchValueKind::Aggregate,
            type_name: type_name.to_string(),
            len: Some(len),
            cap,
        }
    }
}

/// A value a watch can report. Rust has no runtime reflection, so capture
/// is expressed as a trait instead: built-in impls cover primitives and the
/// common containers, and a user type picks up `stringer` formatting for
/// free by implementing [`std::fmt::Display`], or can implement
/// `Watchable` directly for full control over its JSON/gofmt encoding.
pub trait Watchable {
    fn capture(&self, tag: FormatTag) -> Captured;
}

macro_rules! impl_watchable_primitive {
    ($($t:ty),*) => {
        $(
            impl Watchable for $t {
                fn capture(&self, tag: FormatTag) -> Captured {
                    let formatted = match tag {
                        FormatTag::Json => serde_json::to_string(self)
                            .unwrap_or_else(|_| format!("{:?}", self)),
                        FormatTag::Stringer => self.to_string(),
                        FormatTag::Gofmt => format!("{:?}", self),
                    };
                    Captured::primitive(formatted, stringify!($t))
                }
            }
        )*
    };
}

impl_watchable_primitive!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64
);

impl Watchable for String {
    fn capture(&self, tag: FormatTag) -> Captured {
        let formatted = match tag {
            FormatTag::Json => serde_json::to_string(self).unwrap_or_else(|_| self.clone()),
            FormatTag::Stringer => self.clone(),
            FormatTag::Gofmt => format!("{:?}", self),
        };
        Captured::primitive(formatted, "String")
    }
}

impl Watchable for &str {
    fn capture(&self, tag: FormatTag) -> Captured {
        let formatted = match tag {
            FormatTag::Json => serde_json::to_string(self).unwrap_or_else(|_| (*self).to_string()),
            FormatTag::Stringer => (*self).to_string(),
            FormatTag::Gofmt => format!("{:?}", self),
        };
        Captured::primitive(formatted, "str")
    }
}

impl<T: Watchable> Watchable for Option<T> {
    fn capture(&self, tag: FormatTag) -> Captured {
        match self {
            Some(v) => v.capture(tag),
            None => Captured::primitive("null".to_string(), "Option"),
        }
    }
}

impl<T: Watchable> Watchable for Vec<T> {
    fn capture(&self, tag: FormatTag) -> Captured {
        let formatted = match tag {
            FormatTag::Json => {
                let parts: Vec<String> = self.iter().map(|v| v.capture(tag).formatted).collect();
                format!("[{}]", parts.join(","))
            }
            FormatTag::Stringer | FormatTag::Gofmt => {
                let parts: Vec<String> = self.iter().map(|v| v.capture(tag).formatted).collect();
                format!("[{}]", parts.join(" "))
            }
        };
        Captured::aggregate(formatted, "Vec", self.len(), Some(self.capacity()))
    }
}

impl<K: fmt::Display, V: Watchable> Watchable for HashMap<K, V> {
    fn capture(&self, tag: FormatTag) -> Captured {
        let parts: Vec<String> = self
            .iter()
            .map(|(k, v)| format!("{:?}:{}", k.to_string(), v.capture(tag).formatted))
            .collect();
        let formatted = format!("{{{}}}", parts.join(","));
        Captured::aggregate(formatted, "HashMap", self.len(), None)
    }
}

/// Marker for types that should be formatted via [`std::fmt::Display`] under
/// the `stringer` tag, mirroring languages where a user type opts into
/// custom formatting by implementing a single string-conversion method.
pub trait Stringer: fmt::Display {}
impl<T: fmt::Display> Stringer for T {}

/// A value read through an atomic load rather than a mutex, formatted
/// without ever blocking. Blanket-implemented for the standard atomic
/// integer and boolean types; a user cell exposing its own `Load()`-style
/// capability implements this trait directly, the generic-trait option the
/// design notes call for in place of dynamic "any atomic" dispatch.
pub trait AtomicLoad: Send + Sync {
    fn load_captured(&self, tag: FormatTag) -> Captured;
}

impl AtomicLoad for AtomicU64 {
    fn load_captured(&self, tag: FormatTag) -> Captured {
        self.load(Ordering::Relaxed).capture(tag)
    }
}

impl AtomicLoad for AtomicI64 {
    fn load_captured(&self, tag: FormatTag) -> Captured {
        self.load(Ordering::Relaxed).capture(tag)
    }
}

impl AtomicLoad for AtomicUsize {
    fn load_captured(&self, tag: FormatTag) -> Captured {
        self.load(Ordering::Relaxed).capture(tag)
    }
}

impl AtomicLoad for AtomicIsize {
    fn load_captured(&self, tag: FormatTag) -> Captured {
        self.load(Ordering::Relaxed).capture(tag)
    }
}

impl AtomicLoad for AtomicBool {
    fn load_captured(&self, tag: FormatTag) -> Captured {
        self.load(Ordering::Relaxed).capture(tag)
    }
}

/// Rejects an over-long formatted value, returning its byte length so the
/// caller can report it as an error instead of silently sending a clipped
/// value.
pub(crate) fn enforce_size_cap(captured: Captured) -> Result<Captured, usize> {
    if captured.formatted.len() > MAX_VALUE_BYTES {
        Err(captured.formatted.len())
    } else {
        Ok(captured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_default_primitive_encoding() {
        let c = 42i32.capture(FormatTag::Json);
        assert_eq!(c.formatted, "42");
        assert_eq!(c.value_kind, WatchValueKind::Primitive);
    }

    #[test]
    fn vec_reports_len_and_capacity() {
        let v: Vec<i32> = vec![1, 2, 3];
        let c = v.capture(FormatTag::Json);
        assert_eq!(c.len, Some(3));
        assert_eq!(c.value_kind, WatchValueKind::Aggregate);
    }

    #[test]
    fn value_exactly_at_cap_is_kept() {
        let captured = Captured::primitive("x".repeat(MAX_VALUE_BYTES), "String");
        assert!(enforce_size_cap(captured).is_ok());
    }

    #[test]
    fn value_one_byte_over_cap_is_rejected() {
        let captured = Captured::primitive("x".repeat(MAX_VALUE_BYTES + 1), "String");
        assert!(enforce_size_cap(captured).is_err());
    }
}
