//! Watch registration and the once-a-second polling tick.
//!
//! Registration storage uses a dirty-bit-and-shrink idiom (see
//! [`crate::shrink::ShrinkMap`]): each watch keeps its last transmitted
//! sample so an unchanged reading can be elided on the wire as
//! [`outrig_wire::WatchValue::Same`] instead of resent verbatim.

mod format;

pub use format::{AtomicLoad, Captured, Stringer, Watchable};

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use outrig_wire::{
    FormatTag, RegistrationError, WatchDecl, WatchKind, WatchSample, WatchValue, WatchValueKind,
};

use crate::error::{Error, Result};
use crate::shrink::ShrinkMap;

const TRY_LOCK_TIMEOUT: Duration = Duration::from_millis(10);
const TRY_LOCK_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// A value behind a user-owned lock, read-and-captured without holding the
/// lock any longer than necessary: the guarded value is captured into its
/// wire representation, then the lock is released before anything else
/// (including further formatting work) happens.
trait LockedSource: Send + Sync {
    fn try_capture(&self, tag: FormatTag, timeout: Duration) -> std::result::Result<Captured, ()>;
    /// Address of the mutex-guarded cell itself, for the sample's address
    /// trail — see [`format::MAX_CHASE_DEPTH`]'s doc comment for why this
    /// SDK's pointer chains never exceed one level.
    fn addr(&self) -> usize;
}

struct SyncCell<T>(Arc<StdMutex<T>>);

impl<T: Watchable + Send> LockedSource for SyncCell<T> {
    fn try_capture(&self, tag: FormatTag, timeout: Duration) -> std::result::Result<Captured, ()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.0.try_lock() {
                Ok(guard) => return Ok(guard.capture(tag)),
                Err(std::sync::TryLockError::Poisoned(p)) => return Ok(p.into_inner().capture(tag)),
                Err(std::sync::TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(());
                    }
                    std::thread::sleep(TRY_LOCK_POLL_INTERVAL);
                }
            }
        }
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

enum Source {
    Sync(Box<dyn LockedSource>),
    Atomic(Arc<dyn AtomicLoad>),
    Func(Box<dyn Fn() -> Captured + Send + Sync>),
    /// Updated only by explicit `push`; never polled.
    Push,
    /// Decl-listed but intentionally excluded from polling (resolves the
    /// "static watch" open question: declared once, never sampled).
    Static,
}

struct Entry {
    decl: WatchDecl,
    source: Source,
    last_sample: Option<WatchSample>,
}

/// The registry of every currently-declared watch, the accumulated,
/// not-yet-sent registration errors, and the queue of declaration deltas
/// (newly added or newly unregistered names) waiting for the next delta
/// flush.
#[derive(Default)]
pub(crate) struct Registry {
    entries: ShrinkMap<String, Entry>,
    /// Every registration error ever recorded, oldest first; never cleared,
    /// so a post-reconnect full snapshot can resend the complete history.
    errors: Vec<RegistrationError>,
    /// Index into `errors` up to which the monitor has already been sent a
    /// copy (via either a full or a delta flush).
    error_flush_cursor: usize,
    pending_decl_deltas: Vec<WatchDecl>,
    /// Every push-watch sample since the last drain, oldest first. Pushes
    /// are queued rather than collapsed into a single slot, since each call
    /// to `push()` must reach the wire on its own — unlike a polled watch, a
    /// push has no "next tick" to catch up on a missed value.
    pending_pushes: Vec<WatchSample>,
}

impl Registry {
    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.len() > 256 {
            return Err(Error::RegistrationInvalidName(name.to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, name: String, format: FormatTag, kind: WatchKind, source: Source) -> Result<()> {
        Self::validate_name(&name)?;
        if self.entries.contains_key(&name) {
            let err = RegistrationError {
                name: name.clone(),
                message: format!("duplicate name {name:?}"),
                occurred_at_unix_ms: now_ms(),
                source_line: None,
            };
            self.errors.push(err);
            return Err(Error::RegistrationDuplicateName(name));
        }
        let decl = WatchDecl {
            name: name.clone(),
            kind,
            format,
            tags: Vec::new(),
            source_line: None,
            unregistered: false,
        };
        self.pending_decl_deltas.push(decl.clone());
        self.entries.insert(name, Entry { decl, source, last_sample: None });
        Ok(())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub(crate) fn register_sync<T: Watchable + Send + 'static>(
        &mut self,
        name: impl Into<String>,
        format: FormatTag,
        value: Arc<StdMutex<T>>,
    ) -> Result<()> {
        self.insert(
            name.into(),
            format,
            WatchKind::Sync,
            Source::Sync(Box::new(SyncCell(value))),
        )
    }

    pub(crate) fn register_atomic(
        &mut self,
        name: impl Into<String>,
        format: FormatTag,
        value: Arc<dyn AtomicLoad>,
    ) -> Result<()> {
        self.insert(name.into(), format, WatchKind::Atomic, Source::Atomic(value))
    }

    pub(crate) fn register_func(
        &mut self,
        name: impl Into<String>,
        format: FormatTag,
        f: impl Fn() -> Captured + Send + Sync + 'static,
    ) -> Result<()> {
        self.insert(name.into(), format, WatchKind::Func, Source::Func(Box::new(f)))
    }

    pub(crate) fn register_push(&mut self, name: impl Into<String>, format: FormatTag) -> Result<()> {
        self.insert(name.into(), format, WatchKind::Push, Source::Push)
    }

    pub(crate) fn register_static(
        &mut self,
        name: impl Into<String>,
        format: FormatTag,
        initial: Captured,
    ) -> Result<()> {
        let name = name.into();
        self.insert(name.clone(), format, WatchKind::Static, Source::Static)?;
        if let Some(entry) = self.entries.get_mut(&name) {
            entry.last_sample = Some(sample_from_captured(name, format, initial, 0, &[]));
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, name: &str, captured: Captured) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::RegistrationInvalidName(name.to_string()))?;
        let format = entry.decl.format;
        let sample = sample_from_captured(name.to_string(), format, captured, 0, &[]);
        entry.last_sample = Some(sample.clone());
        self.pending_pushes.push(sample);
        Ok(())
    }

    pub(crate) fn unregister(&mut self, name: &str) {
        if let Some(mut entry) = self.entries.remove(name) {
            entry.decl.unregistered = true;
            self.pending_decl_deltas.push(entry.decl);
        }
    }

    /// Polls every non-push, non-static watch once, producing a sample for
    /// each. Unchanged values collapse to [`WatchValue::Same`] with every
    /// other value-bearing field cleared, per the wire invariant. Per-sample
    /// errors (lock timeout, panic, oversized value) are appended to the
    /// ever-growing error history; callers flush them separately via
    /// [`Registry::errors_full`]/[`Registry::errors_delta`].
    pub(crate) fn poll_tick(&mut self) -> Vec<WatchSample> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();

        let mut samples = Vec::with_capacity(names.len());
        for name in names {
            let entry = self.entries.get_mut(&name).expect("name came from entries keys");
            let format = entry.decl.format;
            let started = Instant::now();

            let captured = match &entry.source {
                Source::Sync(src) => match src.try_capture(format, TRY_LOCK_TIMEOUT) {
                    Ok(c) => Ok((c, vec![format!("{:#x}", src.addr())])),
                    Err(()) => Err(format!(
                        "timeout waiting for lock after {:?}",
                        TRY_LOCK_TIMEOUT
                    )),
                },
                Source::Atomic(src) => {
                    let addr = Arc::as_ptr(src) as *const () as usize;
                    Ok((src.load_captured(format), vec![format!("{:#x}", addr)]))
                }
                Source::Func(f) => {
                    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f())) {
                        Ok(c) => Ok((c, Vec::new())),
                        Err(panic) => Err(panic_message(panic)),
                    }
                }
                Source::Push | Source::Static => continue,
            };

            let poll_duration_us = started.elapsed().as_micros() as u64;

            let (captured, addrs) = match captured {
                Ok(pair) => pair,
                Err(message) => {
                    self.errors.push(RegistrationError {
                        name: name.clone(),
                        message: message.clone(),
                        occurred_at_unix_ms: now_ms(),
                        source_line: None,
                    });
                    let sample = error_sample(name.clone(), format, message, poll_duration_us);
                    maybe_elide(entry, sample, &mut samples);
                    continue;
                }
            };

            let captured = match format::enforce_size_cap(captured) {
                Ok(c) => c,
                Err(size) => {
                    let message = "value exceeded max size; not captured".to_string();
                    self.errors.push(RegistrationError {
                        name: name.clone(),
                        message: format!("{message} ({size} bytes)"),
                        occurred_at_unix_ms: now_ms(),
                        source_line: None,
                    });
                    let sample = error_sample(name.clone(), format, message, poll_duration_us);
                    maybe_elide(entry, sample, &mut samples);
                    continue;
                }
            };

            let sample = sample_from_captured(name.clone(), format, captured, poll_duration_us, &addrs);
            maybe_elide(entry, sample, &mut samples);
        }
        samples
    }

    /// All currently-live declarations, for the full snapshot sent right
    /// after (re)connect. Also clears the pending delta queue, since a full
    /// snapshot already reflects every addition and removal up to now.
    pub(crate) fn decls_full(&mut self) -> Vec<WatchDecl> {
        self.pending_decl_deltas.clear();
        self.entries.values().map(|e| e.decl.clone()).collect()
    }

    /// Declarations added or unregistered since the last delta flush.
    pub(crate) fn decls_delta(&mut self) -> Vec<WatchDecl> {
        std::mem::take(&mut self.pending_decl_deltas)
    }

    /// The entire registration-error history, for the full snapshot sent
    /// right after (re)connect. Advances the flush cursor to the end, so a
    /// subsequent `errors_delta` call only reports errors recorded after
    /// this flush.
    pub(crate) fn errors_full(&mut self) -> Vec<RegistrationError> {
        self.error_flush_cursor = self.errors.len();
        self.errors.clone()
    }

    /// Registration errors recorded since the last `errors_full`/
    /// `errors_delta` flush.
    pub(crate) fn errors_delta(&mut self) -> Vec<RegistrationError> {
        let fresh = self.errors[self.error_flush_cursor..].to_vec();
        self.error_flush_cursor = self.errors.len();
        fresh
    }

    /// Every currently-held sample (including push/static watches), for the
    /// full snapshot sent right after (re)connect.
    pub(crate) fn full_samples(&self) -> Vec<WatchSample> {
        self.entries.values().filter_map(|e| e.last_sample.clone()).collect()
    }

    /// Every push-watch sample queued since the last drain, oldest first.
    /// Always transmitted verbatim: unlike `poll_tick`, there is no
    /// elision here, since each push is its own discrete event rather than
    /// a reading of current state.
    pub(crate) fn drain_pushes(&mut self) -> Vec<WatchSample> {
        std::mem::take(&mut self.pending_pushes)
    }
}

/// Compares the previous sample to the new one, emitting `Same` if every
/// value-bearing field is bytewise equal, otherwise the full sample. Push
/// samples are never compared here; callers must not route push watches
/// through this path.
fn maybe_elide(entry: &mut Entry, sample: WatchSample, out: &mut Vec<WatchSample>) {
    let unchanged = entry
        .last_sample
        .as_ref()
        .is_some_and(|prev| samples_equal_for_elision(prev, &sample));
    if unchanged {
        out.push(WatchSample::same(sample.name.clone(), sample.sampled_at_unix_ms));
    } else {
        out.push(sample.clone());
    }
    entry.last_sample = Some(sample);
}

fn samples_equal_for_elision(a: &WatchSample, b: &WatchSample) -> bool {
    a.value == b.value
        && a.format == b.format
        && a.type_name == b.type_name
        && a.value_kind == b.value_kind
        && a.addrs == b.addrs
}

fn sample_from_captured(
    name: String,
    format: FormatTag,
    captured: Captured,
    poll_duration_us: u64,
    addrs: &[String],
) -> WatchSample {
    WatchSample {
        name,
        value: WatchValue::Value { formatted: captured.formatted, len: captured.len, cap: captured.cap },
        sampled_at_unix_ms: now_ms(),
        format,
        type_name: captured.type_name,
        value_kind: captured.value_kind,
        poll_duration_us,
        addrs: addrs.to_vec(),
    }
}

fn error_sample(name: String, format: FormatTag, message: String, poll_duration_us: u64) -> WatchSample {
    WatchSample {
        name,
        value: WatchValue::Error { message },
        sampled_at_unix_ms: now_ms(),
        format,
        type_name: String::new(),
        value_kind: WatchValueKind::Invalid,
        poll_duration_us,
        addrs: Vec::new(),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "watch callback panicked".to_string()
    }
}

fn now_ms() -> i64 {
    crate::clock::now_unix_ms()
}

/// Fluent builder returned by [`crate::Handle::new_watch`].
pub struct NewWatch<'a> {
    handle: &'a crate::Handle,
    name: String,
    format: FormatTag,
}

impl<'a> NewWatch<'a> {
    pub(crate) fn new(handle: &'a crate::Handle, name: impl Into<String>) -> Self {
        Self { handle, name: name.into(), format: FormatTag::Json }
    }

    pub fn as_json(mut self) -> Self {
        self.format = FormatTag::Json;
        self
    }

    pub fn as_stringer(mut self) -> Self {
        self.format = FormatTag::Stringer;
        self
    }

    pub fn as_gofmt(mut self) -> Self {
        self.format = FormatTag::Gofmt;
        self
    }

    pub fn sync<T: Watchable + Send + 'static>(self, value: Arc<StdMutex<T>>) -> Result<()> {
        self.handle.register_sync(self.name, self.format, value)
    }

    pub fn atomic(self, value: Arc<dyn AtomicLoad>) -> Result<()> {
        self.handle.register_atomic(self.name, self.format, value)
    }

    pub fn poll_fn<T: Watchable + 'static>(self, f: impl Fn() -> T + Send + Sync + 'static) -> Result<()> {
        let format = self.format;
        self.handle.register_func(self.name, format, move || f().capture(format))
    }

    pub fn push_only(self) -> Result<()> {
        self.handle.register_push(self.name, self.format)
    }

    pub fn static_value(self, initial: impl Watchable) -> Result<()> {
        let format = self.format;
        let captured = initial.capture(format);
        self.handle.register_static(self.name, format, captured)
    }
}

/// Simple atomic counter helper for `watch_atomic_counter`, since the
/// standard library has no built-in saturating/monotonic counter type.
#[derive(Default)]
pub struct AtomicCounter(std::sync::atomic::AtomicU64);

impl AtomicCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(std::sync::atomic::AtomicU64::new(0)))
    }

    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl AtomicLoad for AtomicCounter {
    fn load_captured(&self, tag: FormatTag) -> Captured {
        self.0.load_captured(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_is_rejected_and_recorded() {
        let mut reg = Registry::default();
        reg.register_push("x", FormatTag::Json).unwrap();
        let err = reg.register_push("x", FormatTag::Json).unwrap_err();
        assert!(matches!(err, Error::RegistrationDuplicateName(n) if n == "x"));
        assert_eq!(reg.errors.len(), 1);
        assert!(reg.errors[0].message.contains("duplicate name \"x\""));
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut reg = Registry::default();
        reg.register_push("x", FormatTag::Json).unwrap();
        reg.unregister("x");
        reg.unregister("x");
        assert!(!reg.contains("x"));
        let deltas = reg.decls_delta();
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].unregistered);
    }

    #[test]
    fn push_sample_is_never_elided() {
        let mut reg = Registry::default();
        reg.register_push("m", FormatTag::Json).unwrap();
        reg.push("m", 42i64.capture(FormatTag::Json)).unwrap();
        reg.push("m", 42i64.capture(FormatTag::Json)).unwrap();
        reg.push("m", 42i64.capture(FormatTag::Json)).unwrap();

        // three pushes of an identical value queue as three distinct
        // samples, none of them elided to `Same`.
        let pushes = reg.drain_pushes();
        assert_eq!(pushes.len(), 3);
        for sample in &pushes {
            assert!(matches!(sample.value, WatchValue::Value { .. }));
        }

        // only the latest value is retained for a full-snapshot flush.
        let full = reg.full_samples();
        assert_eq!(full.len(), 1);
        assert!(matches!(full[0].value, WatchValue::Value { .. }));

        // drain is consuming: a second drain with nothing new is empty.
        assert!(reg.drain_pushes().is_empty());
    }

    #[test]
    fn steady_value_elides_to_same_on_second_tick() {
        let mut reg = Registry::default();
        let cell = Arc::new(StdMutex::new(7i64));
        reg.register_sync("counter", FormatTag::Json, cell).unwrap();

        let first = reg.poll_tick();
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0].value, WatchValue::Value { .. }));

        let second = reg.poll_tick();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].value, WatchValue::Same);
    }

    #[test]
    fn changed_value_is_sent_in_full() {
        let mut reg = Registry::default();
        let cell = Arc::new(StdMutex::new(0i64));
        reg.register_sync("counter", FormatTag::Json, cell.clone()).unwrap();
        reg.poll_tick();
        *cell.lock().unwrap() = 10;
        let samples = reg.poll_tick();
        match &samples[0].value {
            WatchValue::Value { formatted, .. } => assert_eq!(formatted, "10"),
            other => panic!("expected a value sample, got {other:?}"),
        }
    }

    #[test]
    fn held_lock_yields_timeout_sample() {
        let mut reg = Registry::default();
        let cell = Arc::new(StdMutex::new(1i64));
        reg.register_sync("slow", FormatTag::Json, cell.clone()).unwrap();
        let _guard = cell.lock().unwrap();
        let samples = reg.poll_tick();
        assert!(matches!(&samples[0].value, WatchValue::Error { message } if message.starts_with("timeout waiting for lock")));
        assert_eq!(reg.errors_delta().len(), 1);
    }

    #[test]
    fn static_watch_is_declared_but_never_polled() {
        let mut reg = Registry::default();
        reg.register_static("build", FormatTag::Json, "abc123".capture(FormatTag::Json)).unwrap();
        let samples = reg.poll_tick();
        assert!(samples.is_empty());
        assert_eq!(reg.full_samples().len(), 1);
        assert_eq!(reg.decls_full().len(), 1);
    }

    #[test]
    fn panicking_func_watch_reports_error_and_continues() {
        let mut reg = Registry::default();
        reg.register_func("boom", FormatTag::Json, || -> Captured { panic!("kaboom") }).unwrap();
        reg.register_push("ok", FormatTag::Json).unwrap();
        reg.push("ok", 1i64.capture(FormatTag::Json)).unwrap();
        let samples = reg.poll_tick();
        assert_eq!(samples.len(), 1);
        assert!(matches!(&samples[0].value, WatchValue::Error { message } if message == "kaboom"));
        assert_eq!(reg.errors_delta().len(), 1);
    }

    #[test]
    fn registration_errors_full_then_delta_matches_connection_lifecycle() {
        let mut reg = Registry::default();
        reg.register_push("x", FormatTag::Json).unwrap();
        // one error before the "connection" starts
        reg.register_push("x", FormatTag::Json).unwrap_err();

        // first flush of a new connection sees the whole history...
        let full = reg.errors_full();
        assert_eq!(full.len(), 1);
        // ...and a second flush with nothing new in between is empty.
        assert!(reg.errors_delta().is_empty());

        // a later duplicate only shows up in the next delta, not refetched
        // by another full flush.
        reg.register_push("x", FormatTag::Json).unwrap_err();
        let delta = reg.errors_delta();
        assert_eq!(delta.len(), 1);
        assert!(reg.errors_delta().is_empty());
    }
}
