//! A dev-time observability SDK: watches, logs, task snapshots and runtime
//! stats streamed to an Outrig monitor over a lightweight socket protocol.
//!
//! Call [`init`] once at process startup (or build a [`Builder`] directly
//! for more control), then use the free functions below — or the returned
//! [`Handle`] — to register watches, push values and name tracked tasks.
//! Everything here is safe to call whether or not a monitor is actually
//! listening: with nothing on the other end of the socket, the background
//! connection simply keeps retrying with backoff and every call here is a
//! cheap no-op past registration.

mod callsites;
mod clock;
mod config;
mod controller;
mod error;
mod goroutine;
mod logs;
mod periodic;
mod runtime_stats;
mod shrink;
mod stack;
mod sync;
mod transport;
mod watch;

pub use config::Builder;
pub use controller::Handle;
pub use error::{Error, Result};
pub use logs::{capture_stdio, ByteBudget, TeeWriter};
pub use watch::{AtomicCounter, AtomicLoad, Captured, NewWatch, Stringer, Watchable};

pub use outrig_wire::FormatTag;

/// Starts the SDK with default settings (overridable via `OUTRIG_*`
/// environment variables) and installs it as the process-wide instance
/// used by the free functions in this module.
///
/// Returns [`Error::AlreadyInitialized`] if called more than once.
pub fn init() -> Result<Handle> {
    Builder::new().with_default_env().init()
}

impl Builder {
    /// Builds the SDK and installs it as the process-wide instance used by
    /// this crate's free functions, so later calls to [`app_done`],
    /// [`push`] and friends reach it without threading a [`Handle`]
    /// through the caller's own code.
    pub fn init(self) -> Result<Handle> {
        let handle = self.build();
        controller::set_global(handle.clone())?;
        Ok(handle)
    }
}

fn global() -> &'static Handle {
    controller::global().expect(
        "outrig is not initialized: call outrig::init() (or Builder::init) before using the free functions",
    )
}

/// Marks the current app run as finished. Sent immediately rather than
/// waiting for the next periodic tick, since a process that calls this is
/// usually about to exit.
pub fn app_done() {
    global().app_done();
}

/// Starts building a new watch under `name`. See [`NewWatch`] for the
/// available sources and formats.
pub fn new_watch(name: impl Into<String>) -> NewWatch<'static> {
    global().new_watch(name)
}

/// Declares a watch backed by a `Mutex`-guarded value, sampled under a
/// short-lived try-lock on every collector tick.
pub fn watch_sync<T: Watchable + Send + 'static>(
    name: impl Into<String>,
    value: std::sync::Arc<std::sync::Mutex<T>>,
) -> Result<()> {
    global().new_watch(name).sync(value)
}

/// Declares a watch backed by a lock-free atomic cell, sampled without ever
/// blocking.
pub fn watch_atomic(name: impl Into<String>, value: std::sync::Arc<dyn AtomicLoad>) -> Result<()> {
    global().new_watch(name).atomic(value)
}

/// Declares a monotonically-incrementing counter watch, returning the
/// counter so the caller can increment it from anywhere.
pub fn watch_atomic_counter(name: impl Into<String>) -> Result<std::sync::Arc<AtomicCounter>> {
    let counter = AtomicCounter::new();
    global().new_watch(name).atomic(counter.clone())?;
    Ok(counter)
}

/// Pushes a new value for a push-only (or any other) watch immediately,
/// outside the regular polling tick.
pub fn push(name: &str, value: impl Watchable) -> Result<()> {
    global().push(name, value)
}

/// Registers `name` as a push watch on first call, then pushes `value`.
/// The common case of "start reporting this" without a separate
/// registration step.
pub fn track_value(name: &str, value: impl Watchable) -> Result<()> {
    global().track_value(name, value)
}

/// Removes a previously registered watch. Idempotent: unregistering an
/// already-unregistered or never-registered name is a no-op.
pub fn unregister(name: &str) {
    global().unregister(name);
}

/// Annotates the task whose span is currently entered on this thread (if
/// any) with a human-readable name, surfaced alongside its entry in the
/// task snapshot.
pub fn set_goroutine_name(name: impl Into<String>) {
    global().set_goroutine_name(name);
}

/// Whether the process-wide SDK instance is currently enabled.
pub fn is_enabled() -> bool {
    global().is_enabled()
}

/// Pauses every periodic collector on the process-wide SDK instance.
pub fn disable() {
    global().disable();
}

/// Resumes a previously [`disable`]d process-wide SDK instance.
pub fn enable() {
    global().enable();
}

/// Tears down the process-wide SDK instance: flushes, sends `appdone`, stops
/// every collector and closes the transport connection.
pub fn shutdown() {
    global().shutdown();
}
