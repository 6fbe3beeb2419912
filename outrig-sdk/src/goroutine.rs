//! Tracks the lifecycle of concurrently running units of work.
//!
//! Rust has no single green-thread runtime with one global stack dump, but
//! the problem this collector solves — "what is concurrently in flight
//! right now, and where is it" — is exactly the problem a
//! [`tracing_subscriber::Layer`] already solves for spawned tasks. This
//! layer generalizes that span-lifecycle tracking (`on_new_span` /
//! `on_enter` / `on_exit` / `on_close`) instead of re-deriving it, using a
//! thread-local entered-span stack and a bounded callsite cache to keep
//! the per-span bookkeeping cheap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thread_local::ThreadLocal;
use tracing_core::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use outrig_wire::{ParsedGoRoutine, StackFrame, TimeSpan};

use crate::callsites::Callsites;
use crate::stack::SpanStack;

const MAX_TRACKED_CALLSITES: usize = 4096;
const RETENTION_TICKS: u32 = 60;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Closed,
}

struct TrackedTask {
    callsite_name: &'static str,
    callsite_target: &'static str,
    callsite_file: Option<&'static str>,
    callsite_line: Option<u32>,
    state: State,
    active_span: Option<TimeSpan>,
    completed_spans: Vec<TimeSpan>,
    created_by: Option<u64>,
    created_by_frame: Option<StackFrame>,
    name: Option<String>,
    ticks_since_closed: u32,
}

/// A `tracing_subscriber::Layer` that tracks every span's lifecycle as a
/// tracked "goroutine" entry, queryable once per collector tick.
pub(crate) struct GoroutineLayer {
    tasks: Mutex<HashMap<u64, TrackedTask>>,
    current_spans: ThreadLocal<std::cell::RefCell<SpanStack>>,
    callsites: Callsites<MAX_TRACKED_CALLSITES>,
    tick_idx: AtomicU64,
}

impl GoroutineLayer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(HashMap::new()),
            current_spans: ThreadLocal::new(),
            callsites: Callsites::default(),
            tick_idx: AtomicU64::new(0),
        })
    }

    pub(crate) fn set_name(&self, id: u64, name: String) {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&id) {
            task.name = Some(name);
        }
    }

    /// Number of tasks currently tracked (including idle-but-not-yet-closed
    /// ones), for the runtime-stats collector's `tracked_task_count`.
    pub(crate) fn tracked_count(&self) -> u64 {
        self.tasks.lock().unwrap().len() as u64
    }

    /// Produces one entry per currently tracked task, dropping entries that
    /// have been closed for longer than the retention window.
    pub(crate) fn tick(&self, now_ms: i64) -> Vec<ParsedGoRoutine> {
        let idx = self.tick_idx.fetch_add(1, Ordering::Relaxed);
        let mut tasks = self.tasks.lock().unwrap();
        let mut out = Vec::with_capacity(tasks.len());
        tasks.retain(|&goid, task| {
            let (raw_state, primary_state) = match task.state {
                State::Idle => ("idle", "waiting"),
                State::Running => ("running", "running"),
                State::Closed => ("closed", "terminated"),
            };
            let active_span = task.active_span.unwrap_or_else(|| {
                task.completed_spans.last().copied().unwrap_or(TimeSpan::open(now_ms, idx))
            });
            let frame = StackFrame {
                function: task.callsite_name.to_string(),
                package: task.callsite_target.to_string(),
                file: task.callsite_file.map(str::to_string),
                line: task.callsite_line,
                is_user_module: !is_system_module(task.callsite_target),
                is_system_module: is_system_module(task.callsite_target),
            };
            out.push(ParsedGoRoutine {
                goid,
                raw_state: raw_state.to_string(),
                primary_state: primary_state.to_string(),
                active: task.state == State::Running,
                active_span,
                parsed_frames: vec![frame],
                created_by_goid: task.created_by,
                created_by_frame: task.created_by_frame.clone(),
                name: task.name.clone(),
                parse_error: None,
            });

            if task.state == State::Closed {
                task.ticks_since_closed += 1;
                task.ticks_since_closed < RETENTION_TICKS
            } else {
                true
            }
        });
        out
    }

    fn stack(&self) -> std::cell::RefMut<'_, SpanStack> {
        self.current_spans.get_or_default().borrow_mut()
    }
}

fn is_system_module(target: &str) -> bool {
    const SYSTEM_PREFIXES: &[&str] = &["std", "core", "alloc", "tokio", "outrig_sdk"];
    SYSTEM_PREFIXES.iter().any(|p| target == *p || target.starts_with(&format!("{p}::")))
}

impl<S> Layer<S> for GoroutineLayer
where
    S: tracing_core::Subscriber + for<'a> LookupSpan<'a>,
{
    fn register_callsite(
        &self,
        metadata: &'static tracing_core::Metadata<'static>,
    ) -> tracing_core::subscriber::Interest {
        self.callsites.insert(metadata);
        tracing_core::subscriber::Interest::always()
    }

    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let goid = id.into_u64();
        let metadata = ctx.metadata(id).expect("span metadata must exist");
        let parent = ctx.span(id).and_then(|s| s.parent().map(|p| p.id().into_u64()));
        let created_by_frame = ctx.span(id).and_then(|s| {
            s.parent().map(|p| {
                let m = p.metadata();
                StackFrame {
                    function: m.name().to_string(),
                    package: m.target().to_string(),
                    file: m.file().map(str::to_string),
                    line: m.line(),
                    is_user_module: !is_system_module(m.target()),
                    is_system_module: is_system_module(m.target()),
                }
            })
        });
        self.tasks.lock().unwrap().insert(
            goid,
            TrackedTask {
                callsite_name: metadata.name(),
                callsite_target: metadata.target(),
                callsite_file: metadata.file(),
                callsite_line: metadata.line(),
                state: State::Idle,
                active_span: None,
                completed_spans: Vec::new(),
                created_by: parent,
                created_by_frame,
                name: None,
                ticks_since_closed: 0,
            },
        );
    }

    fn on_enter(&self, id: &span::Id, _ctx: Context<'_, S>) {
        let goid = id.into_u64();
        self.stack().push(id.clone());
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&goid) {
            task.state = State::Running;
            if task.active_span.is_none() {
                let idx = self.tick_idx.load(Ordering::Relaxed);
                task.active_span = Some(TimeSpan::open(crate::clock::now_unix_ms(), idx));
            }
        }
    }

    fn on_exit(&self, id: &span::Id, _ctx: Context<'_, S>) {
        let goid = id.into_u64();
        self.stack().pop(id);
        let idx = self.tick_idx.load(Ordering::Relaxed);
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&goid) {
            task.state = State::Idle;
            if let Some(mut span) = task.active_span.take() {
                span.close(crate::clock::now_unix_ms(), idx);
                task.completed_spans.push(span);
            }
        }
    }

    fn on_close(&self, id: span::Id, _ctx: Context<'_, S>) {
        let goid = id.into_u64();
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&goid) {
            task.state = State::Closed;
        }
    }
}

/// Monotonic id allocator used when a tracked unit of work has no natural
/// `tracing::Id` of its own (reserved for future direct-registration paths).
pub(crate) static NEXT_SYNTHETIC_GOID: AtomicU64 = AtomicU64::new(1 << 48);

pub(crate) fn next_synthetic_goid() -> u64 {
    NEXT_SYNTHETIC_GOID.fetch_add(1, Ordering::Relaxed)
}
