//! The process-wide singleton: owns the `AppRun` identity, the outgoing
//! packet queue, the watch registry, and the handles to every background
//! collector task. Splits "thing that observes events" from "thing that
//! periodically turns accumulated state into packets", but with a single
//! registry since Outrig has no separate resource/async-op taxonomy to
//! track.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use outrig_wire::{AppRun, FormatTag, Packet, PacketBody, StatusPacket};

use crate::config::Builder;
use crate::error::{Error, Result};
use crate::goroutine::GoroutineLayer;
use crate::periodic::PeriodicTask;
use crate::watch::{AtomicLoad, NewWatch, Registry, Watchable};

static HANDLE: OnceLock<Handle> = OnceLock::new();

/// Installs a default global subscriber combining the goroutine-tracking
/// layer with a `fmt` layer teeing formatted lines to the log collector.
/// Best-effort: if the host process has already installed its own
/// subscriber, this silently does nothing, and callers who need the
/// goroutine layer composed into their own stack should reach for
/// [`Handle::tracing_layer`] instead.
fn install_tracing(
    goroutines: Arc<GoroutineLayer>,
    log_tx: mpsc::Sender<outrig_wire::LogLine>,
    log_budget: Arc<crate::logs::ByteBudget>,
) {
    let fmt_layer =
        tracing_subscriber::fmt::layer().with_writer(crate::logs::TeeWriter::new(log_tx, log_budget));

    #[cfg(feature = "env-filter")]
    {
        let env_filter = tracing_subscriber::EnvFilter::try_from_env("OUTRIG_LOG")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(goroutines)
            .with(fmt_layer)
            .with(env_filter)
            .try_init();
    }
    #[cfg(not(feature = "env-filter"))]
    {
        let _ = tracing_subscriber::registry().with(goroutines).with(fmt_layer).try_init();
    }
}

struct Inner {
    app_run: AppRun,
    outgoing: mpsc::Sender<Packet>,
    /// Reserved, never-backpressured path for metadata packets (`apprun`,
    /// `status`, `appdone`) so a queue backed up with watch samples or log
    /// lines can never cause the monitor to lose the connection's identity
    /// or its terminal packet.
    priority_outgoing: mpsc::UnboundedSender<Packet>,
    watches: StdMutex<Registry>,
    goroutines: Arc<GoroutineLayer>,
    log_lines_sender: mpsc::Sender<outrig_wire::LogLine>,
    dropped_watch_samples: AtomicU64,
    dropped_log_lines: AtomicU64,
    enabled: AtomicBool,
    /// Kept alive (rather than leaked) so [`Handle::disable`]/[`Handle::enable`]
    /// can actually pause/resume every collector's periodic task, and so
    /// [`Handle::shutdown`] has something to cancel.
    periodic_tasks: StdMutex<Vec<PeriodicTask>>,
    shutdown: tokio_util::sync::CancellationToken,
}

/// The handle returned by [`Builder::build`]. Cheap to clone; every clone
/// refers to the same running SDK instance.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<Inner>,
}

pub(crate) fn start(builder: Builder) -> Handle {
    let app_run = AppRun::new(builder.app_name.clone(), module_path!())
        .with_started_at(crate::clock::now_unix_ms());
    let app_run = match builder.app_run_id {
        Some(id) => app_run.with_id(id),
        None => app_run,
    };

    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Packet>(builder.watch_queue_capacity);
    let (priority_tx, priority_rx) = mpsc::unbounded_channel::<Packet>();
    let (log_tx, log_rx) = mpsc::channel::<outrig_wire::LogLine>(builder.watch_queue_capacity);
    let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<outrig_wire::LogLine>>(64);

    let log_budget = crate::logs::ByteBudget::new(builder.log_buffer_bytes);

    let goroutines = GoroutineLayer::new();
    install_tracing(goroutines.clone(), log_tx.clone(), log_budget.clone());
    if builder.capture_stdio {
        if let Err(err) = crate::logs::capture_stdio(log_tx.clone(), log_budget.clone()) {
            tracing::warn!(%err, "stdio capture unavailable on this platform");
        }
    }

    let inner = Arc::new(Inner {
        app_run: app_run.clone(),
        outgoing: outgoing_tx.clone(),
        priority_outgoing: priority_tx,
        watches: StdMutex::new(Registry::default()),
        goroutines: goroutines.clone(),
        log_lines_sender: log_tx,
        dropped_watch_samples: AtomicU64::new(0),
        dropped_log_lines: AtomicU64::new(0),
        enabled: AtomicBool::new(true),
        periodic_tasks: StdMutex::new(Vec::new()),
        shutdown: tokio_util::sync::CancellationToken::new(),
    });

    let handle = Handle { inner: inner.clone() };

    run_on_dedicated_thread(move || {
        let addrs = builder.candidate_addrs();
        let identity = crate::transport::HandshakeIdentity {
            submode: None,
            app_run_id: Some(app_run.id),
        };
        // Every collector gets its own "next snapshot is full" flag so one
        // collector's tick consuming the signal doesn't swallow it for the
        // others — each must independently send a full snapshot as the
        // first packet of a new connection.
        let watch_just_reconnected = Arc::new(AtomicBool::new(true));
        let goroutine_just_reconnected = Arc::new(AtomicBool::new(true));
        let stats_just_reconnected = Arc::new(AtomicBool::new(true));

        {
            let watch_just_reconnected = watch_just_reconnected.clone();
            let goroutine_just_reconnected = goroutine_just_reconnected.clone();
            let stats_just_reconnected = stats_just_reconnected.clone();
            let shutdown = inner.shutdown.clone();
            tokio::spawn(crate::transport::run(
                addrs,
                identity,
                outgoing_rx,
                priority_rx,
                shutdown,
                move || {
                    watch_just_reconnected.store(true, Ordering::Relaxed);
                    goroutine_just_reconnected.store(true, Ordering::Relaxed);
                    stats_just_reconnected.store(true, Ordering::Relaxed);
                },
            ));
        }

        tokio::spawn(crate::logs::run_batcher(log_rx, batch_tx, log_budget));

        {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(batch) = batch_rx.recv().await {
                    send_or_count_dropped(
                        &inner.outgoing,
                        Packet::delta(crate::clock::now_unix_ms(), PacketBody::LogLines { lines: batch }),
                        &inner.dropped_log_lines,
                    );
                }
            });
        }

        let watch_tick = {
            let inner = inner.clone();
            let just_reconnected = watch_just_reconnected.clone();
            move || {
                let inner = inner.clone();
                let just_reconnected = just_reconnected.clone();
                async move {
                    let mut dropped_count: u32 = 0;
                    let full = just_reconnected.swap(false, Ordering::Relaxed);
                    let mut watches = inner.watches.lock().unwrap();
                    if full {
                        let _ = inner.priority_outgoing.send(Packet::full(
                            crate::clock::now_unix_ms(),
                            PacketBody::AppRun(inner.app_run.clone()),
                        ));
                        if !send_or_count_dropped(
                            &inner.outgoing,
                            Packet::full(
                                crate::clock::now_unix_ms(),
                                PacketBody::WatchDecls { decls: watches.decls_full() },
                            ),
                            &inner.dropped_watch_samples,
                        ) {
                            dropped_count += 1;
                        }
                        if !send_or_count_dropped(
                            &inner.outgoing,
                            Packet::full(
                                crate::clock::now_unix_ms(),
                                PacketBody::WatchSamples { samples: watches.full_samples() },
                            ),
                            &inner.dropped_watch_samples,
                        ) {
                            dropped_count += 1;
                        }
                        // A full snapshot resends the registration-error
                        // stream's entire history, not just what accrued
                        // since the last delta flush.
                        if !send_or_count_dropped(
                            &inner.outgoing,
                            Packet::full(
                                crate::clock::now_unix_ms(),
                                PacketBody::RegistrationErrors { errors: watches.errors_full() },
                            ),
                            &inner.dropped_watch_samples,
                        ) {
                            dropped_count += 1;
                        }
                        // Any push that landed before this connection's
                        // first tick is already reflected in full_samples
                        // above; drop the queue instead of resending it.
                        watches.drain_pushes();
                    } else {
                        let decl_deltas = watches.decls_delta();
                        if !decl_deltas.is_empty()
                            && !send_or_count_dropped(
                                &inner.outgoing,
                                Packet::delta(
                                    crate::clock::now_unix_ms(),
                                    PacketBody::WatchDecls { decls: decl_deltas },
                                ),
                                &inner.dropped_watch_samples,
                            )
                        {
                            dropped_count += 1;
                        }
                    }
                    // Polled watches elide unchanged readings to `Same`;
                    // push watches never do, since every push() call is its
                    // own discrete event rather than a reading of current
                    // state — queued pushes are appended, not merged in.
                    let mut samples = watches.poll_tick();
                    samples.extend(watches.drain_pushes());
                    // Errors raised by this tick's poll (lock timeout,
                    // panic, oversized value) always flush as a delta, even
                    // on an otherwise-full tick: the full flush above
                    // already covers everything recorded before this poll.
                    let errors = watches.errors_delta();
                    drop(watches);
                    if !samples.is_empty()
                        && !send_or_count_dropped(
                            &inner.outgoing,
                            Packet::delta(
                                crate::clock::now_unix_ms(),
                                PacketBody::WatchSamples { samples },
                            ),
                            &inner.dropped_watch_samples,
                        )
                    {
                        dropped_count += 1;
                    }
                    if !errors.is_empty()
                        && !send_or_count_dropped(
                            &inner.outgoing,
                            Packet::delta(
                                crate::clock::now_unix_ms(),
                                PacketBody::RegistrationErrors { errors },
                            ),
                            &inner.dropped_watch_samples,
                        )
                    {
                        dropped_count += 1;
                    }
                    if dropped_count > 0 {
                        return Err(format!("dropped {dropped_count} packet(s) this tick"));
                    }
                    Ok(())
                }
            }
        };
        let watch_task = PeriodicTask::spawn("watch-poll", builder.publish_interval, watch_tick);

        let goroutine_tick = {
            let inner = inner.clone();
            let goroutines = goroutines.clone();
            let just_reconnected = goroutine_just_reconnected.clone();
            move || {
                let inner = inner.clone();
                let goroutines = goroutines.clone();
                let just_reconnected = just_reconnected.clone();
                async move {
                    let full = just_reconnected.swap(false, Ordering::Relaxed);
                    let routines = goroutines.tick(crate::clock::now_unix_ms());
                    let packet = if full {
                        Packet::full(crate::clock::now_unix_ms(), PacketBody::GoRoutines { routines })
                    } else {
                        Packet::delta(crate::clock::now_unix_ms(), PacketBody::GoRoutines { routines })
                    };
                    if send_or_count_dropped(&inner.outgoing, packet, &inner.dropped_watch_samples) {
                        Ok(())
                    } else {
                        Err("dropped goroutine snapshot this tick".to_string())
                    }
                }
            }
        };
        let goroutine_task = PeriodicTask::spawn("goroutine-poll", builder.publish_interval, goroutine_tick);

        let stats_tick = {
            let inner = inner.clone();
            let just_reconnected = stats_just_reconnected.clone();
            move || {
                let inner = inner.clone();
                let just_reconnected = just_reconnected.clone();
                async move {
                    let full = just_reconnected.swap(false, Ordering::Relaxed);
                    let tracked_task_count = inner.goroutines.tracked_count();
                    let scheduler_worker_threads =
                        std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1);
                    let stats = crate::runtime_stats::sample(tracked_task_count, scheduler_worker_threads);
                    let packet = if full {
                        Packet::full(crate::clock::now_unix_ms(), PacketBody::RuntimeStats(stats))
                    } else {
                        Packet::delta(crate::clock::now_unix_ms(), PacketBody::RuntimeStats(stats))
                    };
                    if send_or_count_dropped(&inner.outgoing, packet, &inner.dropped_watch_samples) {
                        Ok(())
                    } else {
                        Err("dropped runtime-stats snapshot this tick".to_string())
                    }
                }
            }
        };
        let stats_task =
            PeriodicTask::spawn("runtime-stats-poll", builder.publish_interval * 5, stats_tick);

        let status_tick = {
            let inner = inner.clone();
            move || {
                let inner = inner.clone();
                async move {
                    // Surface the most recent collector-tick failure, if
                    // any, alongside the drop counters — this is the one
                    // place a `PeriodicTask`'s last-run error actually
                    // reaches the monitor.
                    let error = inner
                        .periodic_tasks
                        .lock()
                        .unwrap()
                        .iter()
                        .find_map(|task| task.last_error())
                        .map(|message| outrig_wire::ProtocolError {
                            code: "collector_tick_failed".to_string(),
                            message,
                        });
                    let status = StatusPacket {
                        dropped_watch_samples: inner.dropped_watch_samples.swap(0, Ordering::Relaxed),
                        dropped_log_lines: inner.dropped_log_lines.swap(0, Ordering::Relaxed),
                        error,
                    };
                    if inner
                        .priority_outgoing
                        .send(Packet::delta(crate::clock::now_unix_ms(), PacketBody::Status(status)))
                        .is_ok()
                    {
                        Ok(())
                    } else {
                        Err("status packet channel closed".to_string())
                    }
                }
            }
        };
        let status_task = PeriodicTask::spawn("status-poll", builder.publish_interval * 10, status_tick);

        inner.periodic_tasks.lock().unwrap().extend([
            watch_task,
            goroutine_task,
            stats_task,
            status_task,
        ]);

        std::future::pending::<()>()
    });

    handle
}

/// Drops the newest packet on backpressure rather than blocking a collector
/// tick, counting the drop for the next status packet. Only ever used for
/// watch samples, registration errors, watch decls, log lines, goroutine
/// snapshots and runtime stats — metadata packets (`apprun`, `status`,
/// `appdone`) bypass this path entirely over a reserved unbounded channel.
/// Returns whether the packet was actually sent, so a tick can fold the
/// outcome of its sends into its own last-run result.
fn send_or_count_dropped(sender: &mpsc::Sender<Packet>, packet: Packet, dropped: &AtomicU64) -> bool {
    if sender.try_send(packet).is_ok() {
        true
    } else {
        dropped.fetch_add(1, Ordering::Relaxed);
        false
    }
}

fn run_on_dedicated_thread<F, Fut>(main: F)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + 'static,
{
    std::thread::Builder::new()
        .name("outrig-sdk".into())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to start outrig runtime");
            // LocalSet isn't required: every task spawned here is `Send`.
            runtime.block_on(async move {
                tokio::spawn(main()).await.ok();
            });
        })
        .expect("failed to spawn outrig-sdk thread");
}

impl Handle {
    pub fn new_watch(&self, name: impl Into<String>) -> NewWatch<'_> {
        NewWatch::new(self, name)
    }

    /// The goroutine-tracking `tracing_subscriber::Layer`, for a caller that
    /// wants to compose it into their own subscriber stack instead of
    /// relying on the default one [`start`] installs.
    pub fn tracing_layer<S>(&self) -> impl tracing_subscriber::Layer<S>
    where
        S: tracing_core::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        self.inner.goroutines.clone()
    }

    pub(crate) fn register_sync<T: Watchable + Send + 'static>(
        &self,
        name: String,
        format: FormatTag,
        value: Arc<StdMutex<T>>,
    ) -> Result<()> {
        self.inner.watches.lock().unwrap().register_sync(name, format, value)
    }

    pub(crate) fn register_atomic(
        &self,
        name: String,
        format: FormatTag,
        value: Arc<dyn AtomicLoad>,
    ) -> Result<()> {
        self.inner.watches.lock().unwrap().register_atomic(name, format, value)
    }

    pub(crate) fn register_func(
        &self,
        name: String,
        format: FormatTag,
        f: impl Fn() -> crate::watch::Captured + Send + Sync + 'static,
    ) -> Result<()> {
        self.inner.watches.lock().unwrap().register_func(name, format, f)
    }

    pub(crate) fn register_push(&self, name: String, format: FormatTag) -> Result<()> {
        self.inner.watches.lock().unwrap().register_push(name, format)
    }

    pub(crate) fn register_static(
        &self,
        name: String,
        format: FormatTag,
        initial: crate::watch::Captured,
    ) -> Result<()> {
        self.inner.watches.lock().unwrap().register_static(name, format, initial)
    }

    pub fn push(&self, name: &str, value: impl Watchable) -> Result<()> {
        let captured = value.capture(FormatTag::Json);
        self.inner.watches.lock().unwrap().push(name, captured)
    }

    /// Registers `name` as a push watch on first call, then pushes `value`;
    /// subsequent calls with the same name just push. Lets a caller start
    /// reporting a value without a separate up-front registration step.
    pub fn track_value(&self, name: &str, value: impl Watchable) -> Result<()> {
        let mut watches = self.inner.watches.lock().unwrap();
        if !watches.contains(name) {
            watches.register_push(name.to_string(), FormatTag::Json)?;
        }
        let captured = value.capture(FormatTag::Json);
        watches.push(name, captured)
    }

    pub fn unregister(&self, name: &str) {
        self.inner.watches.lock().unwrap().unregister(name);
    }

    /// Annotates the task whose span is currently entered on this thread,
    /// if any, with a human-readable name surfaced alongside its goroutine
    /// dump entry.
    pub fn set_goroutine_name(&self, name: impl Into<String>) {
        if let Some(id) = tracing::Span::current().id() {
            self.inner.goroutines.set_name(id.into_u64(), name.into());
        }
    }

    pub fn log_sender(&self) -> mpsc::Sender<outrig_wire::LogLine> {
        self.inner.log_lines_sender.clone()
    }

    pub fn app_run(&self) -> &AppRun {
        &self.inner.app_run
    }

    pub fn app_done(&self) {
        let _ = self
            .inner
            .priority_outgoing
            .send(Packet::delta(crate::clock::now_unix_ms(), PacketBody::AppDone));
    }

    /// Whether the SDK is currently enabled. A disabled SDK still accepts
    /// registration and push calls (they're cheap no-ops against an idle
    /// registry) but stops polling and stops transmitting.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Pauses every periodic collector task at its next tick boundary.
    /// In-flight ticks run to completion; this does not touch the
    /// transport connection.
    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::Relaxed);
        for task in self.inner.periodic_tasks.lock().unwrap().iter() {
            task.set_paused(true);
        }
    }

    /// Resumes a previously [`disable`](Handle::disable)d SDK.
    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::Relaxed);
        for task in self.inner.periodic_tasks.lock().unwrap().iter() {
            task.set_paused(false);
        }
    }

    /// Best-effort flush, terminal `appdone` packet, then tears down every
    /// background task: periodic collectors stop, and the transport's
    /// connect/reconnect loop is told to stop at its next suspension point
    /// and close the socket. Safe to call from a panic hook — nothing here
    /// can itself panic or block.
    pub fn shutdown(&self) {
        self.app_done();
        self.disable();
        self.inner.shutdown.cancel();
    }
}

/// Process-wide accessor for the handle stashed by [`crate::init`].
pub(crate) fn global() -> Option<&'static Handle> {
    HANDLE.get()
}

pub(crate) fn set_global(handle: Handle) -> Result<()> {
    HANDLE.set(handle).map_err(|_| Error::AlreadyInitialized)
}
