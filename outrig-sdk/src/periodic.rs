use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

/// Last-run bookkeeping for a single [`PeriodicTask`], read back through
/// [`PeriodicTask::last_duration`]/[`PeriodicTask::last_error`].
#[derive(Default)]
struct LastRun {
    duration: Option<Duration>,
    error: Option<String>,
}

/// Runs an async closure on a fixed period, skipping missed ticks rather
/// than queueing them up, so a slow tick never causes a burst of
/// back-to-back catch-up runs. Pausable and cancellable independently of
/// the controller that owns it.
pub(crate) struct PeriodicTask {
    paused: Arc<AtomicBool>,
    cancel: tokio_util::sync::CancellationToken,
    last_run: Arc<StdMutex<LastRun>>,
}

impl PeriodicTask {
    pub(crate) fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send,
    {
        let paused = Arc::new(AtomicBool::new(false));
        let cancel = tokio_util::sync::CancellationToken::new();
        let last_run = Arc::new(StdMutex::new(LastRun::default()));

        let task_paused = paused.clone();
        let task_cancel = cancel.clone();
        let task_last_run = last_run.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = interval.tick() => {
                        if task_paused.load(Ordering::Relaxed) {
                            continue;
                        }
                        let start = Instant::now();
                        let result = tick().await;
                        let elapsed = start.elapsed();
                        tracing::trace!(task = name, ?elapsed, ok = result.is_ok(), "periodic tick complete");
                        let mut last_run = task_last_run.lock().unwrap();
                        last_run.duration = Some(elapsed);
                        if let Err(message) = result {
                            tracing::warn!(task = name, %message, "periodic tick reported a failure");
                            last_run.error = Some(message);
                        }
                    }
                }
            }
        });

        Self { paused, cancel, last_run }
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Wall-clock time the most recently completed tick took to run, if any
    /// tick has run yet.
    pub(crate) fn last_duration(&self) -> Option<Duration> {
        self.last_run.lock().unwrap().duration
    }

    /// The message from the most recent tick that returned `Err`, if any
    /// has. Not cleared by a subsequent successful tick, since the point is
    /// to surface the last thing that actually went wrong.
    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_run.lock().unwrap().error.clone()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
