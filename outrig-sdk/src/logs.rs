//! Log capture: a `tracing_subscriber::fmt` tee writer always available, and
//! a best-effort Unix-only raw file descriptor duplication path for output
//! that bypasses `tracing` entirely.
//!
//! The fd-duplication technique (`libc::dup`/`dup2` into a pipe read on a
//! background thread) is grounded in the same low-level process/fd handling
//! the example pack's crash-tracking receiver uses to capture a child
//! process's stdout/stderr.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use outrig_wire::{LogLine, LogSource};

const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);
const BATCH_SIZE: usize = 64;

/// Global cap on bytes sitting between capture and the next batch flush,
/// shared by the tracing tee and the raw stdio capture threads so neither
/// path can alone blow past the configured buffer size. Lines that would
/// push the running total over the cap are dropped rather than queued.
pub struct ByteBudget {
    cap: u64,
    used: AtomicU64,
}

impl ByteBudget {
    pub(crate) fn new(cap_bytes: usize) -> Arc<Self> {
        Arc::new(Self { cap: cap_bytes as u64, used: AtomicU64::new(0) })
    }

    fn try_reserve(&self, len: u64) -> bool {
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                if used + len > self.cap {
                    None
                } else {
                    Some(used + len)
                }
            })
            .is_ok()
    }

    fn release(&self, len: u64) {
        self.used.fetch_sub(len.min(self.used.load(Ordering::Relaxed)), Ordering::Relaxed);
    }
}

struct Shared {
    seq: AtomicU64,
    sender: mpsc::Sender<LogLine>,
    dropped: AtomicU64,
    budget: Arc<ByteBudget>,
}

/// A `tracing_subscriber::fmt::MakeWriter` that writes every formatted line
/// to the real writer and also forwards it to the log collector.
#[derive(Clone)]
pub struct TeeWriter {
    shared: Arc<Shared>,
}

impl TeeWriter {
    pub(crate) fn new(sender: mpsc::Sender<LogLine>, budget: Arc<ByteBudget>) -> Self {
        Self {
            shared: Arc::new(Shared { seq: AtomicU64::new(0), sender, dropped: AtomicU64::new(0), budget }),
        }
    }

    fn push(&self, text: String) {
        if !self.shared.budget.try_reserve(text.len() as u64) {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let len = text.len() as u64;
        let line = LogLine {
            seq,
            source: LogSource::Tracing,
            text,
            logged_at_unix_ms: crate::clock::now_unix_ms(),
        };
        if self.shared.sender.try_send(line).is_err() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            self.shared.budget.release(len);
        }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(text) = std::str::from_utf8(buf) {
            for line in text.lines() {
                if !line.is_empty() {
                    self.push(line.to_string());
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for TeeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Batches incoming lines and flushes them to the packet queue either once
/// [`BATCH_SIZE`] lines have accumulated or every [`FLUSH_INTERVAL`],
/// whichever comes first.
pub(crate) async fn run_batcher(
    mut incoming: mpsc::Receiver<LogLine>,
    outgoing: mpsc::Sender<Vec<LogLine>>,
    budget: Arc<ByteBudget>,
) {
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    let mut flush_timer = tokio::time::interval(FLUSH_INTERVAL);
    loop {
        tokio::select! {
            maybe_line = incoming.recv() => {
                match maybe_line {
                    Some(line) => {
                        budget.release(line.text.len() as u64);
                        batch.push(line);
                        if batch.len() >= BATCH_SIZE {
                            let _ = outgoing.send(std::mem::take(&mut batch)).await;
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            let _ = outgoing.send(std::mem::take(&mut batch)).await;
                        }
                        return;
                    }
                }
            }
            _ = flush_timer.tick() => {
                if !batch.is_empty() {
                    let _ = outgoing.send(std::mem::take(&mut batch)).await;
                }
            }
        }
    }
}

/// Starts the best-effort raw stdout/stderr capture path. No-op (returns an
/// error) on non-Unix targets, since the mechanism is explicitly
/// platform-specific and not required for the log collector to function.
pub fn capture_stdio(sender: mpsc::Sender<LogLine>, budget: Arc<ByteBudget>) -> crate::error::Result<()> {
    #[cfg(unix)]
    {
        unix::capture_stdio(sender, budget)
    }
    #[cfg(not(unix))]
    {
        let _ = (sender, budget);
        Err(crate::error::Error::Unsupported)
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::fd::{AsRawFd, FromRawFd, RawFd};

    fn spawn_capture(
        fd_to_mirror: RawFd,
        source: LogSource,
        sender: mpsc::Sender<LogLine>,
        budget: Arc<ByteBudget>,
    ) -> io::Result<()> {
        let mut pipe_fds = [0 as RawFd; 2];
        // SAFETY: pipe() just asks the kernel for two fresh fds; the output
        // array is sized correctly and owned exclusively by this function.
        if unsafe { libc::pipe(pipe_fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let [read_fd, write_fd] = pipe_fds;

        // SAFETY: dup duplicates fd_to_mirror into a fresh fd this function
        // owns exclusively; used below to keep mirroring the original
        // destination (terminal, redirected file, ...) after dup2 below
        // steals fd_to_mirror's number for the pipe.
        let original_fd = unsafe { libc::dup(fd_to_mirror) };
        if original_fd < 0 {
            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
            }
            return Err(io::Error::last_os_error());
        }

        // SAFETY: dup2 replaces `fd_to_mirror` (1 or 2) with the pipe's
        // write end in this process; both fds are valid and owned here.
        if unsafe { libc::dup2(write_fd, fd_to_mirror) } < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(original_fd);
                libc::close(read_fd);
                libc::close(write_fd);
            }
            return Err(err);
        }
        // SAFETY: write_fd was just duplicated onto fd_to_mirror above; the
        // original descriptor returned by pipe() is no longer needed here.
        unsafe {
            libc::close(write_fd);
        }

        std::thread::Builder::new()
            .name("outrig-stdio-capture".into())
            .spawn(move || {
                // SAFETY: read_fd was returned by pipe() above and is not
                // used anywhere else; File takes exclusive ownership of it.
                let file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                // SAFETY: original_fd was duplicated above and is not used
                // anywhere else; this thread owns it exclusively.
                let mut original = unsafe { std::fs::File::from_raw_fd(original_fd) };
                let reader = io::BufReader::new(file);
                let mut seq: u64 = 0;
                use io::BufRead;
                for line in reader.lines().map_while(Result::ok) {
                    let _ = writeln!(original, "{line}");
                    if !budget.try_reserve(line.len() as u64) {
                        continue;
                    }
                    let entry = LogLine {
                        seq,
                        source,
                        text: line,
                        logged_at_unix_ms: crate::clock::now_unix_ms(),
                    };
                    seq += 1;
                    if sender.blocking_send(entry).is_err() {
                        return;
                    }
                }
            })?;
        Ok(())
    }

    pub(super) fn capture_stdio(sender: mpsc::Sender<LogLine>, budget: Arc<ByteBudget>) -> crate::error::Result<()> {
        let stdout_fd = io::stdout().as_raw_fd();
        let stderr_fd = io::stderr().as_raw_fd();
        spawn_capture(stdout_fd, LogSource::Stdout, sender.clone(), budget.clone())?;
        spawn_capture(stderr_fd, LogSource::Stderr, sender, budget)?;
        Ok(())
    }
}
