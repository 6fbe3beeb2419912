//! Once-per-tick process and runtime counters.

use outrig_wire::RuntimeStats;

pub(crate) fn sample(tracked_task_count: u64, scheduler_worker_threads: u32) -> RuntimeStats {
    let (rss_bytes, virtual_bytes) = linux_memory();
    RuntimeStats {
        tracked_task_count,
        logical_cpu_count: std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1),
        scheduler_worker_threads,
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        runtime_version: rustc_version(),
        pid: std::process::id(),
        working_dir: std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        rss_bytes,
        virtual_bytes,
        // Not applicable: the Rust runtime has no garbage collector.
        gc_count: None,
        last_gc_unix_ms: None,
        cumulative_gc_pause_ns: None,
        sampled_at_unix_ms: crate::clock::now_unix_ms(),
    }
}

fn rustc_version() -> String {
    option_env!("OUTRIG_RUSTC_VERSION").unwrap_or("unknown").to_string()
}

#[cfg(target_os = "linux")]
fn linux_memory() -> (Option<u64>, Option<u64>) {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return (None, None);
    };
    let mut rss = None;
    let mut vsz = None;
    for line in status.lines() {
        if let Some(kb) = line.strip_prefix("VmRSS:") {
            rss = parse_kb(kb);
        } else if let Some(kb) = line.strip_prefix("VmSize:") {
            vsz = parse_kb(kb);
        }
    }
    (rss, vsz)
}

#[cfg(target_os = "linux")]
fn parse_kb(s: &str) -> Option<u64> {
    s.trim().trim_end_matches("kB").trim().parse::<u64>().ok().map(|kb| kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn linux_memory() -> (Option<u64>, Option<u64>) {
    (None, None)
}
