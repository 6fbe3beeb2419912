use serde::{Deserialize, Serialize};

/// Once-per-tick process and runtime counters.
///
/// The memory-accounting fields are populated from OS-level counters on
/// platforms where they're available (Linux `/proc/self/status`) and the
/// GC-specific fields are always reported as absent: the Rust runtime has
/// no garbage collector, so there is nothing meaningful to report there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub tracked_task_count: u64,
    pub logical_cpu_count: u32,
    pub scheduler_worker_threads: u32,
    pub os: String,
    pub arch: String,
    pub runtime_version: String,
    pub pid: u32,
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rss_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gc_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_gc_unix_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_gc_pause_ns: Option<u64>,
    pub sampled_at_unix_ms: i64,
}
