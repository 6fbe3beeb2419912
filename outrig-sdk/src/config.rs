use std::env;
use std::time::Duration;

use crate::transport::ServerAddr;

pub(crate) const DEFAULT_DOMAIN_SOCKET_PATH: &str = "/tmp/outrig.sock";
pub(crate) const DEFAULT_TCP_ADDR: &str = "127.0.0.1:16387";
const DEFAULT_WATCH_QUEUE_CAPACITY: usize = 1024 * 4;
const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_LOG_BUFFER_BYTES: usize = 1024 * 1024;

/// Builds an [`crate::Handle`], the one entry point into the SDK.
///
/// Mirrors the shape of a typical tracing-layer builder: every knob has a
/// sensible default, setters are fluent, and [`Builder::with_default_env`]
/// lets a deployment override any of them without a code change.
#[derive(Debug, Clone)]
pub struct Builder {
    pub(crate) app_name: String,
    pub(crate) app_run_id: Option<uuid::Uuid>,
    pub(crate) domain_socket_path: Option<String>,
    pub(crate) tcp_addr: Option<String>,
    pub(crate) disable_docker_probe: bool,
    pub(crate) watch_queue_capacity: usize,
    pub(crate) publish_interval: Duration,
    pub(crate) log_buffer_bytes: usize,
    pub(crate) capture_stdio: bool,
    pub(crate) enable_self_trace: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            app_name: env::current_exe()
                .ok()
                .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "outrig-app".to_string()),
            app_run_id: None,
            domain_socket_path: None,
            tcp_addr: None,
            disable_docker_probe: false,
            watch_queue_capacity: DEFAULT_WATCH_QUEUE_CAPACITY,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            log_buffer_bytes: DEFAULT_LOG_BUFFER_BYTES,
            capture_stdio: false,
            enable_self_trace: false,
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn app_run_id(mut self, id: uuid::Uuid) -> Self {
        self.app_run_id = Some(id);
        self
    }

    pub fn domain_socket_path(mut self, path: impl Into<String>) -> Self {
        self.domain_socket_path = Some(path.into());
        self
    }

    pub fn tcp_addr(mut self, addr: impl Into<String>) -> Self {
        self.tcp_addr = Some(addr.into());
        self
    }

    pub fn disable_docker_probe(mut self, disable: bool) -> Self {
        self.disable_docker_probe = disable;
        self
    }

    pub fn watch_queue_capacity(mut self, capacity: usize) -> Self {
        self.watch_queue_capacity = capacity;
        self
    }

    pub fn publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    pub fn log_buffer_bytes(mut self, bytes: usize) -> Self {
        self.log_buffer_bytes = bytes;
        self
    }

    /// Enable the best-effort, Unix-only raw file descriptor duplication
    /// capture path described in the log collector design, in addition to
    /// the always-on tracing tee.
    pub fn capture_stdio(mut self, enable: bool) -> Self {
        self.capture_stdio = enable;
        self
    }

    pub fn enable_self_trace(mut self, enable: bool) -> Self {
        self.enable_self_trace = enable;
        self
    }

    /// Overrides any field for which the corresponding `OUTRIG_*`
    /// environment variable is set. Invalid values are logged and ignored
    /// rather than causing `with_default_env` to fail, the same tolerant
    /// policy the rest of the SDK applies to malformed external input.
    pub fn with_default_env(mut self) -> Self {
        if let Ok(path) = env::var("OUTRIG_DOMAIN_SOCKET") {
            self.domain_socket_path = Some(path);
        }
        if let Ok(addr) = env::var("OUTRIG_TCP_ADDR") {
            self.tcp_addr = Some(addr);
        }
        if let Ok(flag) = env::var("OUTRIG_DISABLE_DOCKER_PROBE") {
            self.disable_docker_probe = parse_bool(&flag).unwrap_or(self.disable_docker_probe);
        }
        if let Ok(name) = env::var("OUTRIG_APP_NAME") {
            self.app_name = name;
        }
        if let Ok(id) = env::var("OUTRIG_APP_RUN_ID") {
            match id.parse() {
                Ok(id) => self.app_run_id = Some(id),
                Err(_) => tracing::warn!(value = %id, "ignoring malformed OUTRIG_APP_RUN_ID"),
            }
        }
        if let Ok(interval) = env::var("OUTRIG_PUBLISH_INTERVAL") {
            match interval.parse::<humantime::Duration>() {
                Ok(d) => self.publish_interval = d.into(),
                Err(_) => tracing::warn!(value = %interval, "ignoring malformed OUTRIG_PUBLISH_INTERVAL"),
            }
        }
        self
    }

    /// Builds the ordered candidate list for peer discovery: domain socket,
    /// then TCP, then (inside a container) the Docker-host probe. A
    /// configured value of `"-"` disables that candidate entirely.
    pub(crate) fn candidate_addrs(&self) -> Vec<ServerAddr> {
        let mut addrs = Vec::new();
        let socket_path = self.domain_socket_path.as_deref().unwrap_or(DEFAULT_DOMAIN_SOCKET_PATH);
        if socket_path != "-" {
            addrs.push(ServerAddr::Unix(socket_path.to_string()));
        }
        let tcp_addr = self.tcp_addr.as_deref().unwrap_or(DEFAULT_TCP_ADDR);
        if tcp_addr != "-" {
            addrs.push(ServerAddr::Tcp(tcp_addr.to_string()));
        }
        if !self.disable_docker_probe && crate::transport::looks_containerized() {
            addrs.push(ServerAddr::Tcp("host.docker.internal:16387".to_string()));
        }
        addrs
    }

    /// Builds and starts the SDK: spawns the transport/controller/collector
    /// tasks on the calling tokio runtime and returns a [`crate::Handle`]
    /// usable from any task.
    pub fn build(self) -> crate::Handle {
        crate::controller::start(self)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_try_both_unix_and_tcp() {
        let addrs = Builder::new().candidate_addrs();
        assert!(matches!(addrs[0], ServerAddr::Unix(_)));
        assert!(matches!(addrs[1], ServerAddr::Tcp(_)));
    }

    #[test]
    fn dash_disables_domain_socket() {
        let addrs = Builder::new().domain_socket_path("-").candidate_addrs();
        assert_eq!(addrs.len(), 1);
        assert!(matches!(addrs[0], ServerAddr::Tcp(_)));
    }

    #[test]
    fn dash_disables_tcp() {
        let addrs = Builder::new().tcp_addr("-").candidate_addrs();
        assert_eq!(addrs.len(), 1);
        assert!(matches!(addrs[0], ServerAddr::Unix(_)));
    }

    #[test]
    fn dash_disables_both() {
        let addrs = Builder::new().domain_socket_path("-").tcp_addr("-").candidate_addrs();
        assert!(addrs.is_empty());
    }
}
