//! Connection establishment, handshake and reconnect-with-backoff.
//!
//! Uses the line-framed I/O idiom common for child-process stream handling
//! (`BufReader::new(stream).lines()`), applied here to a socket instead of a
//! pipe, with newline-delimited `serde_json` for each framed packet.

use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::mpsc;

use outrig_wire::{
    ClientHandshake, ConnMode, Packet, SdkVersion, ServerHello, MAGIC_LINE,
    MIN_REQUIRED_SERVER_VERSION,
};

use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub(crate) fn sdk_version() -> SdkVersion {
    SdkVersion::new(
        env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
        env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
        env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
    )
}

/// Identifying details a connection carries into its handshake line. Kept
/// as one struct so `connect_once` doesn't grow an unbounded parameter
/// list as the handshake picks up more fields.
#[derive(Clone)]
pub(crate) struct HandshakeIdentity {
    pub(crate) submode: Option<String>,
    pub(crate) app_run_id: Option<uuid::Uuid>,
}

/// A configured place the SDK might find a monitor listening.
#[derive(Debug, Clone)]
pub(crate) enum ServerAddr {
    Unix(String),
    Tcp(String),
}

enum Conn {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Conn {
    async fn dial(addr: &ServerAddr) -> std::io::Result<Self> {
        match addr {
            ServerAddr::Unix(path) => {
                // Cheap existence check before paying for a connect attempt;
                // a stale socket file from a crashed monitor fails fast.
                if tokio::fs::metadata(path).await.is_err() {
                    return Err(std::io::Error::from(std::io::ErrorKind::NotFound));
                }
                Ok(Conn::Unix(UnixStream::connect(path).await?))
            }
            ServerAddr::Tcp(addr) => Ok(Conn::Tcp(TcpStream::connect(addr).await?)),
        }
    }

    fn is_tcp(&self) -> bool {
        matches!(self, Conn::Tcp(_))
    }
}

/// Detects whether the process looks like it's running inside a container,
/// so the `host.docker.internal` candidate is only tried when it might
/// plausibly resolve. Best-effort: absence of the heuristic's signal is
/// simply treated as "not containerized".
pub(crate) fn looks_containerized() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/1/cgroup")
            .map(|s| s.contains("docker") || s.contains("kubepods"))
            .unwrap_or(false)
            || std::path::Path::new("/.dockerenv").exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Dials each candidate in order, performing the handshake on the first one
/// that accepts a TCP/Unix connection. Returns the framed reader/writer pair
/// once a compatible monitor has accepted the handshake.
async fn connect_once(
    addrs: &[ServerAddr],
    identity: &HandshakeIdentity,
) -> Result<(BufReader<tokio::io::ReadHalf<ConnStream>>, tokio::io::WriteHalf<ConnStream>)> {
    for addr in addrs {
        let conn = match tokio::time::timeout(CONNECT_TIMEOUT, Conn::dial(addr)).await {
            Ok(Ok(conn)) => conn,
            _ => continue,
        };
        let is_tcp = conn.is_tcp();
        let stream = ConnStream::from(conn);
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        if is_tcp {
            write_half.write_all(MAGIC_LINE.as_bytes()).await.ok();
            write_half.write_all(b"\n").await.ok();
        }

        // Step 1: the monitor announces its version before either side
        // commits to anything else.
        let mut hello_line = String::new();
        if reader.read_line(&mut hello_line).await.unwrap_or(0) == 0 {
            continue;
        }
        let hello: ServerHello = match serde_json::from_str(hello_line.trim_end()) {
            Ok(h) => h,
            Err(_) => continue,
        };
        if hello.outrigversion < MIN_REQUIRED_SERVER_VERSION {
            return Err(Error::HandshakeIncompatible(format!(
                "monitor version {} is older than the minimum required {}",
                hello.outrigversion, MIN_REQUIRED_SERVER_VERSION
            )));
        }

        // Step 2: only now does the client send its own handshake line.
        let client_hello = ClientHandshake {
            outrigsdk: sdk_version(),
            mode: ConnMode::Packet,
            submode: identity.submode.clone(),
            apprunid: identity.app_run_id,
        };
        let mut line = serde_json::to_string(&client_hello).map_err(outrig_wire::Error::from)?;
        line.push('\n');
        if write_half.write_all(line.as_bytes()).await.is_err() {
            continue;
        }

        let mut reply = String::new();
        if reader.read_line(&mut reply).await.unwrap_or(0) == 0 {
            continue;
        }
        let reply: outrig_wire::ServerHandshake = match serde_json::from_str(reply.trim_end()) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if !reply.success {
            return Err(Error::HandshakeIncompatible(
                reply.error.unwrap_or_else(|| "rejected by monitor".to_string()),
            ));
        }
        return Ok((reader, write_half));
    }
    Err(Error::ConnectAddrsExhausted)
}

enum ConnStream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl From<Conn> for ConnStream {
    fn from(c: Conn) -> Self {
        match c {
            Conn::Unix(s) => ConnStream::Unix(s),
            Conn::Tcp(s) => ConnStream::Tcp(s),
        }
    }
}

impl tokio::io::AsyncRead for ConnStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ConnStream::Unix(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            ConnStream::Tcp(s) => std::pin::Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for ConnStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ConnStream::Unix(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            ConnStream::Tcp(s) => std::pin::Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ConnStream::Unix(s) => std::pin::Pin::new(s).poll_flush(cx),
            ConnStream::Tcp(s) => std::pin::Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ConnStream::Unix(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            ConnStream::Tcp(s) => std::pin::Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Owns the connection lifecycle: dial, handshake, write outgoing packets,
/// reconnect with exponential backoff and jitter on any transient failure.
/// Runs for the lifetime of the process as one of the controller's
/// background tasks.
pub(crate) async fn run(
    addrs: Vec<ServerAddr>,
    identity: HandshakeIdentity,
    mut outgoing: mpsc::Receiver<Packet>,
    mut priority_outgoing: mpsc::UnboundedReceiver<Packet>,
    shutdown: tokio_util::sync::CancellationToken,
    on_reconnect: impl Fn() + Send + Sync + 'static,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        match connect_once(&addrs, &identity).await {
            Ok((mut reader, mut writer)) => {
                backoff = INITIAL_BACKOFF;
                on_reconnect();
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            let _ = writer.shutdown().await;
                            return;
                        }
                        // Metadata packets (apprun, status, appdone) jump
                        // the line ahead of ordinary sample/log traffic, so
                        // a backed-up queue never costs the monitor the
                        // connection's identity or its terminal packet.
                        maybe_packet = priority_outgoing.recv() => {
                            let Some(packet) = maybe_packet else { return };
                            let Ok(mut line) = serde_json::to_string(&packet) else { continue };
                            line.push('\n');
                            if writer.write_all(line.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                        maybe_packet = outgoing.recv() => {
                            let Some(packet) = maybe_packet else { return };
                            let Ok(mut line) = serde_json::to_string(&packet) else { continue };
                            line.push('\n');
                            if writer.write_all(line.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                        // The monitor never sends unsolicited lines in this
                        // protocol version, but reading keeps us aware the
                        // instant the peer closes the connection.
                        n = drain_peer_line(&mut reader) => {
                            if n == 0 {
                                break;
                            }
                        }
                    }
                }
            }
            Err(Error::HandshakeIncompatible(_)) => {
                tracing::warn!("monitor rejected SDK version; not retrying");
                return;
            }
            Err(_) => {}
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(jittered(backoff)) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn drain_peer_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> usize {
    let mut buf = String::new();
    reader.read_line(&mut buf).await.unwrap_or(0)
}

fn jittered(base: Duration) -> Duration {
    let jitter_ms = rand::rng().random_range(0..=(base.as_millis() as u64 / 4).max(1));
    base + Duration::from_millis(jitter_ms)
}
