//! TCP/JSON Transport
//!
//! Envelopes travel as newline-terminated JSON documents over plain TCP.
//!
//! Client side: one writer task per destination endpoint owns a lazily
//! opened connection and drains an unbounded queue, so `send` never blocks
//! and envelopes to one endpoint leave in the order they were sent. A failed
//! write is retried on a fresh connection at most [`MAX_RECONNECTS`] times;
//! after that the envelope is dropped and `TransportSendFailed` is reported
//! to the sending runtime. A cached connection the peer has closed is
//! replaced before it is written to. Writers that go idle or give up on
//! their endpoint unregister themselves.
//!
//! Server side: each accepted connection gets its own task reading lines up
//! to `max_frame_bytes`. Decoded envelopes are handed to the membrane's
//! inbox with [`Inbox::enqueue`], which runs delivery on the membrane's
//! dispatch loop rather than on the socket task.

use super::{Inbox, MetricsTracker, Transport, TransportMetrics};
use crate::envelope::{Envelope, TransportConfig};
use crate::error::{NetworkError, Result};
use actors::Runtime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Reconnect attempts after the initial send fails
pub const MAX_RECONNECTS: u32 = 2;

/// TCP transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSettings {
    /// Connection establishment timeout
    pub connect_timeout_ms: u64,
    /// Timeout for writing one frame
    pub write_timeout_ms: u64,
    /// Largest accepted frame, newline excluded
    pub max_frame_bytes: usize,
    /// An endpoint's writer task exits after this long without envelopes
    pub writer_idle_ms: u64,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            max_frame_bytes: 16 * 1024 * 1024, // 16MB
            writer_idle_ms: 60_000,
        }
    }
}

impl TcpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn writer_idle(&self) -> Duration {
        Duration::from_millis(self.writer_idle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Endpoint {
    pub(crate) ip: String,
    pub(crate) port: u16,
}

impl Endpoint {
    pub(crate) fn from_config(config: &TransportConfig) -> Result<Self> {
        let (ip, port) = config.tcp_endpoint()?;
        Ok(Self {
            ip: ip.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

/// Client connection wrapper
pub(crate) struct TcpConnection {
    stream: TcpStream,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) bytes_sent: u64,
}

impl TcpConnection {
    pub(crate) fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            bytes_sent: 0,
        }
    }

    /// Connect with timeout
    pub(crate) async fn connect(ip: &str, port: u16, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((ip, port)))
            .await
            .map_err(|_| NetworkError::timeout("TCP connect", timeout.as_millis() as u64))?
            .map_err(|e| NetworkError::io(format!("failed to connect to {}:{}", ip, port), e))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let peer_addr = stream
            .peer_addr()
            .map_err(|e| NetworkError::io("failed to get peer address", e))?;

        Ok(Self::new(stream, peer_addr))
    }

    /// True once the peer has closed or reset the connection
    ///
    /// Writes to a closed peer are still accepted by the kernel, so a cached
    /// connection is checked before reuse. Peers never write on client
    /// connections; stray bytes are discarded.
    pub(crate) fn peer_closed(&self) -> bool {
        let mut buf = [0u8; 64];
        match self.stream.try_read(&mut buf) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }

    /// Write one complete frame with timeout
    pub(crate) async fn write_frame(&mut self, frame: &[u8], timeout: Duration) -> Result<()> {
        let stream = &mut self.stream;
        tokio::time::timeout(timeout, async move {
            stream.write_all(frame).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| NetworkError::timeout("TCP write", timeout.as_millis() as u64))?
        .map_err(|e| NetworkError::io("failed to write frame", e))?;

        self.bytes_sent += frame.len() as u64;
        debug!(
            peer = %self.peer_addr,
            bytes = frame.len(),
            total_sent = self.bytes_sent,
            "Sent frame over TCP"
        );
        Ok(())
    }
}

struct Outgoing {
    envelope: Envelope,
    runtime: Runtime,
}

type Writers = Arc<Mutex<HashMap<Endpoint, mpsc::UnboundedSender<Outgoing>>>>;

struct Listener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

/// TCP/JSON transport driven by a tokio runtime
pub struct TcpTransport {
    handle: Handle,
    settings: TcpSettings,
    writers: Writers,
    listeners: Mutex<HashMap<Endpoint, Listener>>,
    metrics: MetricsTracker,
}

impl TcpTransport {
    /// Transport whose socket tasks run on `handle`
    pub fn new(handle: Handle, settings: TcpSettings) -> Self {
        Self {
            handle,
            settings,
            writers: Arc::new(Mutex::new(HashMap::new())),
            listeners: Mutex::new(HashMap::new()),
            metrics: MetricsTracker::new(),
        }
    }

    /// Transport on the tokio runtime the caller is running in
    pub fn from_current(settings: TcpSettings) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            NetworkError::configuration(format!("no tokio runtime available: {}", e), None)
        })?;
        Ok(Self::new(handle, settings))
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }

    /// Addresses of the active listeners
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .lock()
            .values()
            .map(|listener| listener.local_addr)
            .collect()
    }

    /// Number of endpoints with a live writer task
    pub fn active_writers(&self) -> usize {
        self.writers.lock().len()
    }

    fn spawn_writer(&self, endpoint: Endpoint) -> mpsc::UnboundedSender<Outgoing> {
        let (sender, queue) = mpsc::unbounded_channel();
        self.handle.spawn(run_writer(
            endpoint,
            queue,
            Arc::clone(&self.writers),
            self.settings.clone(),
            self.metrics.clone(),
        ));
        sender
    }
}

impl Transport for TcpTransport {
    fn protocol(&self) -> &str {
        TransportConfig::TCP
    }

    fn send(&self, destination: &TransportConfig, envelope: Envelope, runtime: &Runtime) -> Result<()> {
        let endpoint = Endpoint::from_config(destination)?;
        let mut outgoing = Outgoing {
            envelope,
            runtime: runtime.clone(),
        };

        let mut writers = self.writers.lock();
        if let Some(writer) = writers.get(&endpoint) {
            match writer.send(outgoing) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => outgoing = returned,
            }
        }

        let writer = self.spawn_writer(endpoint.clone());
        writer
            .send(outgoing)
            .map_err(|_| NetworkError::endpoint_unavailable(endpoint.to_string()))?;
        writers.insert(endpoint, writer);
        Ok(())
    }

    fn listen(&self, local: &TransportConfig, inbox: Weak<dyn Inbox>) -> Result<TransportConfig> {
        let requested = Endpoint::from_config(local)?;

        let std_listener = std::net::TcpListener::bind((requested.ip.as_str(), requested.port))
            .map_err(|e| NetworkError::io(format!("failed to bind {}", requested), e))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| NetworkError::io("failed to set listener non-blocking", e))?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|e| NetworkError::io("failed to read bound address", e))?;

        let listener = {
            let _guard = self.handle.enter();
            TcpListener::from_std(std_listener)
                .map_err(|e| NetworkError::io("failed to register listener", e))?
        };

        let bound = local
            .clone()
            .with_param("port", serde_json::Value::from(local_addr.port()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        self.handle.spawn(accept_loop(
            listener,
            inbox,
            self.settings.max_frame_bytes,
            self.metrics.clone(),
            shutdown_rx,
        ));

        info!(addr = %local_addr, "TCP server listening");
        self.listeners.lock().insert(
            Endpoint {
                ip: requested.ip,
                port: local_addr.port(),
            },
            Listener {
                local_addr,
                shutdown,
            },
        );
        Ok(bound)
    }

    fn unlisten(&self, local: &TransportConfig) {
        let Ok(endpoint) = Endpoint::from_config(local) else {
            return;
        };
        if let Some(listener) = self.listeners.lock().remove(&endpoint) {
            let _ = listener.shutdown.send(true);
            info!(addr = %listener.local_addr, "TCP server stopping");
        }
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        // Closing every queue ends the writer tasks
        self.writers.lock().clear();
    }
}

async fn run_writer(
    endpoint: Endpoint,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    writers: Writers,
    settings: TcpSettings,
    metrics: MetricsTracker,
) {
    let mut connection: Option<TcpConnection> = None;

    loop {
        let Outgoing { envelope, runtime } =
            match tokio::time::timeout(settings.writer_idle(), queue.recv()).await {
                Ok(Some(outgoing)) => outgoing,
                Ok(None) => break,
                Err(_) => {
                    if retire_writer(&endpoint, &queue, &writers) {
                        break;
                    }
                    continue;
                }
            };

        let frame = match envelope.to_line() {
            Ok(frame) => frame,
            Err(e) => {
                runtime.report_failure(e.into_failure());
                continue;
            }
        };

        if let Err(e) = send_with_retry(&endpoint, &mut connection, &frame, &settings, &metrics).await {
            metrics.record_send_failure();
            error!(endpoint = %endpoint, to = %envelope.to, error = %e, "envelope dropped");
            runtime.report_failure(e.into_failure());
            if retire_writer(&endpoint, &queue, &writers) {
                break;
            }
        }
    }

    debug!(endpoint = %endpoint, "writer stopped");
}

/// Unregister an idle or failed writer. Senders enqueue under the same
/// lock, so an empty queue here stays empty.
fn retire_writer(
    endpoint: &Endpoint,
    queue: &mpsc::UnboundedReceiver<Outgoing>,
    writers: &Writers,
) -> bool {
    let mut writers = writers.lock();
    if !queue.is_empty() {
        return false;
    }
    writers.remove(endpoint);
    true
}

pub(crate) async fn send_with_retry(
    endpoint: &Endpoint,
    connection: &mut Option<TcpConnection>,
    frame: &[u8],
    settings: &TcpSettings,
    metrics: &MetricsTracker,
) -> Result<()> {
    let mut reconnects = 0;
    loop {
        match try_send(endpoint, connection, frame, settings, metrics).await {
            Ok(()) => return Ok(()),
            Err(e) if reconnects < MAX_RECONNECTS => {
                // Any cached connection is suspect after a failure.
                *connection = None;
                reconnects += 1;
                metrics.record_reconnect();
                warn!(endpoint = %endpoint, attempt = reconnects, error = %e, "send failed; reconnecting");
            }
            Err(e) => {
                *connection = None;
                return Err(NetworkError::send_failed(endpoint.to_string(), reconnects + 1, e));
            }
        }
    }
}

async fn try_send(
    endpoint: &Endpoint,
    connection: &mut Option<TcpConnection>,
    frame: &[u8],
    settings: &TcpSettings,
    metrics: &MetricsTracker,
) -> Result<()> {
    if connection.as_ref().is_some_and(TcpConnection::peer_closed) {
        debug!(endpoint = %endpoint, "cached connection closed by peer; reconnecting");
        *connection = None;
        metrics.record_reconnect();
    }
    if connection.is_none() {
        metrics.record_connect_attempt();
        let fresh = TcpConnection::connect(&endpoint.ip, endpoint.port, settings.connect_timeout()).await?;
        info!(endpoint = %endpoint, peer = %fresh.peer_addr, "connected");
        *connection = Some(fresh);
    }
    let conn = connection
        .as_mut()
        .ok_or_else(|| NetworkError::endpoint_unavailable(endpoint.to_string()))?;

    let start = Instant::now();
    conn.write_frame(frame, settings.write_timeout()).await?;
    metrics.record_send(frame.len(), start.elapsed().as_nanos() as u64);
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    inbox: Weak<dyn Inbox>,
    max_frame_bytes: usize,
    metrics: MetricsTracker,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY: {}", e);
                    }
                    debug!(peer = %peer, "accepted connection");
                    tokio::spawn(read_connection(
                        stream,
                        peer,
                        inbox.clone(),
                        max_frame_bytes,
                        metrics.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("TCP server stopped");
}

/// Read newline-delimited envelopes until EOF, an I/O error, an oversized
/// frame or shutdown
pub(crate) async fn read_connection(
    stream: TcpStream,
    peer: SocketAddr,
    inbox: Weak<dyn Inbox>,
    max_frame_bytes: usize,
    metrics: MetricsTracker,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::with_capacity(4096);

    loop {
        line.clear();
        let mut limited = (&mut reader).take(max_frame_bytes as u64 + 1);
        let read = tokio::select! {
            read = limited.read_until(b'\n', &mut line) => read,
            _ = shutdown.changed() => break,
        };

        let n = match read {
            Ok(0) => {
                debug!(peer = %peer, "connection closed");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(peer = %peer, error = %e, "read failed");
                break;
            }
        };

        if line.last() != Some(&b'\n') && n > max_frame_bytes {
            metrics.record_malformed();
            warn!(peer = %peer, max = max_frame_bytes, "frame too large; closing connection");
            report(
                &inbox,
                NetworkError::malformed(format!(
                    "frame from {} exceeds {} bytes",
                    peer, max_frame_bytes
                )),
            );
            break;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match Envelope::from_line(&line) {
            Ok(envelope) => {
                metrics.record_receive(n);
                match inbox.upgrade() {
                    Some(inbox) => inbox.enqueue(envelope),
                    None => {
                        debug!(peer = %peer, "membrane gone; closing connection");
                        break;
                    }
                }
            }
            Err(e) => {
                metrics.record_malformed();
                warn!(peer = %peer, error = %e, "skipping malformed frame");
                report(&inbox, e);
            }
        }
    }
}

fn report(inbox: &Weak<dyn Inbox>, error: NetworkError) {
    if let Some(inbox) = inbox.upgrade() {
        inbox.report(error.into_failure());
    }
}
