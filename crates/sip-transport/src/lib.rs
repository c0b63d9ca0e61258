// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Blocking SIP transports on OS threads.
//!
//! A [`TransportLayer`] owns up to three listeners:
//!
//! - **UDP**: a fixed set of reader threads sharing one socket.
//! - **TCP / TLS**: an acceptor thread each, plus one reader thread per
//!   connection drawn from a bounded [`ThreadList`].
//!
//! Outbound stream sends go through a [`SocketMap`] so concurrent senders
//! to one endpoint share a single connection per transport. Every complete inbound
//! message is handed to an [`InboundHandler`] on the thread that read it,
//! tagged with that thread's id.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use sip_observe::NoopTransportMetrics;
//! use sip_transport::{InboundHandler, InboundPacket, TransportLayer, TransportSetup};
//!
//! struct Printer;
//! impl InboundHandler for Printer {
//!     fn on_packet(&self, thread_id: u32, packet: InboundPacket) {
//!         println!("[{thread_id}] {} bytes from {}", packet.payload.len(), packet.peer);
//!     }
//! }
//!
//! let setup = TransportSetup {
//!     udp_bind: Some("127.0.0.1:5060".parse().unwrap()),
//!     ..TransportSetup::default()
//! };
//! let layer = TransportLayer::start(setup, Arc::new(Printer), Arc::new(NoopTransportMetrics)).unwrap();
//! layer.stop();
//! ```

mod connection;
pub mod framing;
pub mod pool;
pub mod threads;
pub mod tls;

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rustls::{ClientConfig, ServerConfig};
use sip_core::DEFAULT_MAX_MESSAGE_SIZE;
use sip_observe::{span_with_transport, TransportMetrics, NETWORK_TARGET, SYSTEM_TARGET};
use tracing::{debug, info, warn};

pub use connection::Connection;
pub use framing::{drain_sip_frames, FrameError};
pub use pool::SocketMap;
pub use sip_core::TransportKind;
pub use threads::{PoolExhausted, ThreadList};
pub use tls::{load_rustls_client_config, load_rustls_server_config};

use connection::StreamReader;
use threads::LiveGuard;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_STREAM_THREADS: usize = 64;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(20);
const UDP_BUFFER: usize = 65_535;

/// Bundle representing a message received by a transport.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub transport: TransportKind,
    pub peer: SocketAddr,
    pub payload: Bytes,
}

/// Receives everything the transport reads. Called concurrently from many
/// reader threads.
pub trait InboundHandler: Send + Sync + 'static {
    fn on_packet(&self, thread_id: u32, packet: InboundPacket);

    /// A stream connection went away (peer close, read error, idle cleanup).
    fn on_connection_closed(&self, _thread_id: u32, _transport: TransportKind, _peer: SocketAddr) {}

    /// Last call made on a reader thread before it exits.
    fn on_thread_end(&self, _thread_id: u32) {}
}

/// Listener and pool configuration for [`TransportLayer::start`].
#[derive(Debug, Clone)]
pub struct TransportSetup {
    pub udp_bind: Option<SocketAddr>,
    pub tcp_bind: Option<SocketAddr>,
    pub tls_bind: Option<SocketAddr>,
    /// Required when `tls_bind` is set.
    pub tls_server_config: Option<Arc<ServerConfig>>,
    /// Required for outbound TLS.
    pub tls_client_config: Option<Arc<ClientConfig>>,
    pub udp_threads: usize,
    pub max_stream_threads: usize,
    /// Upper bound on every blocking read, and so on how long `stop` waits
    /// for a reader to notice.
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for TransportSetup {
    fn default() -> Self {
        Self {
            udp_bind: None,
            tcp_bind: None,
            tls_bind: None,
            tls_server_config: None,
            tls_client_config: None,
            udp_threads: 1,
            max_stream_threads: DEFAULT_MAX_STREAM_THREADS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// State shared by the layer and every thread it runs.
struct Shared {
    handler: Arc<dyn InboundHandler>,
    metrics: Arc<dyn TransportMetrics>,
    udp: Option<UdpSocket>,
    tls_server: Option<Arc<ServerConfig>>,
    tls_client: Option<Arc<ClientConfig>>,
    sockets: SocketMap,
    threads: ThreadList,
    udp_live: Arc<AtomicUsize>,
    next_thread: AtomicU32,
    stop: AtomicBool,
    poll_interval: Duration,
    connect_timeout: Duration,
    max_message_size: usize,
}

impl Shared {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn next_thread_id(&self) -> u32 {
        self.next_thread.fetch_add(1, Ordering::Relaxed)
    }

    fn run_udp(&self, socket: UdpSocket, thread_id: u32) {
        let span = span_with_transport("udp_reader", TransportKind::Udp.as_str());
        let _entered = span.enter();
        let mut buf = vec![0u8; UDP_BUFFER];
        while !self.stopping() {
            let (n, peer) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if is_poll_timeout(&e) => continue,
                Err(e) => {
                    if self.stopping() {
                        break;
                    }
                    warn!(%e, thread_id, "udp recv_from error");
                    self.metrics.on_error(TransportKind::Udp.as_str(), "recv");
                    continue;
                }
            };
            if buf[..n].iter().all(|b| *b == b'\r' || *b == b'\n') {
                continue;
            }
            if n == buf.len() {
                warn!(%peer, max = n, "udp datagram likely truncated");
                self.metrics.on_error(TransportKind::Udp.as_str(), "truncate");
                continue;
            }
            self.metrics.on_packet_received(TransportKind::Udp.as_str());
            debug!(
                target: NETWORK_TARGET,
                %peer,
                "udp recv {} bytes\n{}",
                n,
                String::from_utf8_lossy(&buf[..n])
            );
            self.handler.on_packet(
                thread_id,
                InboundPacket {
                    transport: TransportKind::Udp,
                    peer,
                    payload: Bytes::copy_from_slice(&buf[..n]),
                },
            );
        }
        self.handler.on_thread_end(thread_id);
    }

    fn run_acceptor(self: &Arc<Self>, listener: TcpListener, kind: TransportKind) {
        while !self.stopping() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    self.metrics.on_accept(kind.as_str());
                    if let Err(e) = self.adopt(stream, peer, kind) {
                        warn!(%peer, error = %e, "rejected {} connection", kind);
                        self.metrics.on_error(kind.as_str(), "accept");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_BACKOFF),
                Err(e) => {
                    warn!(%e, "{} accept error", kind);
                    self.metrics.on_error(kind.as_str(), "accept");
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        }
    }

    /// Registers an accepted connection and starts its reader.
    fn adopt(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr, kind: TransportKind) -> Result<()> {
        stream.set_nonblocking(false)?;
        let (conn, reader) = match kind {
            TransportKind::Tcp => Connection::tcp(stream, peer, self.poll_interval)?,
            TransportKind::Tls => {
                let config = self
                    .tls_server
                    .as_ref()
                    .ok_or_else(|| anyhow!("no TLS server configuration"))?;
                tls::accept_session(stream, peer, config, self.poll_interval)?
            }
            TransportKind::Udp => bail!("udp is connectionless"),
        };
        let thread_id = self.next_thread_id();
        self.sockets.insert(conn.clone(), thread_id);
        if let Err(e) = self.spawn_reader(conn.clone(), reader, thread_id) {
            self.sockets.remove(&conn);
            conn.shutdown();
            return Err(e);
        }
        debug!(%peer, thread_id, "accepted {} connection", kind);
        Ok(())
    }

    /// Opens an outbound connection and starts its reader.
    fn connect(self: &Arc<Self>, kind: TransportKind, peer: SocketAddr) -> Result<(Arc<Connection>, u32)> {
        let tls_client = match kind {
            TransportKind::Udp => bail!("udp is connectionless"),
            TransportKind::Tcp => None,
            TransportKind::Tls => Some(
                self.tls_client
                    .as_ref()
                    .ok_or_else(|| anyhow!("no TLS client configuration"))?,
            ),
        };
        let started = Instant::now();
        let stream = TcpStream::connect_timeout(&peer, self.connect_timeout)
            .with_context(|| format!("{} connect to {} failed", kind, peer))?;
        let (conn, reader) = match tls_client {
            None => Connection::tcp(stream, peer, self.poll_interval)?,
            Some(config) => {
                tls::connect_session(stream, peer, config, self.poll_interval, self.connect_timeout)?
            }
        };
        self.metrics.on_connect(kind.as_str());
        self.metrics
            .on_latency(kind.as_str(), "connect", started.elapsed().as_nanos() as u64);
        let thread_id = self.next_thread_id();
        if let Err(e) = self.spawn_reader(conn.clone(), reader, thread_id) {
            conn.shutdown();
            return Err(e);
        }
        debug!(%peer, thread_id, "opened {} connection", kind);
        Ok((conn, thread_id))
    }

    fn spawn_reader(self: &Arc<Self>, conn: Arc<Connection>, reader: StreamReader, thread_id: u32) -> Result<()> {
        let shared = self.clone();
        let name = format!("sip-{}-{}", conn.kind(), thread_id);
        self.threads
            .spawn(name, move || shared.read_stream(thread_id, conn, reader))
    }

    fn read_stream(&self, thread_id: u32, conn: Arc<Connection>, mut reader: StreamReader) {
        let kind = conn.kind();
        let peer = conn.peer();
        let span = span_with_transport("stream_reader", kind.as_str());
        let _entered = span.enter();
        let mut chunk = vec![0u8; 16 * 1024];
        let mut buf = BytesMut::with_capacity(4096);

        while !self.stopping() && !conn.is_closed() {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if is_poll_timeout(&e) => continue,
                Err(e) => {
                    if !conn.is_closed() {
                        debug!(%peer, %e, "{} read error", kind);
                        self.metrics.on_error(kind.as_str(), "read");
                    }
                    break;
                }
            };
            conn.touch();
            buf.extend_from_slice(&chunk[..n]);
            let frames = match drain_sip_frames(&mut buf, self.max_message_size) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(%peer, error = %e, "dropping {} connection", kind);
                    self.metrics.on_error(kind.as_str(), "framing");
                    break;
                }
            };
            for payload in frames {
                self.metrics.on_packet_received(kind.as_str());
                debug!(
                    target: NETWORK_TARGET,
                    %peer,
                    "{} recv {} bytes\n{}",
                    kind,
                    payload.len(),
                    String::from_utf8_lossy(&payload)
                );
                self.handler.on_packet(
                    thread_id,
                    InboundPacket {
                        transport: kind,
                        peer,
                        payload,
                    },
                );
            }
        }

        self.sockets.remove(&conn);
        conn.shutdown();
        if !self.stopping() {
            self.handler.on_connection_closed(thread_id, kind, peer);
        }
        self.handler.on_thread_end(thread_id);
    }
}

fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Running UDP/TCP/TLS transports. Stopped on drop.
pub struct TransportLayer {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    udp_addr: Option<SocketAddr>,
    tcp_addr: Option<SocketAddr>,
    tls_addr: Option<SocketAddr>,
}

impl TransportLayer {
    /// Binds every configured listener and starts its threads.
    pub fn start(
        setup: TransportSetup,
        handler: Arc<dyn InboundHandler>,
        metrics: Arc<dyn TransportMetrics>,
    ) -> Result<Self> {
        if setup.tls_bind.is_some() && setup.tls_server_config.is_none() {
            bail!("tls_bind requires a TLS server configuration");
        }
        if setup.udp_bind.is_some() && setup.udp_threads == 0 {
            bail!("udp_threads must be at least 1");
        }

        let udp = match setup.udp_bind {
            Some(addr) => {
                let socket = UdpSocket::bind(addr).with_context(|| format!("udp bind {}", addr))?;
                socket.set_read_timeout(Some(setup.poll_interval))?;
                Some(socket)
            }
            None => None,
        };
        let tcp = bind_listener(setup.tcp_bind, TransportKind::Tcp)?;
        let tls = bind_listener(setup.tls_bind, TransportKind::Tls)?;

        let udp_addr = udp.as_ref().map(UdpSocket::local_addr).transpose()?;
        let tcp_addr = tcp.as_ref().map(TcpListener::local_addr).transpose()?;
        let tls_addr = tls.as_ref().map(TcpListener::local_addr).transpose()?;

        let shared = Arc::new(Shared {
            handler,
            metrics,
            udp,
            tls_server: setup.tls_server_config,
            tls_client: setup.tls_client_config,
            sockets: SocketMap::new(),
            threads: ThreadList::new(setup.max_stream_threads),
            udp_live: Arc::new(AtomicUsize::new(0)),
            next_thread: AtomicU32::new(1),
            stop: AtomicBool::new(false),
            poll_interval: setup.poll_interval,
            connect_timeout: setup.connect_timeout,
            max_message_size: setup.max_message_size,
        });
        let layer = Self {
            shared: shared.clone(),
            handles: Mutex::new(Vec::new()),
            udp_addr,
            tcp_addr,
            tls_addr,
        };

        if let Some(socket) = shared.udp.as_ref() {
            for _ in 0..setup.udp_threads {
                let socket = socket.try_clone()?;
                let thread_id = shared.next_thread_id();
                let guard = LiveGuard::enter(&shared.udp_live);
                let worker = shared.clone();
                layer.spawn(format!("sip-udp-{}", thread_id), move || {
                    let _guard = guard;
                    worker.run_udp(socket, thread_id);
                })?;
            }
            info!(target: SYSTEM_TARGET, bind = ?udp_addr, threads = setup.udp_threads, "listening (udp)");
        }
        for (listener, kind) in [(tcp, TransportKind::Tcp), (tls, TransportKind::Tls)] {
            let Some(listener) = listener else { continue };
            let bind = listener.local_addr()?;
            let worker = shared.clone();
            layer.spawn(format!("sip-{}-accept", kind), move || worker.run_acceptor(listener, kind))?;
            info!(target: SYSTEM_TARGET, %bind, "listening ({})", kind);
        }
        Ok(layer)
    }

    fn spawn<F>(&self, name: String, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(work)
            .with_context(|| format!("failed to spawn thread {}", name))?;
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Sends one serialized message. Stream transports reuse the live
    /// connection to `peer` or open one.
    pub fn send(&self, kind: TransportKind, peer: SocketAddr, payload: &[u8]) -> Result<()> {
        let shared = &self.shared;
        if shared.stopping() {
            bail!("transport stopped");
        }
        let started = Instant::now();
        match kind {
            TransportKind::Udp => {
                let socket = shared
                    .udp
                    .as_ref()
                    .ok_or_else(|| anyhow!("udp transport not enabled"))?;
                if let Err(e) = socket.send_to(payload, peer) {
                    shared.metrics.on_error(kind.as_str(), "write");
                    return Err(anyhow::Error::new(e).context(format!("udp send to {}", peer)));
                }
            }
            TransportKind::Tcp | TransportKind::Tls => {
                let (conn, _) = shared
                    .sockets
                    .get_or_connect(kind, peer, || shared.connect(kind, peer))?;
                if let Err(e) = conn.send(payload) {
                    shared.sockets.remove(&conn);
                    conn.shutdown();
                    shared.metrics.on_error(kind.as_str(), "write");
                    return Err(anyhow::Error::new(e).context(format!("{} send to {}", kind, peer)));
                }
            }
        }
        shared.metrics.on_packet_sent(kind.as_str());
        shared
            .metrics
            .on_latency(kind.as_str(), "send", started.elapsed().as_nanos() as u64);
        debug!(
            target: NETWORK_TARGET,
            %peer,
            "{} send {} bytes\n{}",
            kind,
            payload.len(),
            String::from_utf8_lossy(payload)
        );
        Ok(())
    }

    /// Closes stream connections idle for longer than `timeout`. Their
    /// readers exit and report the close.
    pub fn cleanup_idle(&self, timeout: Duration) -> usize {
        let idle = self.shared.sockets.take_idle(timeout, Instant::now());
        for conn in &idle {
            debug!(peer = %conn.peer(), "closing idle {} connection", conn.kind());
            conn.shutdown();
        }
        idle.len()
    }

    /// Stops every thread and closes every connection. Blocks for at most
    /// about one poll interval. Idempotent.
    pub fn stop(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(target: SYSTEM_TARGET, "transport stopping");
        for conn in self.shared.sockets.drain() {
            conn.shutdown();
        }
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.shared.threads.join_all();
        info!(target: SYSTEM_TARGET, "transport stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shared.stopping()
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    /// Local address of the listener for `kind`.
    pub fn local_addr(&self, kind: TransportKind) -> Option<SocketAddr> {
        match kind {
            TransportKind::Udp => self.udp_addr,
            TransportKind::Tcp => self.tcp_addr,
            TransportKind::Tls => self.tls_addr,
        }
    }

    pub fn udp_threads_live(&self) -> usize {
        self.shared.udp_live.load(Ordering::Acquire)
    }

    /// Live TCP and TLS reader threads.
    pub fn stream_threads_live(&self) -> usize {
        self.shared.threads.live()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.sockets.len()
    }

    /// Id of the thread reading the `kind` stream connection to `peer`.
    pub fn thread_of(&self, kind: TransportKind, peer: SocketAddr) -> Option<u32> {
        self.shared.sockets.thread_of(kind, peer)
    }
}

impl Drop for TransportLayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_listener(addr: Option<SocketAddr>, kind: TransportKind) -> Result<Option<TcpListener>> {
    let Some(addr) = addr else {
        return Ok(None);
    };
    let listener = TcpListener::bind(addr).with_context(|| format!("{} bind {}", kind, addr))?;
    listener.set_nonblocking(true)?;
    Ok(Some(listener))
}
