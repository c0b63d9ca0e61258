// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stream connections (TCP and TLS) shared between one reader thread and any
//! number of senders.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sip_core::TransportKind;

/// Anything rustls' blocking `StreamOwned` can be.
pub(crate) trait SecureStream: Read + Write + Send {}

impl<T: Read + Write + Send> SecureStream for T {}

type SharedSecure = Arc<Mutex<Box<dyn SecureStream>>>;

enum Writer {
    Tcp(Mutex<TcpStream>),
    /// TLS records cannot be split across two owners, so reads and writes
    /// share one lock. Reads hold it for at most one poll interval.
    Tls(SharedSecure),
}

/// Read half handed to the connection's reader thread.
pub(crate) enum StreamReader {
    Tcp(TcpStream),
    Tls(SharedSecure),
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamReader::Tcp(stream) => stream.read(buf),
            StreamReader::Tls(stream) => stream.lock().read(buf),
        }
    }
}

pub struct Connection {
    kind: TransportKind,
    peer: SocketAddr,
    /// Raw socket kept for shutdown; reads and writes go through `writer`.
    socket: TcpStream,
    writer: Writer,
    last_used: Mutex<Instant>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Wraps a plain TCP stream. `poll` bounds every blocking read.
    pub(crate) fn tcp(
        stream: TcpStream,
        peer: SocketAddr,
        poll: Duration,
    ) -> io::Result<(Arc<Self>, StreamReader)> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(poll))?;
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        let conn = Arc::new(Self::new(TransportKind::Tcp, peer, stream, Writer::Tcp(Mutex::new(writer))));
        Ok((conn, StreamReader::Tcp(reader)))
    }

    /// Wraps a TLS session running over `socket`.
    pub(crate) fn tls(
        socket: TcpStream,
        session: Box<dyn SecureStream>,
        peer: SocketAddr,
        poll: Duration,
    ) -> io::Result<(Arc<Self>, StreamReader)> {
        socket.set_nodelay(true)?;
        socket.set_read_timeout(Some(poll))?;
        let shared: SharedSecure = Arc::new(Mutex::new(session));
        let conn = Arc::new(Self::new(
            TransportKind::Tls,
            peer,
            socket,
            Writer::Tls(shared.clone()),
        ));
        Ok((conn, StreamReader::Tls(shared)))
    }

    fn new(kind: TransportKind, peer: SocketAddr, socket: TcpStream, writer: Writer) -> Self {
        Self {
            kind,
            peer,
            socket,
            writer,
            last_used: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one complete message. Concurrent senders are serialized.
    pub fn send(&self, payload: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed"));
        }
        match &self.writer {
            Writer::Tcp(stream) => {
                let mut stream = stream.lock();
                stream.write_all(payload)?;
                stream.flush()?;
            }
            Writer::Tls(session) => {
                let mut session = session.lock();
                session.write_all(payload)?;
                session.flush()?;
            }
        }
        self.touch();
        Ok(())
    }

    pub(crate) fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the connection closed and shuts the socket down, waking the
    /// reader. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.socket.shutdown(Shutdown::Both);
        }
    }
}
