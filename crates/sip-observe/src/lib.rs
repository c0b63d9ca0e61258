// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Observability for the SIP stack.
//!
//! - [`TransportMetrics`]: sink transports report packet flow and errors to.
//!   There is no process-wide registry; the owner of a transport hands it the
//!   sink it should use.
//! - [`log::LogSink`] and [`layer::LogLayer`]: leveled, size-rotating file
//!   logging fed from `tracing` events.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use sip_observe::{TransportCounters, TransportMetrics};
//!
//! let counters = Arc::new(TransportCounters::default());
//! let sink: Arc<dyn TransportMetrics> = counters.clone();
//! sink.on_packet_sent("udp");
//! assert_eq!(counters.snapshot().sent, 1);
//! ```

pub mod layer;
pub mod log;

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::Level;

pub use layer::LogLayer;
pub use log::{LogError, LogLevel, LogSink};

/// Target for raw packet dumps, routed to [`LogLevel::NETWORK`].
pub const NETWORK_TARGET: &str = "sip::network";
/// Target for start/stop and thread lifecycle messages, routed to [`LogLevel::SYSTEM`].
pub const SYSTEM_TARGET: &str = "sip::system";

/// Metrics sink used by transports to emit observability events.
///
/// `transport`, `stage` and `op` are low-cardinality identifiers such as
/// "udp", "accept" or "write".
pub trait TransportMetrics: Send + Sync + 'static {
    fn on_packet_received(&self, transport: &str);
    fn on_packet_sent(&self, transport: &str);
    fn on_error(&self, transport: &str, stage: &str);
    fn on_accept(&self, transport: &str);
    fn on_connect(&self, transport: &str);
    fn on_latency(&self, transport: &str, op: &str, nanos: u64);
}

#[derive(Debug, Default)]
pub struct NoopTransportMetrics;

impl TransportMetrics for NoopTransportMetrics {
    fn on_packet_received(&self, _transport: &str) {}
    fn on_packet_sent(&self, _transport: &str) {}
    fn on_error(&self, _transport: &str, _stage: &str) {}
    fn on_accept(&self, _transport: &str) {}
    fn on_connect(&self, _transport: &str) {}
    fn on_latency(&self, _transport: &str, _op: &str, _nanos: u64) {}
}

/// Creates a tracing span associated with the given transport operation.
pub fn span_with_transport(name: &'static str, transport: &str) -> tracing::Span {
    tracing::span!(Level::INFO, "transport", op = name, transport = transport)
}

/// Simple metrics implementation that logs via `tracing`.
#[derive(Debug, Default)]
pub struct TracingTransportMetrics;

impl TransportMetrics for TracingTransportMetrics {
    fn on_packet_received(&self, transport: &str) {
        tracing::trace!(transport, "packet received");
    }

    fn on_packet_sent(&self, transport: &str) {
        tracing::trace!(transport, "packet sent");
    }

    fn on_error(&self, transport: &str, stage: &str) {
        tracing::warn!(transport, stage, "transport error");
    }

    fn on_accept(&self, transport: &str) {
        tracing::debug!(transport, "accept");
    }

    fn on_connect(&self, transport: &str) {
        tracing::debug!(transport, "connect");
    }

    fn on_latency(&self, transport: &str, op: &str, nanos: u64) {
        tracing::trace!(transport, op, nanos, "latency");
    }
}

/// Lock-free counters summed across all transports.
#[derive(Debug, Default)]
pub struct TransportCounters {
    received: AtomicU64,
    sent: AtomicU64,
    errors: AtomicU64,
    accepted: AtomicU64,
    connected: AtomicU64,
}

/// Point-in-time copy of [`TransportCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCountersSnapshot {
    pub received: u64,
    pub sent: u64,
    pub errors: u64,
    pub accepted: u64,
    pub connected: u64,
}

impl TransportCounters {
    pub fn snapshot(&self) -> TransportCountersSnapshot {
        TransportCountersSnapshot {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}

impl TransportMetrics for TransportCounters {
    fn on_packet_received(&self, _transport: &str) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn on_packet_sent(&self, _transport: &str) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn on_error(&self, transport: &str, stage: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(transport, stage, "transport error counted");
    }

    fn on_accept(&self, _transport: &str) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn on_connect(&self, _transport: &str) {
        self.connected.fetch_add(1, Ordering::Relaxed);
    }

    fn on_latency(&self, _transport: &str, _op: &str, _nanos: u64) {}
}
