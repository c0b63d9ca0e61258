// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transaction counters shared by the four lists.
//!
//! Every list records into the same [`TransactionMetrics`] handle, so a
//! single [`TransactionMetrics::snapshot`] describes the whole layer.
//!
//! ```rust
//! use sip_transaction::{ListKind, Termination, TransactionMetrics, TransactionTimer};
//! use sip_core::TransportKind;
//! use std::time::Duration;
//!
//! let metrics = TransactionMetrics::new();
//! metrics.record_start(ListKind::Nict, TransportKind::Udp);
//! metrics.record_timer_fired(TransactionTimer::E);
//! metrics.record_end(ListKind::Nict, Termination::Completed, Duration::from_millis(40));
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.started(ListKind::Nict), 1);
//! assert_eq!(snapshot.timer_fires(TransactionTimer::E), 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sip_core::TransportKind;

use crate::{ListKind, Termination, TransactionTimer};

/// Outcome bucket for a finished transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionOutcome {
    Completed,
    Timeout,
    TransportError,
}

impl From<Termination> for TransactionOutcome {
    fn from(reason: Termination) -> Self {
        match reason {
            Termination::Completed => TransactionOutcome::Completed,
            Termination::Timeout(_) => TransactionOutcome::Timeout,
            Termination::TransportError => TransactionOutcome::TransportError,
        }
    }
}

/// Per-list lifetime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListStats {
    pub started: u64,
    pub ended: u64,
    pub rejected: u64,
    pub outcomes: HashMap<TransactionOutcome, u64>,
    pub total_duration: Duration,
    pub max_duration: Option<Duration>,
}

impl ListStats {
    pub fn avg_duration(&self) -> Duration {
        if self.ended == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.ended as u32
    }
}

#[derive(Debug, Default)]
struct MetricsData {
    lists: HashMap<ListKind, ListStats>,
    timer_fires: HashMap<TransactionTimer, u64>,
    retransmissions: HashMap<TransportKind, u64>,
    starts_by_transport: HashMap<TransportKind, u64>,
}

/// Thread-safe transaction metrics collector.
#[derive(Debug, Clone, Default)]
pub struct TransactionMetrics {
    data: Arc<RwLock<MetricsData>>,
}

impl TransactionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_start(&self, list: ListKind, transport: TransportKind) {
        let mut data = self.data.write();
        data.lists.entry(list).or_default().started += 1;
        *data.starts_by_transport.entry(transport).or_insert(0) += 1;
    }

    pub fn record_end(&self, list: ListKind, reason: Termination, lifetime: Duration) {
        let mut data = self.data.write();
        let stats = data.lists.entry(list).or_default();
        stats.ended += 1;
        *stats.outcomes.entry(reason.into()).or_insert(0) += 1;
        stats.total_duration += lifetime;
        stats.max_duration = Some(stats.max_duration.map_or(lifetime, |max| max.max(lifetime)));
    }

    /// Records an insert refused because the list was full.
    pub fn record_rejected(&self, list: ListKind) {
        self.data.write().lists.entry(list).or_default().rejected += 1;
    }

    pub fn record_timer_fired(&self, timer: TransactionTimer) {
        *self.data.write().timer_fires.entry(timer).or_insert(0) += 1;
    }

    pub fn record_retransmission(&self, transport: TransportKind) {
        *self.data.write().retransmissions.entry(transport).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> TransactionMetricsSnapshot {
        let data = self.data.read();
        TransactionMetricsSnapshot {
            lists: data.lists.clone(),
            timer_fires: data.timer_fires.clone(),
            retransmissions: data.retransmissions.clone(),
            starts_by_transport: data.starts_by_transport.clone(),
        }
    }
}

/// Point-in-time copy of [`TransactionMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionMetricsSnapshot {
    pub lists: HashMap<ListKind, ListStats>,
    pub timer_fires: HashMap<TransactionTimer, u64>,
    pub retransmissions: HashMap<TransportKind, u64>,
    pub starts_by_transport: HashMap<TransportKind, u64>,
}

impl TransactionMetricsSnapshot {
    pub fn started(&self, list: ListKind) -> u64 {
        self.lists.get(&list).map_or(0, |s| s.started)
    }

    pub fn ended(&self, list: ListKind) -> u64 {
        self.lists.get(&list).map_or(0, |s| s.ended)
    }

    pub fn rejected(&self, list: ListKind) -> u64 {
        self.lists.get(&list).map_or(0, |s| s.rejected)
    }

    pub fn outcome(&self, list: ListKind, outcome: TransactionOutcome) -> u64 {
        self.lists
            .get(&list)
            .and_then(|s| s.outcomes.get(&outcome).copied())
            .unwrap_or(0)
    }

    pub fn timer_fires(&self, timer: TransactionTimer) -> u64 {
        self.timer_fires.get(&timer).copied().unwrap_or(0)
    }

    pub fn retransmissions(&self, transport: TransportKind) -> u64 {
        self.retransmissions.get(&transport).copied().unwrap_or(0)
    }
}
