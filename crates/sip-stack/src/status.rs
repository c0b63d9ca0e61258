// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use sip_observe::TransportCountersSnapshot;
use sip_transaction::{ListKind, TransactionMetricsSnapshot, TransactionOutcome};

/// Point-in-time view of the stack.
#[derive(Debug, Clone, Default)]
pub struct StackStatus {
    pub running: bool,
    pub ict: usize,
    pub nict: usize,
    pub ist: usize,
    pub nist: usize,
    pub dialogs: usize,
    pub callbacks: usize,
    pub udp_threads: usize,
    pub stream_threads: usize,
    pub connections: usize,
    pub ticks: u64,
    pub transport: TransportCountersSnapshot,
    pub transactions: TransactionMetricsSnapshot,
}

impl StackStatus {
    pub fn transactions_live(&self) -> usize {
        self.ict + self.nict + self.ist + self.nist
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timeouts: u64 = ListKind::ALL
            .iter()
            .map(|kind| self.transactions.outcome(*kind, TransactionOutcome::Timeout))
            .sum();
        write!(
            f,
            "{} ict={} nict={} ist={} nist={} dialogs={} threads(udp={} stream={}) \
             connections={} rx={} tx={} errors={} timeouts={}",
            if self.running { "running" } else { "stopped" },
            self.ict,
            self.nict,
            self.ist,
            self.nist,
            self.dialogs,
            self.udp_threads,
            self.stream_threads,
            self.connections,
            self.transport.received,
            self.transport.sent,
            self.transport.errors,
            timeouts,
        )
    }
}
