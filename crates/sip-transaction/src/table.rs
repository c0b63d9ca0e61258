// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Keyed transaction table shared by the four lists.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use sip_core::{Request, TransportKind};
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::fsm::{Action, StateMachine};
use crate::metrics::TransactionMetrics;
use crate::{
    ListKind, TransactionEffect, TransactionError, TransactionKey, TransactionTimer,
    TransportContext,
};

pub(crate) struct Entry<M> {
    pub fsm: M,
    pub ctx: TransportContext,
    pub request: Arc<Request>,
    pub created: Instant,
    /// Generated ACK for a non-2xx final, or the application's ACK for a 2xx.
    pub ack: Option<Bytes>,
    /// Status code of the final response sent by a server entry.
    pub final_code: Option<u16>,
    deadlines: HashMap<TransactionTimer, Instant>,
    retransmissions: u32,
}

impl<M> Entry<M> {
    pub fn new(fsm: M, ctx: TransportContext, request: Arc<Request>, now: Instant) -> Self {
        Self {
            fsm,
            ctx,
            request,
            created: now,
            ack: None,
            final_code: None,
            deadlines: HashMap::new(),
            retransmissions: 0,
        }
    }

    fn next_due(&self, now: Instant, fired: &HashSet<TransactionTimer>) -> Option<(TransactionTimer, Instant)> {
        self.deadlines
            .iter()
            .filter(|(timer, at)| **at <= now && !fired.contains(*timer))
            .min_by_key(|(timer, at)| (**at, **timer))
            .map(|(timer, at)| (*timer, *at))
    }
}

/// Read-only view of one live entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    pub key: TransactionKey,
    pub state: &'static str,
    pub transport: TransportKind,
    pub peer: SocketAddr,
    pub call_id: Option<SmolStr>,
    pub age: Duration,
    pub retransmissions: u32,
    /// Earliest armed deadline, relative to the report time.
    pub next_timer: Option<(TransactionTimer, Duration)>,
}

pub(crate) struct Table<M> {
    kind: ListKind,
    entries: Mutex<HashMap<TransactionKey, Entry<M>>>,
    limit: usize,
    metrics: TransactionMetrics,
}

impl<M: StateMachine> Table<M> {
    pub fn new(kind: ListKind, limit: usize, metrics: TransactionMetrics) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
            limit,
            metrics,
        }
    }

    /// Inserts a fresh entry and applies the actions `start` produces for it.
    ///
    /// `extra` effects are emitted before the actions' own effects.
    pub fn insert(
        &self,
        key: TransactionKey,
        mut entry: Entry<M>,
        now: Instant,
        extra: Vec<TransactionEffect>,
        start: impl FnOnce(&mut Entry<M>) -> Vec<Action>,
    ) -> Result<Vec<TransactionEffect>, TransactionError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(TransactionError::Duplicate(key));
        }
        if entries.len() >= self.limit {
            self.metrics.record_rejected(self.kind);
            return Err(TransactionError::Capacity {
                list: self.kind.as_str(),
                limit: self.limit,
            });
        }
        self.metrics.record_start(self.kind, entry.ctx.transport);
        debug!(list = self.kind.as_str(), key = %key, peer = %entry.ctx.peer, "transaction created");

        let mut effects = extra;
        let actions = start(&mut entry);
        let terminated = self.apply(&key, &mut entry, actions, now, now, &mut effects);
        if !terminated {
            entries.insert(key, entry);
        }
        Ok(effects)
    }

    /// Runs `step` against the entry for `key` and applies its actions.
    pub fn drive(
        &self,
        key: &TransactionKey,
        now: Instant,
        step: impl FnOnce(&mut Entry<M>) -> Result<Vec<Action>, TransactionError>,
    ) -> Result<Vec<TransactionEffect>, TransactionError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| TransactionError::NoMatch(key.clone()))?;
        let actions = step(entry)?;
        let mut effects = Vec::new();
        if self.apply(key, entry, actions, now, now, &mut effects) {
            entries.remove(key);
        }
        Ok(effects)
    }

    /// Like [`Table::drive`], for the first entry accepted by `pred`.
    pub fn drive_where(
        &self,
        pred: impl Fn(&TransactionKey, &Entry<M>) -> bool,
        now: Instant,
        step: impl FnOnce(&mut Entry<M>) -> Vec<Action>,
    ) -> Option<(TransactionKey, Vec<TransactionEffect>)> {
        let mut entries = self.entries.lock();
        let key = entries
            .iter()
            .find(|(key, entry)| pred(*key, *entry))
            .map(|(key, _)| key.clone())?;
        let entry = entries.get_mut(&key)?;
        let actions = step(entry);
        let mut effects = Vec::new();
        if self.apply(&key, entry, actions, now, now, &mut effects) {
            entries.remove(&key);
        }
        Some((key, effects))
    }

    /// Fires every due timer, earliest first, each at most once per call.
    pub fn tick(&self, now: Instant) -> Vec<TransactionEffect> {
        let mut entries = self.entries.lock();
        let mut effects = Vec::new();
        let mut finished = Vec::new();

        for (key, entry) in entries.iter_mut() {
            let mut fired = HashSet::new();
            while let Some((timer, deadline)) = entry.next_due(now, &fired) {
                fired.insert(timer);
                entry.deadlines.remove(&timer);
                self.metrics.record_timer_fired(timer);
                debug!(list = self.kind.as_str(), key = %key, timer = ?timer, "timer fired");
                let actions = entry.fsm.on_timer(timer);
                // retransmission intervals are measured from the deadline, not from `now`
                if self.apply(key, entry, actions, deadline, now, &mut effects) {
                    finished.push(key.clone());
                    break;
                }
            }
        }
        for key in finished {
            entries.remove(&key);
        }
        effects
    }

    /// Terminates `key` with a transport error.
    pub fn fail(&self, key: &TransactionKey, now: Instant) -> Vec<TransactionEffect> {
        self.drive(key, now, |entry| Ok(entry.fsm.on_transport_error()))
            .unwrap_or_default()
    }

    /// Terminates every entry bound to `peer` over `transport` with a
    /// transport error.
    pub fn fail_peer(&self, transport: TransportKind, peer: SocketAddr, now: Instant) -> Vec<TransactionEffect> {
        let mut entries = self.entries.lock();
        let mut effects = Vec::new();
        let mut finished = Vec::new();
        for (key, entry) in entries.iter_mut().filter(|(_, e)| e.ctx.transport == transport && e.ctx.peer == peer) {
            let actions = entry.fsm.on_transport_error();
            if self.apply(key, entry, actions, now, now, &mut effects) {
                finished.push(key.clone());
            }
        }
        for key in finished {
            entries.remove(&key);
        }
        effects
    }

    pub fn inspect<R>(&self, key: &TransactionKey, view: impl FnOnce(&Entry<M>) -> R) -> Option<R> {
        self.entries.lock().get(key).map(view)
    }

    /// Drops an entry without running its state machine.
    pub fn remove(&self, key: &TransactionKey) -> Option<Arc<Request>> {
        self.entries.lock().remove(key).map(|entry| entry.request)
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn lookup(&self, key: &TransactionKey, now: Instant) -> Option<EntryReport> {
        self.inspect(key, |entry| Self::describe(key, entry, now))
    }

    pub fn report(&self, now: Instant) -> Vec<EntryReport> {
        let entries = self.entries.lock();
        let mut reports: Vec<EntryReport> = entries
            .iter()
            .map(|(key, entry)| Self::describe(key, entry, now))
            .collect();
        reports.sort_by(|a, b| b.age.cmp(&a.age));
        reports
    }

    fn describe(key: &TransactionKey, entry: &Entry<M>, now: Instant) -> EntryReport {
        EntryReport {
            key: key.clone(),
            state: entry.fsm.state_name(),
            transport: entry.ctx.transport,
            peer: entry.ctx.peer,
            call_id: entry.request.call_id().map(SmolStr::new),
            age: now.saturating_duration_since(entry.created),
            retransmissions: entry.retransmissions,
            next_timer: entry
                .deadlines
                .iter()
                .min_by_key(|(timer, at)| (**at, **timer))
                .map(|(timer, at)| (*timer, at.saturating_duration_since(now))),
        }
    }

    /// Applies actions to an entry. Returns true once the entry terminated.
    ///
    /// New deadlines are computed from `base`.
    fn apply(
        &self,
        key: &TransactionKey,
        entry: &mut Entry<M>,
        actions: Vec<Action>,
        base: Instant,
        now: Instant,
        effects: &mut Vec<TransactionEffect>,
    ) -> bool {
        for action in actions {
            match action {
                Action::Transmit(payload) => effects.push(self.transmit(key, entry, payload)),
                Action::Retransmit(payload) => {
                    entry.retransmissions += 1;
                    self.metrics.record_retransmission(entry.ctx.transport);
                    effects.push(self.transmit(key, entry, payload));
                }
                Action::Deliver(response) => effects.push(TransactionEffect::DeliverResponse {
                    key: key.clone(),
                    response,
                }),
                Action::SendAck(response) => match entry.request.create_ack(&response) {
                    Ok(ack) => {
                        let payload = ack.to_bytes();
                        entry.ack = Some(payload.clone());
                        effects.push(self.transmit(key, entry, payload));
                    }
                    Err(err) => warn!(key = %key, error = %err, "cannot build ACK"),
                },
                Action::ResendAck => {
                    if let Some(payload) = entry.ack.clone() {
                        effects.push(self.transmit(key, entry, payload));
                    }
                }
                Action::Schedule { timer, duration } => {
                    entry.deadlines.insert(timer, base + duration);
                }
                Action::Cancel(timer) => {
                    entry.deadlines.remove(&timer);
                }
                Action::Terminate(reason) => {
                    debug!(list = self.kind.as_str(), key = %key, reason = ?reason, "transaction terminated");
                    self.metrics.record_end(
                        self.kind,
                        reason,
                        now.saturating_duration_since(entry.created),
                    );
                    entry.deadlines.clear();
                    effects.push(TransactionEffect::Terminated {
                        key: key.clone(),
                        request: entry.request.clone(),
                        reason,
                    });
                    return true;
                }
            }
        }
        false
    }

    fn transmit(&self, key: &TransactionKey, entry: &Entry<M>, payload: Bytes) -> TransactionEffect {
        TransactionEffect::Transmit {
            key: key.clone(),
            ctx: entry.ctx,
            payload,
        }
    }
}
