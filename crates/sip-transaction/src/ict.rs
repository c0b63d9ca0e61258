// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client INVITE transaction list.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use sip_core::{Method, Request, Response, TransportKind};

use crate::fsm::{ClientInviteEvent, ClientInviteFsm};
use crate::metrics::TransactionMetrics;
use crate::table::{Entry, EntryReport, Table};
use crate::timers::{TimerDefaults, TransportAwareTimers};
use crate::{
    ClientInviteState, ListKind, TransactionEffect, TransactionError, TransactionKey,
    TransportContext,
};

pub struct IctList {
    table: Table<ClientInviteFsm>,
    defaults: TimerDefaults,
}

impl IctList {
    pub fn new(limit: usize, defaults: TimerDefaults, metrics: TransactionMetrics) -> Self {
        Self {
            table: Table::new(ListKind::Ict, limit, metrics),
            defaults,
        }
    }

    /// Creates a Calling entry for `request` and returns the first transmit.
    pub fn admit(
        &self,
        request: Arc<Request>,
        ctx: TransportContext,
        now: Instant,
    ) -> Result<(TransactionKey, Vec<TransactionEffect>), TransactionError> {
        if !request.method().is_invite() {
            return Err(TransactionError::WrongMethod(request.method().clone()));
        }
        let key =
            TransactionKey::from_request(&request, false).ok_or(TransactionError::MissingBranch)?;
        let fsm = ClientInviteFsm::new(TransportAwareTimers::with_defaults(
            ctx.transport,
            self.defaults,
        ));
        let payload = request.to_bytes();
        let entry = Entry::new(fsm, ctx, request, now);
        let effects = self.table.insert(key.clone(), entry, now, Vec::new(), |entry| {
            entry.fsm.on_event(ClientInviteEvent::SendInvite(payload))
        })?;
        Ok((key, effects))
    }

    /// Matches a response to its INVITE transaction.
    pub fn on_response(
        &self,
        response: Arc<Response>,
        now: Instant,
    ) -> Result<Vec<TransactionEffect>, TransactionError> {
        let key =
            TransactionKey::from_response(&response, false).ok_or(TransactionError::MissingBranch)?;
        if !key.method.is_invite() {
            return Err(TransactionError::WrongMethod(key.method));
        }
        let event = if response.is_provisional() {
            ClientInviteEvent::ReceiveProvisional(response)
        } else {
            ClientInviteEvent::ReceiveFinal(response)
        };
        self.table.drive(&key, now, |entry| Ok(entry.fsm.on_event(event)))
    }

    /// Stores the application's ACK for a 2xx so duplicate 2xx responses
    /// re-send it.
    pub fn attach_ack(&self, ack: &Request, now: Instant) -> Result<TransactionKey, TransactionError> {
        if *ack.method() != Method::Ack {
            return Err(TransactionError::WrongMethod(ack.method().clone()));
        }
        let call_id = ack.call_id();
        let number = ack.cseq().map(|cseq| cseq.number);
        let payload = ack.to_bytes();
        self.table
            .drive_where(
                |_, entry| {
                    entry.fsm.state == ClientInviteState::Completed
                        && entry.request.call_id() == call_id
                        && entry.request.cseq().map(|cseq| cseq.number) == number
                },
                now,
                |entry| {
                    entry.ack = Some(payload);
                    Vec::new()
                },
            )
            .map(|(key, _)| key)
            .ok_or_else(|| {
                TransactionError::NoMatch(TransactionKey::new(
                    ack.branch().unwrap_or_default(),
                    Method::Invite,
                    false,
                ))
            })
    }

    pub fn state(&self, key: &TransactionKey) -> Option<ClientInviteState> {
        self.table.inspect(key, |entry| entry.fsm.state)
    }

    pub fn tick(&self, now: Instant) -> Vec<TransactionEffect> {
        self.table.tick(now)
    }

    pub fn fail(&self, key: &TransactionKey, now: Instant) -> Vec<TransactionEffect> {
        self.table.fail(key, now)
    }

    pub fn fail_peer(&self, transport: TransportKind, peer: SocketAddr, now: Instant) -> Vec<TransactionEffect> {
        self.table.fail_peer(transport, peer, now)
    }

    pub fn lookup(&self, key: &TransactionKey, now: Instant) -> Option<EntryReport> {
        self.table.lookup(key, now)
    }

    pub fn remove(&self, key: &TransactionKey) -> Option<Arc<Request>> {
        self.table.remove(key)
    }

    pub fn clear(&self) -> usize {
        self.table.clear()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn report(&self, now: Instant) -> Vec<EntryReport> {
        self.table.report(now)
    }
}
