// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Server non-INVITE transaction list.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use sip_core::{Request, Response, TransportKind};

use crate::fsm::{ServerNonInviteEvent, ServerNonInviteFsm, StateMachine};
use crate::metrics::TransactionMetrics;
use crate::table::{Entry, EntryReport, Table};
use crate::timers::{TimerDefaults, TransportAwareTimers};
use crate::{
    ListKind, ServerNonInviteState, TransactionEffect, TransactionError, TransactionKey,
    TransportContext,
};

pub struct NistList {
    table: Table<ServerNonInviteFsm>,
    defaults: TimerDefaults,
}

impl NistList {
    pub fn new(limit: usize, defaults: TimerDefaults, metrics: TransactionMetrics) -> Self {
        Self {
            table: Table::new(ListKind::Nist, limit, metrics),
            defaults,
        }
    }

    /// Matches or creates the transaction for a received non-INVITE request.
    pub fn on_request(
        &self,
        request: Arc<Request>,
        ctx: TransportContext,
        now: Instant,
    ) -> Result<Vec<TransactionEffect>, TransactionError> {
        let method = request.method();
        if method.is_invite() || !method.starts_transaction() {
            return Err(TransactionError::WrongMethod(method.clone()));
        }
        let key =
            TransactionKey::from_request(&request, true).ok_or(TransactionError::MissingBranch)?;
        match self.table.drive(&key, now, |entry| {
            Ok(entry.fsm.on_event(ServerNonInviteEvent::ReceiveRequest))
        }) {
            Err(TransactionError::NoMatch(_)) => {}
            other => return other,
        }

        let fsm = ServerNonInviteFsm::new(TransportAwareTimers::with_defaults(
            ctx.transport,
            self.defaults,
        ));
        let deliver = TransactionEffect::DeliverRequest {
            key: key.clone(),
            ctx,
            request: request.clone(),
        };
        let entry = Entry::new(fsm, ctx, request, now);
        self.table.insert(key, entry, now, vec![deliver], |_| Vec::new())
    }

    pub fn send_response(
        &self,
        response: &Response,
        now: Instant,
    ) -> Result<Vec<TransactionEffect>, TransactionError> {
        let key =
            TransactionKey::from_response(response, true).ok_or(TransactionError::MissingBranch)?;
        if key.method.is_invite() {
            return Err(TransactionError::WrongMethod(key.method));
        }
        let payload = response.to_bytes();
        let code = response.code();
        self.table.drive(&key, now, |entry| {
            if entry.fsm.state == ServerNonInviteState::Completed {
                return Err(TransactionError::InvalidState {
                    key: key.clone(),
                    state: entry.fsm.state_name(),
                });
            }
            if code < 200 {
                Ok(entry.fsm.on_event(ServerNonInviteEvent::SendProvisional(payload)))
            } else {
                entry.final_code = Some(code);
                Ok(entry.fsm.on_event(ServerNonInviteEvent::SendFinal(payload)))
            }
        })
    }

    pub fn state(&self, key: &TransactionKey) -> Option<ServerNonInviteState> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Termination;
    use sip_core::{Method, TransportKind};
    use std::time::Duration;

    fn bye(branch: &str) -> Arc<Request> {
        let mut req = Request::new(Method::Bye, "sip:bob@10.0.0.2");
        req.headers.push("Via", format!("SIP/2.0/TCP 10.0.0.1:5060;branch={}", branch));
        req.headers.push("From", "<sip:alice@example.com>;tag=a1");
        req.headers.push("To", "<sip:bob@example.com>;tag=b1");
        req.headers.push("Call-ID", "nist-call");
        req.headers.push("CSeq", "4 BYE");
        Arc::new(req)
    }

    fn ctx(transport: TransportKind) -> TransportContext {
        TransportContext::new(transport, "10.0.0.1:5060".parse().unwrap())
    }

    #[test]
    fn reliable_round_trip_terminates_on_next_tick() {
        let list = NistList::new(8, TimerDefaults::default(), TransactionMetrics::new());
        let now = Instant::now();
        let request = bye("z9hG4bKn1");
        let effects = list.on_request(request.clone(), ctx(TransportKind::Tcp), now).unwrap();
        assert!(matches!(effects.as_slice(), [TransactionEffect::DeliverRequest { .. }]));
        assert!(list.on_request(request.clone(), ctx(TransportKind::Tcp), now).unwrap().is_empty());

        let ok = request.create_response(200, None).unwrap();
        let effects = list.send_response(&ok, now).unwrap();
        assert!(matches!(effects.as_slice(), [TransactionEffect::Transmit { .. }]));

        let effects = list.tick(now);
        assert!(matches!(
            effects.as_slice(),
            [TransactionEffect::Terminated { reason: Termination::Completed, .. }]
        ));
        assert!(list.is_empty());
    }

    #[test]
    fn udp_completed_absorbs_for_timer_j() {
        let list = NistList::new(8, TimerDefaults::default(), TransactionMetrics::new());
        let now = Instant::now();
        let request = bye("z9hG4bKn2");
        list.on_request(request.clone(), ctx(TransportKind::Udp), now).unwrap();
        list.send_response(&request.create_response(200, None).unwrap(), now)
            .unwrap();

        let effects = list.on_request(request, ctx(TransportKind::Udp), now).unwrap();
        assert!(matches!(effects.as_slice(), [TransactionEffect::Transmit { .. }]));
        assert!(list.tick(now + Duration::from_secs(31)).is_empty());
        assert_eq!(list.tick(now + Duration::from_secs(32)).len(), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn capacity_rejects_new_requests() {
        let list = NistList::new(1, TimerDefaults::default(), TransactionMetrics::new());
        let now = Instant::now();
        list.on_request(bye("z9hG4bKn3"), ctx(TransportKind::Udp), now).unwrap();
        assert!(matches!(
            list.on_request(bye("z9hG4bKn4"), ctx(TransportKind::Udp), now),
            Err(TransactionError::Capacity { list: "NIST", .. })
        ));
    }
}
