// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client non-INVITE transaction list.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use sip_core::{Request, Response, TransportKind};

use crate::fsm::{ClientNonInviteEvent, ClientNonInviteFsm};
use crate::metrics::TransactionMetrics;
use crate::table::{Entry, EntryReport, Table};
use crate::timers::{TimerDefaults, TransportAwareTimers};
use crate::{
    ClientNonInviteState, ListKind, TransactionEffect, TransactionError, TransactionKey,
    TransportContext,
};

pub struct NictList {
    table: Table<ClientNonInviteFsm>,
    defaults: TimerDefaults,
}

impl NictList {
    pub fn new(limit: usize, defaults: TimerDefaults, metrics: TransactionMetrics) -> Self {
        Self {
            table: Table::new(ListKind::Nict, limit, metrics),
            defaults,
        }
    }

    /// Creates a Trying entry for a non-INVITE request. ACK never starts a
    /// transaction and is refused.
    pub fn admit(
        &self,
        request: Arc<Request>,
        ctx: TransportContext,
        now: Instant,
    ) -> Result<(TransactionKey, Vec<TransactionEffect>), TransactionError> {
        let method = request.method();
        if method.is_invite() || !method.starts_transaction() {
            return Err(TransactionError::WrongMethod(method.clone()));
        }
        let key =
            TransactionKey::from_request(&request, false).ok_or(TransactionError::MissingBranch)?;
        let fsm = ClientNonInviteFsm::new(TransportAwareTimers::with_defaults(
            ctx.transport,
            self.defaults,
        ));
        let payload = request.to_bytes();
        let entry = Entry::new(fsm, ctx, request, now);
        let effects = self.table.insert(key.clone(), entry, now, Vec::new(), |entry| {
            entry.fsm.on_event(ClientNonInviteEvent::SendRequest(payload))
        })?;
        Ok((key, effects))
    }

    pub fn on_response(
        &self,
        response: Arc<Response>,
        now: Instant,
    ) -> Result<Vec<TransactionEffect>, TransactionError> {
        let key =
            TransactionKey::from_response(&response, false).ok_or(TransactionError::MissingBranch)?;
        if key.method.is_invite() {
            return Err(TransactionError::WrongMethod(key.method));
        }
        let event = if response.is_provisional() {
            ClientNonInviteEvent::ReceiveProvisional(response)
        } else {
            ClientNonInviteEvent::ReceiveFinal(response)
        };
        self.table.drive(&key, now, |entry| Ok(entry.fsm.on_event(event)))
    }

    pub fn state(&self, key: &TransactionKey) -> Option<ClientNonInviteState> {
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
    use crate::{Termination, TransactionTimer};
    use sip_core::{Method, TransportKind};
    use std::time::Duration;

    fn options(branch: &str) -> Arc<Request> {
        let mut req = Request::new(Method::Options, "sip:bob@example.com");
        req.headers.push("Via", format!("SIP/2.0/UDP 10.0.0.1:5060;branch={}", branch));
        req.headers.push("From", "<sip:alice@example.com>;tag=a1");
        req.headers.push("To", "<sip:bob@example.com>");
        req.headers.push("Call-ID", "opt-1");
        req.headers.push("CSeq", "7 OPTIONS");
        Arc::new(req)
    }

    fn udp() -> TransportContext {
        TransportContext::new(TransportKind::Udp, "10.0.0.2:5060".parse().unwrap())
    }

    fn list() -> NictList {
        NictList::new(16, TimerDefaults::default(), TransactionMetrics::new())
    }

    #[test]
    fn ack_and_invite_are_refused() {
        let list = list();
        let mut ack = Request::new(Method::Ack, "sip:bob@example.com");
        ack.headers.push("Via", "SIP/2.0/UDP h;branch=z9hG4bKack");
        assert!(matches!(
            list.admit(Arc::new(ack), udp(), Instant::now()),
            Err(TransactionError::WrongMethod(Method::Ack))
        ));
    }

    #[test]
    fn final_response_completes_then_timer_k_removes() {
        let list = list();
        let now = Instant::now();
        let request = options("z9hG4bKo1");
        let (key, _) = list.admit(request.clone(), udp(), now).unwrap();

        let trying = Arc::new(request.create_response(100, None).unwrap());
        list.on_response(trying, now).unwrap();
        assert_eq!(list.state(&key), Some(ClientNonInviteState::Proceeding));

        let ok = Arc::new(request.create_response(200, Some("t")).unwrap());
        let effects = list.on_response(ok.clone(), now).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(list.on_response(ok, now).unwrap().is_empty());

        let effects = list.tick(now + Duration::from_secs(5));
        assert!(matches!(
            effects.as_slice(),
            [TransactionEffect::Terminated { reason: Termination::Completed, .. }]
        ));
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn timer_f_times_out_in_proceeding() {
        let list = list();
        let now = Instant::now();
        let request = options("z9hG4bKo2");
        list.admit(request.clone(), udp(), now).unwrap();
        let trying = Arc::new(request.create_response(100, None).unwrap());
        list.on_response(trying, now).unwrap();

        let effects = list.tick(now + Duration::from_secs(32));
        assert!(effects.iter().any(|e| matches!(
            e,
            TransactionEffect::Terminated {
                reason: Termination::Timeout(TransactionTimer::F),
                ..
            }
        )));
        assert!(list.is_empty());
    }

    #[test]
    fn unmatched_response_is_reported() {
        let list = list();
        let ok = options("z9hG4bKo3").create_response(200, Some("t")).unwrap();
        assert!(matches!(
            list.on_response(Arc::new(ok), Instant::now()),
            Err(TransactionError::NoMatch(_))
        ));
    }
}
