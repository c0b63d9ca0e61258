// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Server INVITE transaction list.
//!
//! The first receipt of an INVITE creates the entry and is delivered once;
//! retransmissions only ever re-send the last response. An ACK for a non-2xx
//! final carries the INVITE's branch and matches by key. An ACK for a 2xx is
//! a new transaction on the wire, so it is matched by Call-ID and CSeq number
//! and handed to the application the first time only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use sip_core::{Method, Request, Response, TransportKind};

use crate::fsm::{Action, ServerInviteEvent, ServerInviteFsm, StateMachine};
use crate::metrics::TransactionMetrics;
use crate::table::{Entry, EntryReport, Table};
use crate::timers::{TimerDefaults, TransportAwareTimers};
use crate::{
    ListKind, ServerInviteState, TransactionEffect, TransactionError, TransactionKey,
    TransportContext,
};

pub struct IstList {
    table: Table<ServerInviteFsm>,
    defaults: TimerDefaults,
}

impl IstList {
    pub fn new(limit: usize, defaults: TimerDefaults, metrics: TransactionMetrics) -> Self {
        Self {
            table: Table::new(ListKind::Ist, limit, metrics),
            defaults,
        }
    }

    /// Matches or creates the transaction for a received INVITE.
    ///
    /// A new entry yields a `DeliverRequest` effect; a duplicate yields at
    /// most a retransmission of the last response.
    pub fn on_request(
        &self,
        request: Arc<Request>,
        ctx: TransportContext,
        now: Instant,
    ) -> Result<Vec<TransactionEffect>, TransactionError> {
        if !request.method().is_invite() {
            return Err(TransactionError::WrongMethod(request.method().clone()));
        }
        let key =
            TransactionKey::from_request(&request, true).ok_or(TransactionError::MissingBranch)?;
        match self
            .table
            .drive(&key, now, |entry| Ok(entry.fsm.on_event(ServerInviteEvent::ReceiveInvite)))
        {
            Err(TransactionError::NoMatch(_)) => {}
            other => return other,
        }

        let fsm = ServerInviteFsm::new(TransportAwareTimers::with_defaults(
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

    /// Matches a received ACK.
    ///
    /// Returns `NoMatch` when no INVITE transaction claims the ACK.
    pub fn on_ack(
        &self,
        ack: Arc<Request>,
        ctx: TransportContext,
        now: Instant,
    ) -> Result<Vec<TransactionEffect>, TransactionError> {
        if *ack.method() != Method::Ack {
            return Err(TransactionError::WrongMethod(ack.method().clone()));
        }
        let key = TransactionKey::from_request(&ack, true).ok_or(TransactionError::MissingBranch)?;
        match self.table.drive(&key, now, |entry| Ok(Self::absorb_ack(entry))) {
            Err(TransactionError::NoMatch(_)) => {}
            other => return other,
        }

        let call_id = ack.call_id();
        let number = ack.cseq().map(|cseq| cseq.number);
        let mut first = false;
        let (matched, mut effects) = self
            .table
            .drive_where(
                |_, entry| {
                    entry.request.call_id() == call_id
                        && entry.request.cseq().map(|cseq| cseq.number) == number
                },
                now,
                |entry| {
                    first = entry.fsm.state == ServerInviteState::Completed;
                    Self::absorb_ack(entry)
                },
            )
            .ok_or(TransactionError::NoMatch(key))?;
        if first {
            effects.insert(
                0,
                TransactionEffect::DeliverRequest {
                    key: matched,
                    ctx,
                    request: ack,
                },
            );
        }
        Ok(effects)
    }

    fn absorb_ack(entry: &mut Entry<ServerInviteFsm>) -> Vec<Action> {
        entry.fsm.on_event(ServerInviteEvent::ReceiveAck)
    }

    /// Sends a response through the transaction the request created.
    pub fn send_response(
        &self,
        response: &Response,
        now: Instant,
    ) -> Result<Vec<TransactionEffect>, TransactionError> {
        let key =
            TransactionKey::from_response(response, true).ok_or(TransactionError::MissingBranch)?;
        if !key.method.is_invite() {
            return Err(TransactionError::WrongMethod(key.method));
        }
        let payload = response.to_bytes();
        let code = response.code();
        self.table.drive(&key, now, |entry| {
            if entry.fsm.state != ServerInviteState::Proceeding {
                return Err(TransactionError::InvalidState {
                    key: key.clone(),
                    state: entry.fsm.state_name(),
                });
            }
            if code < 200 {
                Ok(entry.fsm.on_event(ServerInviteEvent::SendProvisional(payload)))
            } else {
                entry.final_code = Some(code);
                Ok(entry.fsm.on_event(ServerInviteEvent::SendFinal(payload)))
            }
        })
    }

    /// Original INVITE of a live transaction.
    pub fn request(&self, key: &TransactionKey) -> Option<Arc<Request>> {
        self.table.inspect(key, |entry| entry.request.clone())
    }

    pub fn state(&self, key: &TransactionKey) -> Option<ServerInviteState> {
        self.table.inspect(key, |entry| entry.fsm.state)
    }

    /// Final status sent on a live transaction, if any.
    pub fn final_code(&self, key: &TransactionKey) -> Option<u16> {
        self.table.inspect(key, |entry| entry.final_code).flatten()
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
    use sip_core::TransportKind;
    use std::time::Duration;

    fn invite() -> Arc<Request> {
        let mut req = Request::new(Method::Invite, "sip:bob@10.0.0.2");
        req.headers.push("Via", "SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKist1;rport");
        req.headers.push("From", "<sip:alice@example.com>;tag=a1");
        req.headers.push("To", "<sip:bob@example.com>");
        req.headers.push("Call-ID", "ist-call");
        req.headers.push("CSeq", "3 INVITE");
        Arc::new(req)
    }

    fn udp() -> TransportContext {
        TransportContext::new(TransportKind::Udp, "10.0.0.1:5060".parse().unwrap())
    }

    fn list() -> IstList {
        IstList::new(16, TimerDefaults::default(), TransactionMetrics::new())
    }

    fn deliveries(effects: &[TransactionEffect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, TransactionEffect::DeliverRequest { .. }))
            .count()
    }

    #[test]
    fn duplicates_are_absorbed_and_trigger_retransmission() {
        let list = list();
        let now = Instant::now();
        let request = invite();
        assert_eq!(deliveries(&list.on_request(request.clone(), udp(), now).unwrap()), 1);
        assert!(list.on_request(request.clone(), udp(), now).unwrap().is_empty());

        let ringing = request.create_response(180, Some("b1")).unwrap();
        list.send_response(&ringing, now).unwrap();
        let effects = list.on_request(request, udp(), now).unwrap();
        assert_eq!(deliveries(&effects), 0);
        assert!(matches!(effects.as_slice(), [TransactionEffect::Transmit { .. }]));
    }

    #[test]
    fn non_2xx_ack_confirms_without_delivery() {
        let list = list();
        let now = Instant::now();
        let request = invite();
        list.on_request(request.clone(), udp(), now).unwrap();
        let busy = request.create_response(486, Some("b1")).unwrap();
        list.send_response(&busy, now).unwrap();

        let ack = Arc::new(request.create_ack(&busy).unwrap());
        let effects = list.on_ack(ack, udp(), now).unwrap();
        assert_eq!(deliveries(&effects), 0);
        let key = TransactionKey::from_request(&request, true).unwrap();
        assert_eq!(list.state(&key), Some(ServerInviteState::Confirmed));
        assert_eq!(list.final_code(&key), Some(486));

        let effects = list.tick(now + Duration::from_secs(5));
        assert!(matches!(
            effects.as_slice(),
            [TransactionEffect::Terminated { reason: Termination::Completed, .. }]
        ));
    }

    #[test]
    fn ack_for_2xx_is_delivered_once() {
        let list = list();
        let now = Instant::now();
        let request = invite();
        list.on_request(request.clone(), udp(), now).unwrap();
        let ok = request.create_response(200, Some("b1")).unwrap();
        list.send_response(&ok, now).unwrap();

        let mut ack = request.create_ack(&ok).unwrap();
        ack.headers.set("Via", "SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKnew");
        let ack = Arc::new(ack);
        assert_eq!(deliveries(&list.on_ack(ack.clone(), udp(), now).unwrap()), 1);
        assert_eq!(deliveries(&list.on_ack(ack, udp(), now).unwrap()), 0);
    }

    #[test]
    fn stray_ack_is_unmatched() {
        let list = list();
        let request = invite();
        let busy = request.create_response(486, Some("b1")).unwrap();
        let ack = Arc::new(request.create_ack(&busy).unwrap());
        assert!(matches!(
            list.on_ack(ack, udp(), Instant::now()),
            Err(TransactionError::NoMatch(_))
        ));
    }

    #[test]
    fn timer_h_without_ack_times_out() {
        let list = list();
        let now = Instant::now();
        let request = invite();
        list.on_request(request.clone(), udp(), now).unwrap();
        let busy = request.create_response(486, Some("b1")).unwrap();
        list.send_response(&busy, now).unwrap();

        let mut retransmits = 0;
        let mut terminated = None;
        for step in 1..=64 {
            for effect in list.tick(now + Duration::from_millis(500 * step)) {
                match effect {
                    TransactionEffect::Transmit { .. } => retransmits += 1,
                    TransactionEffect::Terminated { reason, .. } => terminated = Some(reason),
                    _ => {}
                }
            }
        }
        assert_eq!(terminated, Some(Termination::Timeout(TransactionTimer::H)));
        assert_eq!(retransmits, 10);
        assert!(list.is_empty());
    }

    #[test]
    fn second_final_response_is_refused() {
        let list = list();
        let now = Instant::now();
        let request = invite();
        list.on_request(request.clone(), udp(), now).unwrap();
        list.send_response(&request.create_response(486, Some("b1")).unwrap(), now)
            .unwrap();
        assert!(matches!(
            list.send_response(&request.create_response(200, Some("b1")).unwrap(), now),
            Err(TransactionError::InvalidState { state: "Completed", .. })
        ));
    }
}
