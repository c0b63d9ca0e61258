// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sip_core::{Method, Request, TransportKind};
use bytes::Bytes;
use sip_transaction::{
    ClientInviteState, ClientNonInviteState, IctList, IstList, ListKind, NictList, NistList,
    ServerInviteState, Termination, TimerDefaults, TransactionEffect, TransactionKey,
    TransactionMetrics, TransactionTimer, TransportContext,
};

const PEER: &str = "192.0.2.10:5060";

fn request(method: Method, branch: &str, call_id: &str) -> Arc<Request> {
    let mut req = Request::new(method.clone(), "sip:bob@192.0.2.10");
    req.headers.push(
        "Via",
        format!("SIP/2.0/UDP 192.0.2.1:5060;branch={};rport", branch),
    );
    req.headers.push("Max-Forwards", "70");
    req.headers.push("From", "<sip:alice@example.com>;tag=1928301774");
    req.headers.push("To", "<sip:bob@example.com>");
    req.headers.push("Call-ID", call_id);
    req.headers.push("CSeq", format!("1 {}", method));
    Arc::new(req)
}

fn udp() -> TransportContext {
    TransportContext::new(TransportKind::Udp, PEER.parse().unwrap())
}

fn transmit_count(effects: &[TransactionEffect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, TransactionEffect::Transmit { .. }))
        .count()
}

fn transmitted(effects: &[TransactionEffect]) -> Vec<Bytes> {
    effects
        .iter()
        .filter_map(|e| match e {
            TransactionEffect::Transmit { payload, .. } => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

/// Gaps between consecutive send times, starting from the first send at 0.
fn intervals(sent_at: &[u128]) -> Vec<u128> {
    let mut previous = 0;
    sent_at
        .iter()
        .map(|at| {
            let gap = at - previous;
            previous = *at;
            gap
        })
        .collect()
}

fn termination(effects: &[TransactionEffect]) -> Option<Termination> {
    effects.iter().find_map(|e| match e {
        TransactionEffect::Terminated { reason, .. } => Some(*reason),
        _ => None,
    })
}

#[test]
fn unanswered_udp_invite_retransmits_ten_times_then_times_out() {
    let metrics = TransactionMetrics::new();
    let ict = IctList::new(64, TimerDefaults::default(), metrics.clone());
    let start = Instant::now();
    let (key, effects) = ict
        .admit(request(Method::Invite, "z9hG4bKlost", "lost@h"), udp(), start)
        .unwrap();
    assert_eq!(transmit_count(&effects), 1);

    let mut retransmitted_at = Vec::new();
    let mut outcome = None;
    // 100ms cadence, well below the smallest interval
    for step in 1..=330u64 {
        let elapsed = Duration::from_millis(step * 100);
        let effects = ict.tick(start + elapsed);
        for _ in 0..transmit_count(&effects) {
            retransmitted_at.push(elapsed.as_millis());
        }
        if let Some(reason) = termination(&effects) {
            outcome = Some((reason, elapsed));
            break;
        }
    }

    assert_eq!(
        retransmitted_at,
        vec![500, 1500, 3500, 7500, 11500, 15500, 19500, 23500, 27500, 31500]
    );
    assert_eq!(
        outcome,
        Some((
            Termination::Timeout(TransactionTimer::B),
            Duration::from_secs(32)
        ))
    );
    assert!(ict.state(&key).is_none());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.timer_fires(TransactionTimer::A), 10);
    assert_eq!(snapshot.timer_fires(TransactionTimer::B), 1);
    assert_eq!(snapshot.retransmissions(TransportKind::Udp), 10);
}

#[test]
fn coarse_ticks_fire_each_timer_once_per_tick() {
    let ict = IctList::new(64, TimerDefaults::default(), TransactionMetrics::new());
    let start = Instant::now();
    ict.admit(request(Method::Invite, "z9hG4bKcoarse", "coarse@h"), udp(), start)
        .unwrap();

    // one late tick: A fires once even though several intervals have passed
    let effects = ict.tick(start + Duration::from_secs(10));
    assert_eq!(transmit_count(&effects), 1);
    assert!(termination(&effects).is_none());

    let effects = ict.tick(start + Duration::from_secs(40));
    assert_eq!(
        termination(&effects),
        Some(Termination::Timeout(TransactionTimer::B))
    );
}

#[test]
fn duplicate_invites_reach_the_application_once() {
    let ist = IstList::new(64, TimerDefaults::default(), TransactionMetrics::new());
    let now = Instant::now();
    let invite = request(Method::Invite, "z9hG4bKdup", "dup@h");

    let mut delivered = 0;
    let mut retransmitted = 0;
    for round in 0..5 {
        if round == 2 {
            let ringing = invite.create_response(180, Some("as83kd9bs")).unwrap();
            ist.send_response(&ringing, now).unwrap();
        }
        for effect in ist.on_request(invite.clone(), udp(), now).unwrap() {
            match effect {
                TransactionEffect::DeliverRequest { .. } => delivered += 1,
                TransactionEffect::Transmit { .. } => retransmitted += 1,
                _ => {}
            }
        }
    }
    assert_eq!(delivered, 1);
    // rounds 2, 3 and 4 see the 180
    assert_eq!(retransmitted, 3);
}

#[test]
fn ist_failure_waits_for_ack_or_reports_timer_h() {
    let ist = IstList::new(64, TimerDefaults::default(), TransactionMetrics::new());
    let now = Instant::now();
    let invite = request(Method::Invite, "z9hG4bKnoack", "noack@h");
    ist.on_request(invite.clone(), udp(), now).unwrap();
    let key = TransactionKey::from_request(&invite, true).unwrap();

    ist.send_response(&invite.create_response(603, Some("x1")).unwrap(), now)
        .unwrap();
    assert_eq!(ist.state(&key), Some(ServerInviteState::Completed));
    assert!(termination(&ist.tick(now + Duration::from_millis(31_900))).is_none());
    assert_eq!(ist.state(&key), Some(ServerInviteState::Completed));

    let effects = ist.tick(now + Duration::from_secs(32));
    assert_eq!(
        termination(&effects),
        Some(Termination::Timeout(TransactionTimer::H))
    );
    assert!(ist.is_empty());
}

#[test]
fn every_list_reaches_terminated_and_is_removed() {
    let metrics = TransactionMetrics::new();
    let defaults = TimerDefaults::default();
    let ict = IctList::new(8, defaults, metrics.clone());
    let nict = NictList::new(8, defaults, metrics.clone());
    let ist = IstList::new(8, defaults, metrics.clone());
    let nist = NistList::new(8, defaults, metrics.clone());
    let t0 = Instant::now();

    let invite = request(Method::Invite, "z9hG4bKrt1", "rt1@h");
    let (ict_key, _) = ict.admit(invite.clone(), udp(), t0).unwrap();
    let ringing = Arc::new(invite.create_response(180, Some("r")).unwrap());
    ict.on_response(ringing, t0).unwrap();
    assert_eq!(ict.state(&ict_key), Some(ClientInviteState::Proceeding));
    ict.on_response(Arc::new(invite.create_response(404, Some("r")).unwrap()), t0)
        .unwrap();

    let options = request(Method::Options, "z9hG4bKrt2", "rt2@h");
    nict.admit(options.clone(), udp(), t0).unwrap();
    nict.on_response(Arc::new(options.create_response(200, Some("o")).unwrap()), t0)
        .unwrap();

    let incoming = request(Method::Invite, "z9hG4bKrt3", "rt3@h");
    ist.on_request(incoming.clone(), udp(), t0).unwrap();
    let busy = incoming.create_response(486, Some("i")).unwrap();
    ist.send_response(&busy, t0).unwrap();
    ist.on_ack(Arc::new(incoming.create_ack(&busy).unwrap()), udp(), t0)
        .unwrap();

    let register = request(Method::Register, "z9hG4bKrt4", "rt4@h");
    nist.on_request(register.clone(), udp(), t0).unwrap();
    nist.send_response(&register.create_response(200, Some("g")).unwrap(), t0)
        .unwrap();

    let later = t0 + Duration::from_secs(33);
    let terminated: usize = [ict.tick(later), nict.tick(later), ist.tick(later), nist.tick(later)]
        .iter()
        .map(|effects| termination(effects).map_or(0, |_| 1))
        .sum();
    assert_eq!(terminated, 4);
    assert!(ict.is_empty() && nict.is_empty() && ist.is_empty() && nist.is_empty());

    let snapshot = metrics.snapshot();
    for kind in ListKind::ALL {
        assert_eq!(snapshot.started(kind), 1, "{}", kind.as_str());
        assert_eq!(snapshot.ended(kind), 1, "{}", kind.as_str());
    }
}

#[test]
fn peer_failure_terminates_bound_transactions() {
    let nict = NictList::new(8, TimerDefaults::default(), TransactionMetrics::new());
    let now = Instant::now();
    nict.admit(request(Method::Options, "z9hG4bKp1", "p1@h"), udp(), now)
        .unwrap();
    let elsewhere = TransportContext::new(
        TransportKind::Tcp,
        "198.51.100.7:5060".parse::<SocketAddr>().unwrap(),
    );
    nict.admit(request(Method::Options, "z9hG4bKp2", "p2@h"), elsewhere, now)
        .unwrap();

    let effects = nict.fail_peer(TransportKind::Udp, PEER.parse().unwrap(), now);
    assert_eq!(termination(&effects), Some(Termination::TransportError));
    assert_eq!(nict.len(), 1);
    let report = nict.report(now);
    assert_eq!(report[0].peer, elsewhere.peer);
    assert_eq!(report[0].state, "Trying");
}

#[test]
fn udp_non_invite_backs_off_to_t2_until_a_provisional() {
    let metrics = TransactionMetrics::new();
    let nict = NictList::new(64, TimerDefaults::default(), metrics.clone());
    let start = Instant::now();
    let options = request(Method::Options, "z9hG4bKslow", "slow@h");
    let (key, effects) = nict.admit(options.clone(), udp(), start).unwrap();
    let first = transmitted(&effects);
    assert_eq!(first.len(), 1);

    let mut sent_at = Vec::new();
    for step in 1..=120u64 {
        let elapsed = Duration::from_millis(step * 100);
        let effects = nict.tick(start + elapsed);
        for payload in transmitted(&effects) {
            assert_eq!(payload, first[0]);
            sent_at.push(elapsed.as_millis());
        }
        assert!(termination(&effects).is_none());
    }
    assert_eq!(sent_at, vec![500, 1500, 3500, 7500, 11500]);
    assert_eq!(intervals(&sent_at), vec![500, 1000, 2000, 4000, 4000]);

    let trying = Arc::new(options.create_response(100, None).unwrap());
    let effects = nict
        .on_response(trying, start + Duration::from_millis(12_000))
        .unwrap();
    assert_eq!(transmit_count(&effects), 0);
    assert_eq!(nict.state(&key), Some(ClientNonInviteState::Proceeding));

    for step in 121..320u64 {
        let effects = nict.tick(start + Duration::from_millis(step * 100));
        assert_eq!(transmit_count(&effects), 0, "resent at {}ms", step * 100);
        assert!(termination(&effects).is_none());
    }
    let effects = nict.tick(start + Duration::from_secs(32));
    assert_eq!(
        termination(&effects),
        Some(Termination::Timeout(TransactionTimer::F))
    );

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.timer_fires(TransactionTimer::E), 5);
    assert_eq!(snapshot.retransmissions(TransportKind::Udp), 5);
}

#[test]
fn udp_final_response_backs_off_to_t2_until_timer_h() {
    let ist = IstList::new(64, TimerDefaults::default(), TransactionMetrics::new());
    let start = Instant::now();
    let invite = request(Method::Invite, "z9hG4bKg1", "g1@h");
    ist.on_request(invite.clone(), udp(), start).unwrap();
    let effects = ist
        .send_response(&invite.create_response(480, Some("g")).unwrap(), start)
        .unwrap();
    let first = transmitted(&effects);
    assert_eq!(first.len(), 1);

    let mut sent_at = Vec::new();
    let mut outcome = None;
    for step in 1..=330u64 {
        let elapsed = Duration::from_millis(step * 100);
        let effects = ist.tick(start + elapsed);
        for payload in transmitted(&effects) {
            assert_eq!(payload, first[0]);
            sent_at.push(elapsed.as_millis());
        }
        if let Some(reason) = termination(&effects) {
            outcome = Some((reason, elapsed));
            break;
        }
    }
    assert_eq!(
        intervals(&sent_at),
        vec![500, 1000, 2000, 4000, 4000, 4000, 4000, 4000, 4000, 4000]
    );
    assert_eq!(
        outcome,
        Some((
            Termination::Timeout(TransactionTimer::H),
            Duration::from_secs(32)
        ))
    );
}

#[test]
fn ack_stops_final_response_retransmission() {
    let metrics = TransactionMetrics::new();
    let ist = IstList::new(64, TimerDefaults::default(), metrics.clone());
    let start = Instant::now();
    let invite = request(Method::Invite, "z9hG4bKg2", "g2@h");
    ist.on_request(invite.clone(), udp(), start).unwrap();
    let busy = invite.create_response(486, Some("g")).unwrap();
    ist.send_response(&busy, start).unwrap();
    let key = TransactionKey::from_request(&invite, true).unwrap();

    let mut sent_at = Vec::new();
    for step in 1..=40u64 {
        let elapsed = Duration::from_millis(step * 100);
        sent_at.extend(
            std::iter::repeat(elapsed.as_millis()).take(transmit_count(&ist.tick(start + elapsed))),
        );
    }
    assert_eq!(sent_at, vec![500, 1500, 3500]);

    let acked_at = start + Duration::from_millis(4_000);
    ist.on_ack(Arc::new(invite.create_ack(&busy).unwrap()), udp(), acked_at)
        .unwrap();
    assert_eq!(ist.state(&key), Some(ServerInviteState::Confirmed));

    // Timer I (T4) ends the transaction; nothing is resent meanwhile
    let mut outcome = None;
    for step in 41..=100u64 {
        let elapsed = Duration::from_millis(step * 100);
        let effects = ist.tick(start + elapsed);
        assert_eq!(transmit_count(&effects), 0, "resent at {}ms", step * 100);
        if let Some(reason) = termination(&effects) {
            outcome = Some((reason, elapsed));
            break;
        }
    }
    assert_eq!(
        outcome,
        Some((Termination::Completed, Duration::from_secs(9)))
    );
    assert_eq!(metrics.snapshot().timer_fires(TransactionTimer::G), 3);
}
