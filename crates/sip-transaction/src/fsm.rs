// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Sans-IO transaction state machines.
//!
//! Each machine consumes an event and returns the [`Action`]s the owning list
//! must apply. Timer actions carry durations; the list turns them into
//! deadlines.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sip_core::Response;

use crate::timers::TransportAwareTimers;
use crate::{
    ClientInviteState, ClientNonInviteState, ServerInviteState, ServerNonInviteState, Termination,
    TransactionTimer,
};

/// Instructions a state machine hands to its list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// First transmission of a message.
    Transmit(Bytes),
    /// Repeat of an earlier transmission, counted against the entry.
    Retransmit(Bytes),
    Deliver(Arc<Response>),
    /// Build and send the ACK for this non-2xx final response.
    SendAck(Arc<Response>),
    /// Send again whichever ACK the entry holds, if any.
    ResendAck,
    Schedule {
        timer: TransactionTimer,
        duration: Duration,
    },
    Cancel(TransactionTimer),
    Terminate(Termination),
}

/// Hooks the generic list machinery needs from every machine.
pub(crate) trait StateMachine: Send {
    fn on_timer(&mut self, timer: TransactionTimer) -> Vec<Action>;
    fn on_transport_error(&mut self) -> Vec<Action>;
    fn state_name(&self) -> &'static str;
}

fn schedule(timer: TransactionTimer, duration: Duration) -> Action {
    Action::Schedule { timer, duration }
}

/// Events that drive the client INVITE transaction (RFC 3261 §17.1.1).
#[derive(Debug, Clone)]
pub enum ClientInviteEvent {
    SendInvite(Bytes),
    ReceiveProvisional(Arc<Response>),
    ReceiveFinal(Arc<Response>),
    TimerFired(TransactionTimer),
    TransportError,
}

pub struct ClientInviteFsm {
    pub state: ClientInviteState,
    timers: TransportAwareTimers,
    a_interval: Duration,
    last_invite: Option<Bytes>,
}

impl ClientInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ClientInviteState::Calling,
            a_interval: timers.duration(TransactionTimer::A),
            timers,
            last_invite: None,
        }
    }

    pub fn on_event(&mut self, event: ClientInviteEvent) -> Vec<Action> {
        use ClientInviteState::*;
        match (self.state, event) {
            (Calling, ClientInviteEvent::SendInvite(bytes)) => self.handle_send(bytes),
            (Calling | Proceeding, ClientInviteEvent::ReceiveProvisional(response)) => {
                self.handle_provisional(response)
            }
            (Calling | Proceeding, ClientInviteEvent::ReceiveFinal(response)) => {
                self.handle_final(response)
            }
            // duplicates of the final response: ACK again, never deliver again
            (Completed, ClientInviteEvent::ReceiveFinal(_)) => vec![Action::ResendAck],
            (Calling, ClientInviteEvent::TimerFired(TransactionTimer::A)) => self.handle_timer_a(),
            (Calling, ClientInviteEvent::TimerFired(TransactionTimer::B)) => {
                self.terminate(Termination::Timeout(TransactionTimer::B))
            }
            (Proceeding, ClientInviteEvent::TimerFired(TransactionTimer::C)) => {
                self.terminate(Termination::Timeout(TransactionTimer::C))
            }
            (Completed, ClientInviteEvent::TimerFired(TransactionTimer::D)) => {
                self.terminate(Termination::Completed)
            }
            (Terminated, _) => Vec::new(),
            (_, ClientInviteEvent::TransportError) => self.terminate(Termination::TransportError),
            _ => Vec::new(),
        }
    }

    fn handle_send(&mut self, bytes: Bytes) -> Vec<Action> {
        self.last_invite = Some(bytes.clone());
        let mut actions = vec![Action::Transmit(bytes)];
        if self.timers.should_retransmit() {
            actions.push(schedule(TransactionTimer::A, self.a_interval));
        }
        actions.push(schedule(
            TransactionTimer::B,
            self.timers.duration(TransactionTimer::B),
        ));
        actions
    }

    fn handle_provisional(&mut self, response: Arc<Response>) -> Vec<Action> {
        self.state = ClientInviteState::Proceeding;
        vec![
            Action::Cancel(TransactionTimer::A),
            Action::Cancel(TransactionTimer::B),
            schedule(TransactionTimer::C, self.timers.duration(TransactionTimer::C)),
            Action::Deliver(response),
        ]
    }

    fn handle_final(&mut self, response: Arc<Response>) -> Vec<Action> {
        self.state = ClientInviteState::Completed;
        let mut actions = vec![
            Action::Cancel(TransactionTimer::A),
            Action::Cancel(TransactionTimer::B),
            Action::Cancel(TransactionTimer::C),
        ];
        if !response.is_success() {
            actions.push(Action::SendAck(response.clone()));
        }
        actions.push(Action::Deliver(response));
        actions.push(schedule(
            TransactionTimer::D,
            self.timers.duration(TransactionTimer::D),
        ));
        actions
    }

    fn handle_timer_a(&mut self) -> Vec<Action> {
        let Some(invite) = self.last_invite.clone() else {
            return Vec::new();
        };
        self.a_interval = self.timers.next_interval(self.a_interval);
        vec![
            Action::Retransmit(invite),
            schedule(TransactionTimer::A, self.a_interval),
        ]
    }

    fn terminate(&mut self, reason: Termination) -> Vec<Action> {
        self.state = ClientInviteState::Terminated;
        vec![Action::Terminate(reason)]
    }
}

impl StateMachine for ClientInviteFsm {
    fn on_timer(&mut self, timer: TransactionTimer) -> Vec<Action> {
        self.on_event(ClientInviteEvent::TimerFired(timer))
    }

    fn on_transport_error(&mut self) -> Vec<Action> {
        self.on_event(ClientInviteEvent::TransportError)
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            ClientInviteState::Calling => "Calling",
            ClientInviteState::Proceeding => "Proceeding",
            ClientInviteState::Completed => "Completed",
            ClientInviteState::Terminated => "Terminated",
        }
    }
}

/// Events that drive the client non-INVITE transaction (RFC 3261 §17.1.2).
#[derive(Debug, Clone)]
pub enum ClientNonInviteEvent {
    SendRequest(Bytes),
    ReceiveProvisional(Arc<Response>),
    ReceiveFinal(Arc<Response>),
    TimerFired(TransactionTimer),
    TransportError,
}

pub struct ClientNonInviteFsm {
    pub state: ClientNonInviteState,
    timers: TransportAwareTimers,
    e_interval: Duration,
    last_request: Option<Bytes>,
}

impl ClientNonInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ClientNonInviteState::Trying,
            e_interval: timers.duration(TransactionTimer::E),
            timers,
            last_request: None,
        }
    }

    pub fn on_event(&mut self, event: ClientNonInviteEvent) -> Vec<Action> {
        use ClientNonInviteState::*;
        match (self.state, event) {
            (Trying, ClientNonInviteEvent::SendRequest(bytes)) => {
                self.last_request = Some(bytes.clone());
                let mut actions = vec![Action::Transmit(bytes)];
                if self.timers.should_retransmit() {
                    actions.push(schedule(TransactionTimer::E, self.e_interval));
                }
                actions.push(schedule(
                    TransactionTimer::F,
                    self.timers.duration(TransactionTimer::F),
                ));
                actions
            }
            (Trying | Proceeding, ClientNonInviteEvent::ReceiveProvisional(response)) => {
                self.state = Proceeding;
                vec![Action::Cancel(TransactionTimer::E), Action::Deliver(response)]
            }
            (Trying | Proceeding, ClientNonInviteEvent::ReceiveFinal(response)) => {
                self.state = Completed;
                vec![
                    Action::Cancel(TransactionTimer::E),
                    Action::Cancel(TransactionTimer::F),
                    Action::Deliver(response),
                    schedule(TransactionTimer::K, self.timers.duration(TransactionTimer::K)),
                ]
            }
            (Trying, ClientNonInviteEvent::TimerFired(TransactionTimer::E)) => {
                let Some(request) = self.last_request.clone() else {
                    return Vec::new();
                };
                self.e_interval = self.timers.next_interval(self.e_interval);
                vec![
                    Action::Retransmit(request),
                    schedule(TransactionTimer::E, self.e_interval),
                ]
            }
            (Trying | Proceeding, ClientNonInviteEvent::TimerFired(TransactionTimer::F)) => {
                self.state = Terminated;
                vec![Action::Terminate(Termination::Timeout(TransactionTimer::F))]
            }
            (Completed, ClientNonInviteEvent::TimerFired(TransactionTimer::K)) => {
                self.state = Terminated;
                vec![Action::Terminate(Termination::Completed)]
            }
            (Terminated, _) => Vec::new(),
            (_, ClientNonInviteEvent::TransportError) => {
                self.state = Terminated;
                vec![Action::Terminate(Termination::TransportError)]
            }
            _ => Vec::new(),
        }
    }
}

impl StateMachine for ClientNonInviteFsm {
    fn on_timer(&mut self, timer: TransactionTimer) -> Vec<Action> {
        self.on_event(ClientNonInviteEvent::TimerFired(timer))
    }

    fn on_transport_error(&mut self) -> Vec<Action> {
        self.on_event(ClientNonInviteEvent::TransportError)
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            ClientNonInviteState::Trying => "Trying",
            ClientNonInviteState::Proceeding => "Proceeding",
            ClientNonInviteState::Completed => "Completed",
            ClientNonInviteState::Terminated => "Terminated",
        }
    }
}

/// Events that drive the server INVITE transaction (RFC 3261 §17.2.1).
#[derive(Debug, Clone)]
pub enum ServerInviteEvent {
    /// A retransmission of the INVITE that created the transaction.
    ReceiveInvite,
    SendProvisional(Bytes),
    SendFinal(Bytes),
    ReceiveAck,
    TimerFired(TransactionTimer),
    TransportError,
}

pub struct ServerInviteFsm {
    pub state: ServerInviteState,
    timers: TransportAwareTimers,
    g_interval: Duration,
    last_response: Option<Bytes>,
}

impl ServerInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ServerInviteState::Proceeding,
            g_interval: timers.duration(TransactionTimer::G),
            timers,
            last_response: None,
        }
    }

    pub fn on_event(&mut self, event: ServerInviteEvent) -> Vec<Action> {
        use ServerInviteState::*;
        match (self.state, event) {
            (Proceeding | Completed, ServerInviteEvent::ReceiveInvite) => self
                .last_response
                .clone()
                .map(|bytes| vec![Action::Retransmit(bytes)])
                .unwrap_or_default(),
            (Proceeding, ServerInviteEvent::SendProvisional(bytes)) => {
                self.last_response = Some(bytes.clone());
                vec![Action::Transmit(bytes)]
            }
            (Proceeding, ServerInviteEvent::SendFinal(bytes)) => {
                self.state = Completed;
                self.last_response = Some(bytes.clone());
                let mut actions = vec![Action::Transmit(bytes)];
                if self.timers.should_retransmit() {
                    actions.push(schedule(TransactionTimer::G, self.g_interval));
                }
                actions.push(schedule(
                    TransactionTimer::H,
                    self.timers.duration(TransactionTimer::H),
                ));
                actions
            }
            (Completed, ServerInviteEvent::ReceiveAck) => {
                self.state = Confirmed;
                vec![
                    Action::Cancel(TransactionTimer::G),
                    Action::Cancel(TransactionTimer::H),
                    schedule(TransactionTimer::I, self.timers.duration(TransactionTimer::I)),
                ]
            }
            (Completed, ServerInviteEvent::TimerFired(TransactionTimer::G)) => {
                let Some(bytes) = self.last_response.clone() else {
                    return Vec::new();
                };
                self.g_interval = self.timers.next_interval(self.g_interval);
                vec![
                    Action::Retransmit(bytes),
                    schedule(TransactionTimer::G, self.g_interval),
                ]
            }
            (Completed, ServerInviteEvent::TimerFired(TransactionTimer::H)) => {
                self.state = Terminated;
                vec![Action::Terminate(Termination::Timeout(TransactionTimer::H))]
            }
            (Confirmed, ServerInviteEvent::TimerFired(TransactionTimer::I)) => {
                self.state = Terminated;
                vec![Action::Terminate(Termination::Completed)]
            }
            (Terminated, _) => Vec::new(),
            (_, ServerInviteEvent::TransportError) => {
                self.state = Terminated;
                vec![Action::Terminate(Termination::TransportError)]
            }
            _ => Vec::new(),
        }
    }
}

impl StateMachine for ServerInviteFsm {
    fn on_timer(&mut self, timer: TransactionTimer) -> Vec<Action> {
        self.on_event(ServerInviteEvent::TimerFired(timer))
    }

    fn on_transport_error(&mut self) -> Vec<Action> {
        self.on_event(ServerInviteEvent::TransportError)
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            ServerInviteState::Proceeding => "Proceeding",
            ServerInviteState::Completed => "Completed",
            ServerInviteState::Confirmed => "Confirmed",
            ServerInviteState::Terminated => "Terminated",
        }
    }
}

/// Events that drive the server non-INVITE transaction (RFC 3261 §17.2.2).
#[derive(Debug, Clone)]
pub enum ServerNonInviteEvent {
    /// A retransmission of the request that created the transaction.
    ReceiveRequest,
    SendProvisional(Bytes),
    SendFinal(Bytes),
    TimerFired(TransactionTimer),
    TransportError,
}

pub struct ServerNonInviteFsm {
    pub state: ServerNonInviteState,
    timers: TransportAwareTimers,
    last_response: Option<Bytes>,
}

impl ServerNonInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ServerNonInviteState::Trying,
            timers,
            last_response: None,
        }
    }

    pub fn on_event(&mut self, event: ServerNonInviteEvent) -> Vec<Action> {
        use ServerNonInviteState::*;
        match (self.state, event) {
            // nothing sent yet: the duplicate is absorbed
            (Trying, ServerNonInviteEvent::ReceiveRequest) => Vec::new(),
            (Proceeding | Completed, ServerNonInviteEvent::ReceiveRequest) => self
                .last_response
                .clone()
                .map(|bytes| vec![Action::Retransmit(bytes)])
                .unwrap_or_default(),
            (Trying | Proceeding, ServerNonInviteEvent::SendProvisional(bytes)) => {
                self.state = Proceeding;
                self.last_response = Some(bytes.clone());
                vec![Action::Transmit(bytes)]
            }
            (Trying | Proceeding, ServerNonInviteEvent::SendFinal(bytes)) => {
                self.state = Completed;
                self.last_response = Some(bytes.clone());
                vec![
                    Action::Transmit(bytes),
                    schedule(TransactionTimer::J, self.timers.duration(TransactionTimer::J)),
                ]
            }
            (Completed, ServerNonInviteEvent::TimerFired(TransactionTimer::J)) => {
                self.state = Terminated;
                vec![Action::Terminate(Termination::Completed)]
            }
            (Terminated, _) => Vec::new(),
            (_, ServerNonInviteEvent::TransportError) => {
                self.state = Terminated;
                vec![Action::Terminate(Termination::TransportError)]
            }
            _ => Vec::new(),
        }
    }
}

impl StateMachine for ServerNonInviteFsm {
    fn on_timer(&mut self, timer: TransactionTimer) -> Vec<Action> {
        self.on_event(ServerNonInviteEvent::TimerFired(timer))
    }

    fn on_transport_error(&mut self) -> Vec<Action> {
        self.on_event(ServerNonInviteEvent::TransportError)
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            ServerNonInviteState::Trying => "Trying",
            ServerNonInviteState::Proceeding => "Proceeding",
            ServerNonInviteState::Completed => "Completed",
            ServerNonInviteState::Terminated => "Terminated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_core::{Method, Request, TransportKind};

    fn response(code: u16) -> Arc<Response> {
        let mut req = Request::new(Method::Invite, "sip:bob@example.com");
        req.headers.push("Via", "SIP/2.0/UDP h;branch=z9hG4bK1");
        req.headers.push("From", "<sip:a@h>;tag=1");
        req.headers.push("To", "<sip:b@h>");
        req.headers.push("Call-ID", "c");
        req.headers.push("CSeq", "1 INVITE");
        Arc::new(req.create_response(code, Some("t")).unwrap())
    }

    fn udp() -> TransportAwareTimers {
        TransportAwareTimers::new(TransportKind::Udp)
    }

    fn tcp() -> TransportAwareTimers {
        TransportAwareTimers::new(TransportKind::Tcp)
    }

    fn scheduled(actions: &[Action], timer: TransactionTimer) -> Option<Duration> {
        actions.iter().find_map(|a| match a {
            Action::Schedule { timer: t, duration } if *t == timer => Some(*duration),
            _ => None,
        })
    }

    #[test]
    fn ict_arms_a_and_b_on_udp_only_b_on_tcp() {
        let mut fsm = ClientInviteFsm::new(udp());
        let actions = fsm.on_event(ClientInviteEvent::SendInvite(Bytes::from_static(b"INVITE")));
        assert_eq!(scheduled(&actions, TransactionTimer::A), Some(Duration::from_millis(500)));
        assert_eq!(scheduled(&actions, TransactionTimer::B), Some(Duration::from_secs(32)));

        let mut fsm = ClientInviteFsm::new(tcp());
        let actions = fsm.on_event(ClientInviteEvent::SendInvite(Bytes::from_static(b"INVITE")));
        assert_eq!(scheduled(&actions, TransactionTimer::A), None);
        assert!(scheduled(&actions, TransactionTimer::B).is_some());
    }

    #[test]
    fn ict_timer_a_doubles_until_t2() {
        let mut fsm = ClientInviteFsm::new(udp());
        fsm.on_event(ClientInviteEvent::SendInvite(Bytes::from_static(b"INVITE")));
        let mut intervals = Vec::new();
        for _ in 0..5 {
            let actions = fsm.on_event(ClientInviteEvent::TimerFired(TransactionTimer::A));
            assert!(actions.iter().any(|a| matches!(a, Action::Retransmit(_))));
            intervals.push(scheduled(&actions, TransactionTimer::A).unwrap().as_millis());
        }
        assert_eq!(intervals, vec![1000, 2000, 4000, 4000, 4000]);
    }

    #[test]
    fn ict_provisional_stops_retransmission() {
        let mut fsm = ClientInviteFsm::new(udp());
        fsm.on_event(ClientInviteEvent::SendInvite(Bytes::from_static(b"INVITE")));
        let actions = fsm.on_event(ClientInviteEvent::ReceiveProvisional(response(180)));
        assert_eq!(fsm.state, ClientInviteState::Proceeding);
        assert!(actions.contains(&Action::Cancel(TransactionTimer::A)));
        assert!(actions.iter().any(|a| matches!(a, Action::Deliver(_))));
        assert!(fsm
            .on_event(ClientInviteEvent::TimerFired(TransactionTimer::A))
            .is_empty());
    }

    #[test]
    fn ict_non_2xx_generates_ack_once_and_absorbs_duplicates() {
        let mut fsm = ClientInviteFsm::new(udp());
        fsm.on_event(ClientInviteEvent::SendInvite(Bytes::from_static(b"INVITE")));
        let actions = fsm.on_event(ClientInviteEvent::ReceiveFinal(response(486)));
        assert_eq!(fsm.state, ClientInviteState::Completed);
        assert!(actions.iter().any(|a| matches!(a, Action::SendAck(_))));
        assert_eq!(scheduled(&actions, TransactionTimer::D), Some(Duration::from_secs(32)));

        let again = fsm.on_event(ClientInviteEvent::ReceiveFinal(response(486)));
        assert_eq!(again, vec![Action::ResendAck]);
    }

    #[test]
    fn ict_2xx_is_delivered_without_ack() {
        let mut fsm = ClientInviteFsm::new(tcp());
        fsm.on_event(ClientInviteEvent::SendInvite(Bytes::from_static(b"INVITE")));
        let actions = fsm.on_event(ClientInviteEvent::ReceiveFinal(response(200)));
        assert!(!actions.iter().any(|a| matches!(a, Action::SendAck(_))));
        assert_eq!(scheduled(&actions, TransactionTimer::D), Some(Duration::ZERO));
    }

    #[test]
    fn ict_timer_b_only_matters_while_calling() {
        let mut fsm = ClientInviteFsm::new(udp());
        fsm.on_event(ClientInviteEvent::SendInvite(Bytes::from_static(b"INVITE")));
        let actions = fsm.on_event(ClientInviteEvent::TimerFired(TransactionTimer::B));
        assert_eq!(
            actions,
            vec![Action::Terminate(Termination::Timeout(TransactionTimer::B))]
        );
        assert_eq!(fsm.state, ClientInviteState::Terminated);
    }

    #[test]
    fn nict_provisional_keeps_timer_f() {
        let mut fsm = ClientNonInviteFsm::new(udp());
        fsm.on_event(ClientNonInviteEvent::SendRequest(Bytes::from_static(b"OPTIONS")));
        let actions = fsm.on_event(ClientNonInviteEvent::ReceiveProvisional(response(100)));
        assert!(actions.contains(&Action::Cancel(TransactionTimer::E)));
        assert!(!actions.contains(&Action::Cancel(TransactionTimer::F)));
        let actions = fsm.on_event(ClientNonInviteEvent::TimerFired(TransactionTimer::F));
        assert_eq!(
            actions,
            vec![Action::Terminate(Termination::Timeout(TransactionTimer::F))]
        );
    }

    #[test]
    fn nict_final_arms_k_and_absorbs_more_responses() {
        let mut fsm = ClientNonInviteFsm::new(udp());
        fsm.on_event(ClientNonInviteEvent::SendRequest(Bytes::from_static(b"OPTIONS")));
        let actions = fsm.on_event(ClientNonInviteEvent::ReceiveFinal(response(200)));
        assert_eq!(scheduled(&actions, TransactionTimer::K), Some(Duration::from_secs(5)));
        assert!(fsm
            .on_event(ClientNonInviteEvent::ReceiveFinal(response(200)))
            .is_empty());
    }

    #[test]
    fn ist_retransmits_last_response_for_duplicates() {
        let mut fsm = ServerInviteFsm::new(udp());
        assert!(fsm.on_event(ServerInviteEvent::ReceiveInvite).is_empty());
        fsm.on_event(ServerInviteEvent::SendProvisional(Bytes::from_static(b"180")));
        assert_eq!(
            fsm.on_event(ServerInviteEvent::ReceiveInvite),
            vec![Action::Retransmit(Bytes::from_static(b"180"))]
        );
        fsm.on_event(ServerInviteEvent::SendFinal(Bytes::from_static(b"486")));
        assert_eq!(
            fsm.on_event(ServerInviteEvent::ReceiveInvite),
            vec![Action::Retransmit(Bytes::from_static(b"486"))]
        );
    }

    #[test]
    fn ist_ack_confirms_and_arms_i() {
        let mut fsm = ServerInviteFsm::new(udp());
        let actions = fsm.on_event(ServerInviteEvent::SendFinal(Bytes::from_static(b"486")));
        assert!(scheduled(&actions, TransactionTimer::G).is_some());
        assert!(scheduled(&actions, TransactionTimer::H).is_some());
        let actions = fsm.on_event(ServerInviteEvent::ReceiveAck);
        assert_eq!(fsm.state, ServerInviteState::Confirmed);
        assert_eq!(scheduled(&actions, TransactionTimer::I), Some(Duration::from_secs(5)));
        assert!(fsm.on_event(ServerInviteEvent::ReceiveAck).is_empty());
    }

    #[test]
    fn ist_timer_h_reports_timeout() {
        let mut fsm = ServerInviteFsm::new(tcp());
        let actions = fsm.on_event(ServerInviteEvent::SendFinal(Bytes::from_static(b"486")));
        assert!(scheduled(&actions, TransactionTimer::G).is_none());
        let actions = fsm.on_event(ServerInviteEvent::TimerFired(TransactionTimer::H));
        assert_eq!(
            actions,
            vec![Action::Terminate(Termination::Timeout(TransactionTimer::H))]
        );
    }

    #[test]
    fn nist_absorbs_duplicates_until_a_response_exists() {
        let mut fsm = ServerNonInviteFsm::new(udp());
        assert!(fsm.on_event(ServerNonInviteEvent::ReceiveRequest).is_empty());
        let actions = fsm.on_event(ServerNonInviteEvent::SendFinal(Bytes::from_static(b"200")));
        assert_eq!(fsm.state, ServerNonInviteState::Completed);
        assert_eq!(scheduled(&actions, TransactionTimer::J), Some(Duration::from_secs(32)));
        assert_eq!(
            fsm.on_event(ServerNonInviteEvent::ReceiveRequest),
            vec![Action::Retransmit(Bytes::from_static(b"200"))]
        );
    }

    #[test]
    fn transport_error_terminates_every_machine() {
        let mut ict = ClientInviteFsm::new(udp());
        assert_eq!(
            ict.on_transport_error(),
            vec![Action::Terminate(Termination::TransportError)]
        );
        let mut nist = ServerNonInviteFsm::new(udp());
        assert_eq!(
            nist.on_transport_error(),
            vec![Action::Terminate(Termination::TransportError)]
        );
        assert_eq!(nist.state_name(), "Terminated");
    }
}
