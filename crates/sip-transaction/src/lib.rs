// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 3261 §17 transaction layer.
//!
//! Four independent lists ([`IctList`], [`NictList`], [`IstList`],
//! [`NistList`]) each own a mutex-protected table of transactions. The state
//! machines in [`fsm`] are sans-IO: they turn events into actions, the list
//! applies those actions to the entry while holding its mutex, and hands back
//! [`TransactionEffect`]s for the caller to perform once the mutex is
//! released. Timers are typed deadlines checked by `tick(now)`; nothing in
//! this crate reads the clock or arms OS timers.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use sip_core::{MessageError, Method, Request, Response, TransportKind};
use smol_str::SmolStr;
use thiserror::Error;

pub mod fsm;
pub mod ict;
pub mod ist;
pub mod metrics;
pub mod nict;
pub mod nist;
mod table;
pub mod timers;

pub use ict::IctList;
pub use ist::IstList;
pub use metrics::{ListStats, TransactionMetrics, TransactionMetricsSnapshot, TransactionOutcome};
pub use nict::NictList;
pub use nist::NistList;
pub use table::EntryReport;
pub use timers::{TimerDefaults, TransportAwareTimers};

/// Timers referenced by the SIP transaction state machines (RFC 3261 §17).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransactionTimer {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    T1,
    T2,
    T4,
}

/// Client INVITE transaction states (RFC 3261 Figure 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientInviteState {
    Calling,
    Proceeding,
    Completed,
    Terminated,
}

/// Server INVITE transaction states (RFC 3261 Figure 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerInviteState {
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

/// Client non-INVITE transaction states (RFC 3261 Figure 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientNonInviteState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// Server non-INVITE transaction states (RFC 3261 Figure 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerNonInviteState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// Which of the four lists an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Ict,
    Nict,
    Ist,
    Nist,
}

impl ListKind {
    pub const ALL: [ListKind; 4] = [ListKind::Ict, ListKind::Nict, ListKind::Ist, ListKind::Nist];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Ict => "ICT",
            ListKind::Nict => "NICT",
            ListKind::Ist => "IST",
            ListKind::Nist => "NIST",
        }
    }

    /// The list a key belongs to.
    pub fn for_key(key: &TransactionKey) -> Self {
        match (key.is_server, key.method.is_invite()) {
            (false, true) => ListKind::Ict,
            (false, false) => ListKind::Nict,
            (true, true) => ListKind::Ist,
            (true, false) => ListKind::Nist,
        }
    }
}

/// Unique key identifying a transaction (branch + method + direction).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: SmolStr,
    pub method: Method,
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<SmolStr>, method: Method, is_server: bool) -> Self {
        Self {
            branch: branch.into(),
            method,
            is_server,
        }
    }

    /// Key of the transaction a request belongs to. An ACK belongs to the
    /// INVITE transaction it acknowledges.
    pub fn from_request(req: &Request, is_server: bool) -> Option<Self> {
        let branch = req.branch()?;
        let method = match req.method() {
            Method::Ack => Method::Invite,
            other => other.clone(),
        };
        Some(Self::new(branch, method, is_server))
    }

    /// Key of the transaction a response belongs to, from its top Via and CSeq.
    pub fn from_response(resp: &Response, is_server: bool) -> Option<Self> {
        let branch = resp.branch()?;
        let method = resp.method()?;
        Some(Self::new(branch, method, is_server))
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_server { "server" } else { "client" };
        write!(f, "{}/{}/{}", self.branch, self.method, side)
    }
}

/// Where a transaction's messages travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportContext {
    pub transport: TransportKind,
    pub peer: SocketAddr,
}

impl TransportContext {
    pub fn new(transport: TransportKind, peer: SocketAddr) -> Self {
        Self { transport, peer }
    }
}

/// Why a transaction reached Terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Termination {
    /// Normal end after the final wait timer.
    Completed,
    /// Timer B, C, F or H expired.
    Timeout(TransactionTimer),
    /// The transport reported the peer unreachable.
    TransportError,
}

/// Work a list hands back to its caller after releasing its mutex.
#[derive(Debug, Clone)]
pub enum TransactionEffect {
    Transmit {
        key: TransactionKey,
        ctx: TransportContext,
        payload: Bytes,
    },
    DeliverRequest {
        key: TransactionKey,
        ctx: TransportContext,
        request: Arc<Request>,
    },
    DeliverResponse {
        key: TransactionKey,
        response: Arc<Response>,
    },
    Terminated {
        key: TransactionKey,
        request: Arc<Request>,
        reason: Termination,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("message has no Via branch")]
    MissingBranch,
    #[error("message has no usable CSeq")]
    MissingCSeq,
    #[error("{0} is not handled by this transaction list")]
    WrongMethod(Method),
    #[error("transaction {0} already exists")]
    Duplicate(TransactionKey),
    #[error("no transaction matches {0}")]
    NoMatch(TransactionKey),
    #[error("{list} transaction list is full ({limit} entries)")]
    Capacity { list: &'static str, limit: usize },
    #[error("transaction {key} cannot send a response in state {state}")]
    InvalidState { key: TransactionKey, state: &'static str },
    #[error(transparent)]
    Message(#[from] MessageError),
}
