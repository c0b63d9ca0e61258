// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use smol_str::SmolStr;

/// SIP request methods known to the stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Info,
    Update,
    Message,
    Prack,
    Refer,
    Subscribe,
    Notify,
    Publish,
    Unknown(SmolStr),
}

const KNOWN: &[(Method, &str)] = &[
    (Method::Invite, "INVITE"),
    (Method::Ack, "ACK"),
    (Method::Bye, "BYE"),
    (Method::Cancel, "CANCEL"),
    (Method::Register, "REGISTER"),
    (Method::Options, "OPTIONS"),
    (Method::Info, "INFO"),
    (Method::Update, "UPDATE"),
    (Method::Message, "MESSAGE"),
    (Method::Prack, "PRACK"),
    (Method::Refer, "REFER"),
    (Method::Subscribe, "SUBSCRIBE"),
    (Method::Notify, "NOTIFY"),
    (Method::Publish, "PUBLISH"),
];

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Unknown(token) => token.as_str(),
            known => KNOWN
                .iter()
                .find(|(method, _)| method == known)
                .map(|(_, name)| *name)
                .unwrap_or(""),
        }
    }

    /// Parses a method token. Extension methods keep their original spelling.
    pub fn from_token(token: &str) -> Self {
        KNOWN
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(token))
            .map(|(method, _)| method.clone())
            .unwrap_or_else(|| Method::Unknown(SmolStr::new(token)))
    }

    pub fn is_invite(&self) -> bool {
        matches!(self, Method::Invite)
    }

    /// ACK never opens a transaction of its own.
    pub fn starts_transaction(&self) -> bool {
        !matches!(self, Method::Ack)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
