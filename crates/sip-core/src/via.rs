// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

use crate::transport::TransportKind;

/// Parsed representation of a Via header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaHeader {
    pub transport: SmolStr,
    pub sent_by: SmolStr,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl ViaHeader {
    /// Builds a Via for a request sent from `host:port` with a fresh branch.
    pub fn new(transport: TransportKind, host: &str, port: u16, branch: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert(SmolStr::new("branch"), Some(SmolStr::new(branch)));
        params.insert(SmolStr::new("rport"), None);
        Self {
            transport: SmolStr::new(transport.via_transport()),
            sent_by: SmolStr::new(format!("{}:{}", host, port)),
            params,
        }
    }

    /// Parses `SIP/2.0/UDP host:port;param=value`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split(';');
        let head = parts.next()?.trim();
        let (protocol, sent_by) = head.split_once(char::is_whitespace)?;
        let transport = protocol.trim().rsplit('/').next()?.trim();
        if transport.is_empty() || !protocol.to_ascii_uppercase().starts_with("SIP/2.0/") {
            return None;
        }
        let sent_by = sent_by.trim();
        if sent_by.is_empty() {
            return None;
        }

        let mut params = BTreeMap::new();
        for param in parts {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            match param.split_once('=') {
                Some((name, value)) => params.insert(
                    SmolStr::new(name.trim().to_ascii_lowercase()),
                    Some(SmolStr::new(value.trim())),
                ),
                None => params.insert(SmolStr::new(param.to_ascii_lowercase()), None),
            };
        }

        Some(Self {
            transport: SmolStr::new(transport.to_ascii_uppercase()),
            sent_by: SmolStr::new(sent_by),
            params,
        })
    }

    pub fn transport(&self) -> &str {
        self.transport.as_str()
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        TransportKind::parse(&self.transport)
    }

    /// Looks up the provided parameter ignoring ASCII case.
    pub fn param(&self, name: &str) -> Option<&Option<SmolStr>> {
        self.params.get(&SmolStr::new(name.to_ascii_lowercase()))
    }

    pub fn branch(&self) -> Option<&str> {
        self.param("branch").and_then(|v| v.as_deref())
    }

    pub fn set_param(&mut self, name: &str, value: Option<&str>) {
        self.params
            .insert(SmolStr::new(name.to_ascii_lowercase()), value.map(SmolStr::new));
    }

    /// Host portion of sent-by, without IPv6 brackets.
    pub fn host(&self) -> &str {
        split_host_port(&self.sent_by).0
    }

    pub fn port(&self) -> Option<u16> {
        split_host_port(&self.sent_by).1
    }

    /// Where responses go (RFC 3261 §18.2.2, RFC 3581): `received` and
    /// `rport` win over sent-by.
    pub fn response_target(&self) -> (String, u16) {
        let host = match self.param("received") {
            Some(Some(received)) => received.to_string(),
            _ => self.host().to_string(),
        };
        let default_port = self
            .transport_kind()
            .map(|kind| kind.default_port())
            .unwrap_or(5060);
        let port = match self.param("rport") {
            Some(Some(rport)) => rport.parse().ok(),
            _ => None,
        }
        .or_else(|| self.port())
        .unwrap_or(default_port);
        (host, port)
    }
}

impl fmt::Display for ViaHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by)?;
        // branch first keeps the header readable for humans tailing logs
        if let Some(Some(branch)) = self.params.get("branch") {
            write!(f, ";branch={}", branch)?;
        }
        for (name, value) in self.params.iter().filter(|(name, _)| *name != "branch") {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

/// Splits `host[:port]`, understanding bracketed IPv6 literals.
pub(crate) fn split_host_port(input: &str) -> (&str, Option<u16>) {
    let input = input.trim();
    if let Some(rest) = input.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let host = &rest[..end];
            let port = rest[end + 1..].strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match input.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => (host, port.parse().ok()),
        _ => (input, None),
    }
}
