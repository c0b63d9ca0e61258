// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use smol_str::SmolStr;

use crate::transport::TransportKind;
use crate::via::split_host_port;

/// The parts of a `sip:`/`sips:` URI the stack needs for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub secure: bool,
    pub user: Option<SmolStr>,
    pub host: SmolStr,
    pub port: Option<u16>,
    pub params: Vec<(SmolStr, Option<SmolStr>)>,
}

impl SipUri {
    /// Parses a bare URI or a name-addr (`"Bob" <sip:bob@host>;tag=x`).
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let uri = match (input.find('<'), input.find('>')) {
            (Some(start), Some(end)) if start < end => &input[start + 1..end],
            _ => input,
        };

        let (secure, rest) = if let Some(rest) = strip_scheme(uri, "sips:") {
            (true, rest)
        } else if let Some(rest) = strip_scheme(uri, "sip:") {
            (false, rest)
        } else {
            return None;
        };

        // headers (`?x=y`) are not routing relevant
        let rest = rest.split('?').next().unwrap_or(rest);
        let mut sections = rest.split(';');
        let authority = sections.next()?;
        let (user, hostport) = match authority.rsplit_once('@') {
            Some((user, hostport)) => (Some(SmolStr::new(user)), hostport),
            None => (None, authority),
        };
        let (host, port) = split_host_port(hostport);
        if host.is_empty() {
            return None;
        }

        let params = sections
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((name, value)) => (
                    SmolStr::new(name.to_ascii_lowercase()),
                    Some(SmolStr::new(value)),
                ),
                None => (SmolStr::new(p.to_ascii_lowercase()), None),
            })
            .collect();

        Some(Self {
            secure,
            user,
            host: SmolStr::new(host),
            port,
            params,
        })
    }

    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_deref())
    }

    /// Transport selected by the URI itself, if any (`sips:` or `;transport=`).
    pub fn transport(&self) -> Option<TransportKind> {
        if self.secure {
            return Some(TransportKind::Tls);
        }
        self.param("transport").flatten().and_then(TransportKind::parse)
    }

    pub fn port_or_default(&self, transport: TransportKind) -> u16 {
        self.port.unwrap_or_else(|| transport.default_port())
    }
}

fn strip_scheme<'a>(uri: &'a str, scheme: &str) -> Option<&'a str> {
    match uri.get(..scheme.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(scheme) => Some(&uri[scheme.len()..]),
        _ => None,
    }
}
