// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use proptest::prelude::*;
use sip_core::{SipUri, TransportKind, ViaHeader};

proptest! {
    /// Parsed URIs expose the routing parts they were built from.
    #[test]
    fn uri_parts_survive_parsing(
        secure in prop::bool::ANY,
        user in proptest::option::of("[a-z0-9]{1,8}"),
        host in "[a-z0-9][a-z0-9\\-]{0,10}",
        port in proptest::option::of(1024u16..65535),
    ) {
        let scheme = if secure { "sips" } else { "sip" };
        let user_part = user.as_ref().map(|u| format!("{}@", u)).unwrap_or_default();
        let port_part = port.map(|p| format!(":{}", p)).unwrap_or_default();
        let text = format!("{}:{}{}{}", scheme, user_part, host, port_part);

        let uri = SipUri::parse(&text);
        prop_assert!(uri.is_some(), "failed to parse {}", text);
        let uri = uri.unwrap();
        prop_assert_eq!(uri.secure, secure);
        prop_assert_eq!(uri.user.as_deref(), user.as_deref());
        prop_assert_eq!(uri.host.as_str(), host.as_str());
        prop_assert_eq!(uri.port, port);
    }

    /// The transport parameter selects the transport unless the scheme is sips.
    #[test]
    fn transport_param_selects_transport(
        host in "[a-z]{2,8}",
        transport in prop::sample::select(vec!["udp", "tcp", "tls"]),
        lr in prop::bool::ANY,
    ) {
        let lr_part = if lr { ";lr" } else { "" };
        let uri = SipUri::parse(&format!("<sip:{};transport={}{}>", host, transport, lr_part)).unwrap();
        prop_assert_eq!(uri.transport(), TransportKind::parse(transport));
        prop_assert_eq!(uri.param("lr").is_some(), lr);
    }

    /// Via rendering parses back to the same routing data.
    #[test]
    fn via_display_parses_back(
        octets in prop::array::uniform4(1u8..255),
        port in 1024u16..65535,
        suffix in "[a-zA-Z0-9]{8,16}",
    ) {
        let host = format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]);
        let branch = format!("z9hG4bK{}", suffix);
        let via = ViaHeader::new(TransportKind::Udp, &host, port, &branch);
        let parsed = ViaHeader::parse(&via.to_string()).unwrap();
        prop_assert_eq!(parsed.host(), host.as_str());
        prop_assert_eq!(parsed.port(), Some(port));
        prop_assert_eq!(parsed.branch(), Some(branch.as_str()));
        prop_assert_eq!(parsed.response_target(), (host.clone(), port));
    }
}
