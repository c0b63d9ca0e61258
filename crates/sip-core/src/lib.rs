// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP message model consumed by the stack.
//!
//! - **Messages**: [`Request`], [`Response`], [`SipMessage`] with the
//!   correlation accessors transactions key on (Call-ID, tags, branch, CSeq)
//! - **Factories**: [`Request::create_response`] and [`Request::create_ack`]
//! - **Wire format**: [`parse_message`] and `to_bytes()`
//! - **Routing helpers**: [`ViaHeader`], [`SipUri`], [`TransportKind`]
//!
//! # Examples
//!
//! ```
//! use sip_core::{parse_message, SipMessage};
//!
//! let raw = b"OPTIONS sip:bob@example.com SIP/2.0\r\n\
//! Via: SIP/2.0/UDP 10.0.0.1;branch=z9hG4bK1\r\n\
//! From: <sip:alice@example.com>;tag=1\r\n\
//! To: <sip:bob@example.com>\r\n\
//! Call-ID: abc\r\n\
//! CSeq: 1 OPTIONS\r\n\
//! Content-Length: 0\r\n\r\n";
//! let SipMessage::Request(req) = parse_message(raw).unwrap() else { unreachable!() };
//! let ok = req.create_response(200, Some("xyz")).unwrap();
//! assert_eq!(ok.to_tag(), Some("xyz"));
//! ```

pub mod headers;
pub mod ids;
pub mod method;
pub mod msg;
pub mod parse;
pub mod status;
pub mod transport;
pub mod uri;
pub mod via;

pub use headers::{header_param, Header, Headers};
pub use ids::{generate_branch_id, generate_call_id, generate_tag, BRANCH_MAGIC_COOKIE};
pub use method::Method;
pub use msg::{CSeq, MessageError, Request, RequestLine, Response, SipMessage, StatusLine};
pub use parse::{parse_message, parse_message_with_limit, ParseError, DEFAULT_MAX_MESSAGE_SIZE};
pub use transport::TransportKind;
pub use uri::SipUri;
pub use via::ViaHeader;
