// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Minimal SIP message parser.
//!
//! Understands the start line, header folding, compact header names,
//! comma-joined Via values and a `Content-Length` delimited body. It does not
//! validate the full RFC 3261 grammar.

use bytes::Bytes;
use smol_str::SmolStr;
use thiserror::Error;

use crate::headers::Headers;
use crate::method::Method;
use crate::msg::{Request, RequestLine, Response, SipMessage, StatusLine};

/// Largest message accepted by default (matches common UDP MTU planning).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("message of {actual} bytes exceeds limit of {max}")]
    TooLarge { max: usize, actual: usize },
    #[error("message has no end of headers")]
    Incomplete,
    #[error("message headers are not valid UTF-8")]
    Encoding,
    #[error("invalid start line: {0}")]
    InvalidStartLine(String),
    #[error("invalid header line: {0}")]
    InvalidHeader(String),
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("body is {actual} bytes but Content-Length says {expected}")]
    TruncatedBody { expected: usize, actual: usize },
}

pub fn parse_message(data: &[u8]) -> Result<SipMessage, ParseError> {
    parse_message_with_limit(data, DEFAULT_MAX_MESSAGE_SIZE)
}

pub fn parse_message_with_limit(data: &[u8], max: usize) -> Result<SipMessage, ParseError> {
    if data.len() > max {
        return Err(ParseError::TooLarge {
            max,
            actual: data.len(),
        });
    }

    // keep-alive CRLFs may precede a message on streams
    let start = data
        .iter()
        .position(|b| *b != b'\r' && *b != b'\n')
        .ok_or(ParseError::Incomplete)?;
    let data = &data[start..];

    let (head_end, sep_len) = match memchr::memmem::find(data, b"\r\n\r\n") {
        Some(pos) => (pos, 4),
        None => match memchr::memmem::find(data, b"\n\n") {
            Some(pos) => (pos, 2),
            None => return Err(ParseError::Incomplete),
        },
    };
    let head = std::str::from_utf8(&data[..head_end]).map_err(|_| ParseError::Encoding)?;
    let rest = &data[head_end + sep_len..];

    let mut lines = unfold(head).into_iter();
    let first = lines
        .next()
        .ok_or_else(|| ParseError::InvalidStartLine(String::new()))?;

    let mut headers = Headers::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidHeader(line.clone()))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ParseError::InvalidHeader(line.clone()));
        }
        let value = value.trim();
        if is_via(name) {
            for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                headers.push(name, part);
            }
        } else {
            headers.push(name, value);
        }
    }

    let body = match headers.get("Content-Length") {
        Some(len) => {
            let expected: usize = len
                .trim()
                .parse()
                .map_err(|_| ParseError::InvalidContentLength)?;
            if rest.len() < expected {
                return Err(ParseError::TruncatedBody {
                    expected,
                    actual: rest.len(),
                });
            }
            Bytes::copy_from_slice(&rest[..expected])
        }
        None => Bytes::copy_from_slice(rest),
    };

    if let Some(status) = first.strip_prefix("SIP/2.0 ") {
        let (code, reason) = status.trim().split_once(' ').unwrap_or((status.trim(), ""));
        let code: u16 = code
            .parse()
            .map_err(|_| ParseError::InvalidStartLine(first.clone()))?;
        if !(100..=699).contains(&code) {
            return Err(ParseError::InvalidStartLine(first.clone()));
        }
        return Ok(SipMessage::Response(Response {
            start: StatusLine {
                code,
                reason: SmolStr::new(reason.trim()),
            },
            headers,
            body,
        }));
    }

    let mut parts = first.split_whitespace();
    let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(u), Some(v), None) => (m, u, v),
        _ => return Err(ParseError::InvalidStartLine(first.clone())),
    };
    if !version.eq_ignore_ascii_case("SIP/2.0") {
        return Err(ParseError::InvalidStartLine(first.clone()));
    }
    Ok(SipMessage::Request(Request {
        start: RequestLine {
            method: Method::from_token(method),
            uri: SmolStr::new(uri),
        },
        headers,
        body,
    }))
}

fn is_via(name: &str) -> bool {
    name.eq_ignore_ascii_case("via") || name.eq_ignore_ascii_case("v")
}

/// Splits header text into logical lines, joining folded continuations.
fn unfold(head: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in head.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if raw.starts_with([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(raw.trim());
                continue;
            }
        }
        if !raw.is_empty() {
            lines.push(raw.to_string());
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVITE: &[u8] = b"INVITE sip:bob@example.com SIP/2.0\r\n\
v: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK74bf9, SIP/2.0/UDP 10.0.0.2;branch=z9hG4bKold\r\n\
From: <sip:alice@example.com>;tag=9fxced76sl\r\n\
To: <sip:bob@example.com>\r\n\
i: 3848276298220188511@10.0.0.1\r\n\
CSeq: 1 INVITE\r\n\
Subject: folded\r\n value\r\n\
l: 4\r\n\
\r\n\
v=0\r\n";

    #[test]
    fn parses_request_with_compact_headers() {
        let msg = parse_message(INVITE).unwrap();
        let SipMessage::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.method(), &Method::Invite);
        assert_eq!(req.headers.get_all("Via").count(), 2);
        assert_eq!(req.branch().as_deref(), Some("z9hG4bK74bf9"));
        assert_eq!(req.call_id(), Some("3848276298220188511@10.0.0.1"));
        assert_eq!(req.headers.get("Subject").unwrap(), "folded value");
        assert_eq!(req.body.as_ref(), b"v=0\r");
    }

    #[test]
    fn parses_response() {
        let data = b"SIP/2.0 180 Ringing\r\nVia: SIP/2.0/UDP h;branch=z9hG4bK1\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n";
        let SipMessage::Response(resp) = parse_message(data).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(resp.code(), 180);
        assert_eq!(resp.start.reason, "Ringing");
        assert_eq!(resp.method(), Some(Method::Invite));
    }

    #[test]
    fn serialized_message_parses_back() {
        let msg = parse_message(INVITE).unwrap();
        let again = parse_message(&msg.to_bytes()).unwrap();
        assert_eq!(msg, again);
    }

    #[test]
    fn rejects_truncated_body() {
        let data = b"OPTIONS sip:a SIP/2.0\r\nContent-Length: 10\r\n\r\nshort";
        assert_eq!(
            parse_message(data),
            Err(ParseError::TruncatedBody {
                expected: 10,
                actual: 5
            })
        );
    }

    #[test]
    fn rejects_bad_start_lines() {
        assert!(matches!(
            parse_message(b"HELLO\r\n\r\n"),
            Err(ParseError::InvalidStartLine(_))
        ));
        assert!(matches!(
            parse_message(b"SIP/2.0 99 Nope\r\n\r\n"),
            Err(ParseError::InvalidStartLine(_))
        ));
        assert_eq!(parse_message(b"\r\n\r\n"), Err(ParseError::Incomplete));
    }

    #[test]
    fn enforces_size_limit() {
        assert_eq!(
            parse_message_with_limit(INVITE, 16),
            Err(ParseError::TooLarge {
                max: 16,
                actual: INVITE.len()
            })
        );
    }
}
