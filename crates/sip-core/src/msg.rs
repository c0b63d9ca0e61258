// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};
use smol_str::SmolStr;
use thiserror::Error;

use crate::headers::{header_param, Headers};
use crate::method::Method;
use crate::status::reason_phrase;
use crate::via::ViaHeader;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("invalid SIP status code: {code} (must be 100-699)")]
    InvalidStatusCode { code: u16 },
    #[error("missing mandatory header {0}")]
    MissingHeader(&'static str),
    #[error("malformed {0} header")]
    MalformedHeader(&'static str),
}

/// First line of a SIP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub uri: SmolStr,
}

/// First line of a SIP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u16,
    pub reason: SmolStr,
}

impl StatusLine {
    pub fn new(code: u16) -> Result<Self, MessageError> {
        if !(100..=699).contains(&code) {
            return Err(MessageError::InvalidStatusCode { code });
        }
        Ok(Self {
            code,
            reason: SmolStr::new(reason_phrase(code)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub start: RequestLine,
    pub headers: Headers,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub start: StatusLine,
    pub headers: Headers,
    pub body: Bytes,
}

/// Either half of a SIP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

/// Parsed `CSeq` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub number: u32,
    pub method: Method,
}

impl CSeq {
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split_whitespace();
        let number = parts.next()?.parse().ok()?;
        let method = Method::from_token(parts.next()?);
        Some(Self { number, method })
    }
}

macro_rules! correlation_accessors {
    ($ty:ty) => {
        impl $ty {
            pub fn call_id(&self) -> Option<&str> {
                self.headers.get("Call-ID").map(|v| v.as_str().trim())
            }

            pub fn from_tag(&self) -> Option<&str> {
                self.headers.get("From").and_then(|v| header_param(v, "tag"))
            }

            pub fn to_tag(&self) -> Option<&str> {
                self.headers
                    .get("To")
                    .and_then(|v| header_param(v, "tag"))
                    .filter(|tag| !tag.is_empty())
            }

            pub fn cseq(&self) -> Option<CSeq> {
                self.headers.get("CSeq").and_then(|v| CSeq::parse(v))
            }

            pub fn top_via(&self) -> Option<ViaHeader> {
                self.headers.get("Via").and_then(|v| ViaHeader::parse(v))
            }

            /// Branch parameter of the topmost Via.
            pub fn branch(&self) -> Option<SmolStr> {
                self.top_via()
                    .and_then(|via| via.branch().map(SmolStr::new))
                    .filter(|branch| !branch.is_empty())
            }
        }
    };
}

correlation_accessors!(Request);
correlation_accessors!(Response);

impl Request {
    pub fn new(method: Method, uri: impl Into<SmolStr>) -> Self {
        Self {
            start: RequestLine {
                method,
                uri: uri.into(),
            },
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.start.method
    }

    pub fn uri(&self) -> &str {
        &self.start.uri
    }

    /// Builds a response carrying this request's correlation headers.
    ///
    /// `to_tag` is appended to `To` when the request had none and the
    /// response is not `100 Trying`.
    pub fn create_response(&self, code: u16, to_tag: Option<&str>) -> Result<Response, MessageError> {
        let start = StatusLine::new(code)?;
        let mut headers = Headers::new();
        headers.copy_from(&self.headers, "Via");
        headers.copy_from(&self.headers, "From");

        let to = self.headers.get("To").ok_or(MessageError::MissingHeader("To"))?;
        match to_tag {
            Some(tag) if code > 100 && header_param(to, "tag").is_none() => {
                headers.push("To", format!("{};tag={}", to, tag));
            }
            _ => headers.push("To", to.clone()),
        }

        let call_id = self
            .headers
            .get("Call-ID")
            .ok_or(MessageError::MissingHeader("Call-ID"))?;
        headers.push("Call-ID", call_id.clone());
        let cseq = self.headers.get("CSeq").ok_or(MessageError::MissingHeader("CSeq"))?;
        headers.push("CSeq", cseq.clone());

        Ok(Response {
            start,
            headers,
            body: Bytes::new(),
        })
    }

    /// ACK for a non-2xx final response (RFC 3261 §17.1.1.3).
    pub fn create_ack(&self, response: &Response) -> Result<Request, MessageError> {
        let cseq = self.cseq().ok_or(MessageError::MalformedHeader("CSeq"))?;
        let mut ack = Request::new(Method::Ack, self.start.uri.clone());

        let via = self.headers.get("Via").ok_or(MessageError::MissingHeader("Via"))?;
        ack.headers.push("Via", via.clone());
        ack.headers.copy_from(&self.headers, "Route");
        ack.headers.push("Max-Forwards", "70");
        let from = self.headers.get("From").ok_or(MessageError::MissingHeader("From"))?;
        ack.headers.push("From", from.clone());
        let to = response
            .headers
            .get("To")
            .or_else(|| self.headers.get("To"))
            .ok_or(MessageError::MissingHeader("To"))?;
        ack.headers.push("To", to.clone());
        let call_id = self
            .headers
            .get("Call-ID")
            .ok_or(MessageError::MissingHeader("Call-ID"))?;
        ack.headers.push("Call-ID", call_id.clone());
        ack.headers.push("CSeq", format!("{} ACK", cseq.number));
        Ok(ack)
    }
}

impl Response {
    pub fn code(&self) -> u16 {
        self.start.code
    }

    pub fn is_provisional(&self) -> bool {
        self.start.code < 200
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.start.code)
    }

    /// Method of the request this answers, taken from `CSeq`.
    pub fn method(&self) -> Option<Method> {
        self.cseq().map(|cseq| cseq.method)
    }
}

impl SipMessage {
    pub fn is_request(&self) -> bool {
        matches!(self, SipMessage::Request(_))
    }

    pub fn headers(&self) -> &Headers {
        match self {
            SipMessage::Request(req) => &req.headers,
            SipMessage::Response(resp) => &resp.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            SipMessage::Request(req) => &mut req.headers,
            SipMessage::Response(resp) => &mut resp.headers,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            SipMessage::Request(req) => req.call_id(),
            SipMessage::Response(resp) => resp.call_id(),
        }
    }

    /// Request method, or the CSeq method for responses.
    pub fn method(&self) -> Option<Method> {
        match self {
            SipMessage::Request(req) => Some(req.start.method.clone()),
            SipMessage::Response(resp) => resp.method(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            SipMessage::Request(req) => req.to_bytes(),
            SipMessage::Response(resp) => resp.to_bytes(),
        }
    }
}

impl From<Request> for SipMessage {
    fn from(req: Request) -> Self {
        SipMessage::Request(req)
    }
}

impl From<Response> for SipMessage {
    fn from(resp: Response) -> Self {
        SipMessage::Response(resp)
    }
}

impl Request {
    /// Serializes the request; `Content-Length` always reflects the body.
    pub fn to_bytes(&self) -> Bytes {
        let mut start = String::with_capacity(64);
        let _ = write!(start, "{} {} SIP/2.0", self.start.method, self.start.uri);
        encode(&start, &self.headers, &self.body)
    }
}

impl Response {
    pub fn to_bytes(&self) -> Bytes {
        let mut start = String::with_capacity(32);
        let _ = write!(start, "SIP/2.0 {} {}", self.start.code, self.start.reason);
        encode(&start, &self.headers, &self.body)
    }
}

fn encode(start: &str, headers: &Headers, body: &Bytes) -> Bytes {
    let mut out = BytesMut::with_capacity(start.len() + headers.len() * 48 + body.len() + 32);
    out.put_slice(start.as_bytes());
    out.put_slice(b"\r\n");
    for header in headers
        .iter()
        .filter(|h| !h.name.eq_ignore_ascii_case("Content-Length"))
    {
        out.put_slice(header.name.as_bytes());
        out.put_slice(b": ");
        out.put_slice(header.value.as_bytes());
        out.put_slice(b"\r\n");
    }
    out.put_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.put_slice(body);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> Request {
        let mut req = Request::new(Method::Invite, "sip:bob@example.com");
        req.headers.push("Via", "SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKinv1");
        req.headers.push("Via", "SIP/2.0/UDP 10.0.0.9:5060;branch=z9hG4bKproxy");
        req.headers.push("Route", "<sip:proxy.example.com;lr>");
        req.headers.push("From", "<sip:alice@example.com>;tag=a1");
        req.headers.push("To", "<sip:bob@example.com>");
        req.headers.push("Call-ID", "call-1@10.0.0.1");
        req.headers.push("CSeq", "7 INVITE");
        req
    }

    #[test]
    fn accessors_read_correlation_fields() {
        let req = invite();
        assert_eq!(req.call_id(), Some("call-1@10.0.0.1"));
        assert_eq!(req.from_tag(), Some("a1"));
        assert_eq!(req.to_tag(), None);
        assert_eq!(req.branch().as_deref(), Some("z9hG4bKinv1"));
        assert_eq!(
            req.cseq(),
            Some(CSeq {
                number: 7,
                method: Method::Invite
            })
        );
    }

    #[test]
    fn response_copies_all_vias_and_adds_tag() {
        let resp = invite().create_response(487, Some("b2")).unwrap();
        assert_eq!(resp.code(), 487);
        assert_eq!(resp.start.reason, "Request Terminated");
        assert_eq!(resp.headers.get_all("Via").count(), 2);
        assert_eq!(resp.to_tag(), Some("b2"));
        assert_eq!(resp.method(), Some(Method::Invite));
        assert_eq!(resp.branch().as_deref(), Some("z9hG4bKinv1"));
    }

    #[test]
    fn trying_never_carries_a_tag() {
        let resp = invite().create_response(100, Some("b2")).unwrap();
        assert_eq!(resp.to_tag(), None);
    }

    #[test]
    fn existing_to_tag_is_kept() {
        let mut req = invite();
        req.headers.set("To", "<sip:bob@example.com>;tag=orig");
        let resp = req.create_response(200, Some("other")).unwrap();
        assert_eq!(resp.to_tag(), Some("orig"));
    }

    #[test]
    fn rejects_out_of_range_status() {
        assert_eq!(
            invite().create_response(99, None),
            Err(MessageError::InvalidStatusCode { code: 99 })
        );
    }

    #[test]
    fn ack_follows_non_2xx_rules() {
        let req = invite();
        let resp = req.create_response(486, Some("b2")).unwrap();
        let ack = req.create_ack(&resp).unwrap();
        assert_eq!(ack.method(), &Method::Ack);
        assert_eq!(ack.uri(), "sip:bob@example.com");
        assert_eq!(ack.headers.get_all("Via").count(), 1);
        assert_eq!(ack.branch(), req.branch());
        assert_eq!(ack.to_tag(), Some("b2"));
        assert_eq!(ack.headers.get("CSeq").unwrap(), "7 ACK");
        assert_eq!(ack.headers.get("Route").unwrap(), "<sip:proxy.example.com;lr>");
    }

    #[test]
    fn serialization_rewrites_content_length() {
        let mut req = invite();
        req.headers.push("Content-Length", "999");
        req.body = Bytes::from_static(b"v=0\r\n");
        let text = String::from_utf8(req.to_bytes().to_vec()).unwrap();
        assert!(text.starts_with("INVITE sip:bob@example.com SIP/2.0\r\n"));
        assert!(text.contains("Content-Length: 5\r\n\r\nv=0\r\n"));
        assert!(!text.contains("999"));
    }
}
