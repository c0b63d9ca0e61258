// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Splits a TCP/TLS byte stream into whole SIP messages.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("message of {size} bytes exceeds limit of {max}")]
    Oversized { size: usize, max: usize },
    #[error("invalid Content-Length header")]
    InvalidContentLength,
}

/// Removes every complete message from `buf`, leaving any partial tail.
///
/// A message ends `Content-Length` bytes after the blank line closing its
/// headers; a missing header means no body. CRLF keep-alives between
/// messages are discarded. Fails once a message, or an unterminated header
/// block, grows past `max_size`; the connection is unusable after that.
pub fn drain_sip_frames(buf: &mut BytesMut, max_size: usize) -> Result<Vec<Bytes>, FrameError> {
    let mut frames = Vec::new();
    loop {
        let keepalive = buf.iter().take_while(|b| **b == b'\r' || **b == b'\n').count();
        buf.advance(keepalive);

        let Some(head_end) = memchr::memmem::find(buf.as_ref(), b"\r\n\r\n") else {
            if buf.len() > max_size {
                return Err(FrameError::Oversized {
                    size: buf.len(),
                    max: max_size,
                });
            }
            break;
        };

        let content_length = parse_content_length(&buf[..head_end])?.unwrap_or(0);
        let needed = head_end + 4 + content_length;
        if needed > max_size {
            return Err(FrameError::Oversized {
                size: needed,
                max: max_size,
            });
        }
        if buf.len() < needed {
            break;
        }
        frames.push(buf.split_to(needed).freeze());
    }
    Ok(frames)
}

/// Content-Length (or compact `l`) from a header block.
pub fn parse_content_length(headers: &[u8]) -> Result<Option<usize>, FrameError> {
    let text = std::str::from_utf8(headers).map_err(|_| FrameError::InvalidContentLength)?;
    for line in text.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("l") {
                return value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| FrameError::InvalidContentLength);
            }
        }
    }
    Ok(None)
}
