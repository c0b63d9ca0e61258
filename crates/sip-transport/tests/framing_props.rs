// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::BytesMut;
use proptest::prelude::*;
use sip_transport::drain_sip_frames;

fn message(body: &str, compact: bool) -> Vec<u8> {
    let header = if compact { "l" } else { "Content-Length" };
    format!(
        "MESSAGE sip:bob@example.com SIP/2.0\r\nCall-ID: x\r\n{}: {}\r\n\r\n{}",
        header,
        body.len(),
        body
    )
    .into_bytes()
}

proptest! {
    /// However the stream is chunked, the same messages come out in order.
    #[test]
    fn chunking_does_not_change_frames(
        bodies in prop::collection::vec(("[a-z\r\n]{0,40}", any::<bool>()), 1..6),
        chunk in 1usize..64,
        keepalive in any::<bool>(),
    ) {
        let messages: Vec<Vec<u8>> = bodies.iter().map(|(b, c)| message(b, *c)).collect();
        let mut stream = Vec::new();
        for m in &messages {
            if keepalive {
                stream.extend_from_slice(b"\r\n\r\n");
            }
            stream.extend_from_slice(m);
        }

        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for piece in stream.chunks(chunk) {
            buf.extend_from_slice(piece);
            frames.extend(drain_sip_frames(&mut buf, 64 * 1024).unwrap());
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(frames.len(), messages.len());
        for (frame, expected) in frames.iter().zip(&messages) {
            prop_assert_eq!(frame.as_ref(), expected.as_slice());
        }
    }
}
