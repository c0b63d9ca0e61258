// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Status codes the stack generates on its own, and their reason phrases.

pub const TRYING: u16 = 100;
pub const RINGING: u16 = 180;
pub const OK: u16 = 200;
pub const REQUEST_TIMEOUT: u16 = 408;
pub const CALL_DOES_NOT_EXIST: u16 = 481;
pub const REQUEST_TERMINATED: u16 = 487;
pub const SERVER_INTERNAL_ERROR: u16 = 500;
pub const SERVICE_UNAVAILABLE: u16 = 503;

/// Default reason phrase for a status code (RFC 3261 §21).
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        181 => "Call Is Being Forwarded",
        182 => "Queued",
        183 => "Session Progress",
        200 => "OK",
        202 => "Accepted",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        500 => "Server Internal Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        504 => "Server Time-out",
        600 => "Busy Everywhere",
        603 => "Decline",
        _ => match code / 100 {
            1 => "Provisional",
            2 => "Success",
            3 => "Redirection",
            4 => "Client Error",
            5 => "Server Error",
            _ => "Global Failure",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_class_fallback() {
        assert_eq!(reason_phrase(REQUEST_TERMINATED), "Request Terminated");
        assert_eq!(reason_phrase(299), "Success");
        assert_eq!(reason_phrase(699), "Global Failure");
    }
}
