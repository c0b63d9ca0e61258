// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transport-aware timer durations (RFC 3261 §17, Table 4).
//!
//! On reliable transports (TCP/TLS) the retransmission timers A/E/G are
//! zero, meaning "never retransmit", and the absorption timers D/I/J/K are
//! zero, meaning "terminate on the next tick". The timeout timers B/F/H stay
//! at 64*T1 everywhere.
//!
//! ```rust
//! use sip_core::TransportKind;
//! use sip_transaction::timers::TransportAwareTimers;
//! use sip_transaction::TransactionTimer;
//! use std::time::Duration;
//!
//! let tcp = TransportAwareTimers::new(TransportKind::Tcp);
//! assert_eq!(tcp.duration(TransactionTimer::K), Duration::ZERO);
//! assert_eq!(tcp.duration(TransactionTimer::F), Duration::from_secs(32));
//! assert!(!tcp.should_retransmit());
//! ```

use std::time::Duration;

use sip_core::TransportKind;

use crate::TransactionTimer;

/// Base timer values. T1 should not go below 500ms on the public Internet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerDefaults {
    /// RTT estimate.
    pub t1: Duration,
    /// Retransmission interval cap.
    pub t2: Duration,
    /// Time the network needs to clear messages.
    pub t4: Duration,
    /// Bound on an INVITE client transaction sitting in Proceeding.
    pub timer_c: Duration,
    /// Duplicate-response absorption after an INVITE final response.
    pub timer_d: Duration,
}

impl Default for TimerDefaults {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            timer_c: Duration::from_secs(180),
            timer_d: Duration::from_secs(32),
        }
    }
}

/// Timer durations for one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportAwareTimers {
    transport: TransportKind,
    defaults: TimerDefaults,
}

impl TransportAwareTimers {
    pub fn new(transport: TransportKind) -> Self {
        Self::with_defaults(transport, TimerDefaults::default())
    }

    pub fn with_defaults(transport: TransportKind, defaults: TimerDefaults) -> Self {
        Self {
            transport,
            defaults,
        }
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn defaults(&self) -> &TimerDefaults {
        &self.defaults
    }

    /// Retransmission only happens over unreliable transports.
    pub fn should_retransmit(&self) -> bool {
        !self.transport.is_reliable()
    }

    /// Doubles a retransmission interval, capped at T2.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.defaults.t2)
    }

    pub fn duration(&self, timer: TransactionTimer) -> Duration {
        let reliable = self.transport.is_reliable();
        let unless_reliable = |value: Duration| if reliable { Duration::ZERO } else { value };
        let d = &self.defaults;
        match timer {
            TransactionTimer::T1 => d.t1,
            TransactionTimer::T2 => d.t2,
            TransactionTimer::T4 => d.t4,
            TransactionTimer::A | TransactionTimer::E | TransactionTimer::G => unless_reliable(d.t1),
            TransactionTimer::B | TransactionTimer::F | TransactionTimer::H => d.t1.saturating_mul(64),
            TransactionTimer::C => d.timer_c,
            TransactionTimer::D => unless_reliable(d.timer_d),
            TransactionTimer::I | TransactionTimer::K => unless_reliable(d.t4),
            TransactionTimer::J => unless_reliable(d.t1.saturating_mul(64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_uses_table_4_values() {
        let timers = TransportAwareTimers::new(TransportKind::Udp);
        assert_eq!(timers.duration(TransactionTimer::A), Duration::from_millis(500));
        assert_eq!(timers.duration(TransactionTimer::B), Duration::from_secs(32));
        assert_eq!(timers.duration(TransactionTimer::D), Duration::from_secs(32));
        assert_eq!(timers.duration(TransactionTimer::K), Duration::from_secs(5));
        assert_eq!(timers.duration(TransactionTimer::J), Duration::from_secs(32));
        assert!(timers.should_retransmit());
    }

    #[test]
    fn reliable_transports_zero_wait_and_retransmit_timers() {
        for transport in [TransportKind::Tcp, TransportKind::Tls] {
            let timers = TransportAwareTimers::new(transport);
            for timer in [
                TransactionTimer::A,
                TransactionTimer::D,
                TransactionTimer::E,
                TransactionTimer::G,
                TransactionTimer::I,
                TransactionTimer::J,
                TransactionTimer::K,
            ] {
                assert_eq!(timers.duration(timer), Duration::ZERO, "{:?}", timer);
            }
            assert_eq!(timers.duration(TransactionTimer::H), Duration::from_secs(32));
            assert!(!timers.should_retransmit());
        }
    }

    #[test]
    fn interval_doubles_up_to_t2() {
        let timers = TransportAwareTimers::new(TransportKind::Udp);
        let mut interval = timers.duration(TransactionTimer::A);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(interval.as_millis());
            interval = timers.next_interval(interval);
        }
        assert_eq!(seen, vec![500, 1000, 2000, 4000, 4000, 4000]);
    }

    #[test]
    fn custom_t1_scales_timeouts() {
        let defaults = TimerDefaults {
            t1: Duration::from_secs(1),
            ..TimerDefaults::default()
        };
        let timers = TransportAwareTimers::with_defaults(TransportKind::Udp, defaults);
        assert_eq!(timers.duration(TransactionTimer::F), Duration::from_secs(64));
        assert_eq!(timers.defaults().t1, Duration::from_secs(1));
    }
}
