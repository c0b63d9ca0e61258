// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Application callbacks.
//!
//! Callbacks run on the thread that produced the event: a transport reader
//! for received messages, the timer thread (id 0) for timeouts. No stack
//! lock is held while they run, so a callback may call back into the stack,
//! for example to answer the request it was handed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sip_core::{Request, Response};

/// Thread id used for events raised outside transport reader threads.
pub const STACK_THREAD_ID: u32 = 0;

pub trait StackCallback: Send + Sync + 'static {
    /// A new request, or the first ACK for a 2xx. Return `true` to stop
    /// later callbacks from seeing it.
    fn on_recv_request(&self, _thread_id: u32, _request: &Request) -> bool {
        false
    }

    /// A response matched to a client transaction, delivered once.
    fn on_recv_response(&self, _thread_id: u32, _response: &Response) -> bool {
        false
    }

    /// Timer B, C, F or H expired for the transaction started by `request`.
    fn on_timeout(&self, _thread_id: u32, _request: &Request) {}

    fn on_transport_error(&self, _thread_id: u32, _request: &Request) {}

    /// A call left the dialog map. `status` is the code that ended it.
    fn on_call_end(&self, _call_id: &str, _status: u16) {}

    fn on_thread_end(&self, _thread_id: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback#{}", self.0)
    }
}

/// Registered callbacks in registration order.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    next: AtomicU64,
    entries: RwLock<Vec<(CallbackId, Arc<dyn StackCallback>)>>,
}

impl CallbackRegistry {
    pub(crate) fn add(&self, callback: Arc<dyn StackCallback>) -> CallbackId {
        let id = CallbackId(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: CallbackId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Copy of the current list, so callbacks run without the lock held.
    fn snapshot(&self) -> Vec<Arc<dyn StackCallback>> {
        self.entries.read().iter().map(|(_, cb)| cb.clone()).collect()
    }

    /// Offers `request` to each callback until one consumes it.
    pub(crate) fn request(&self, thread_id: u32, request: &Request) -> bool {
        self.snapshot()
            .iter()
            .any(|cb| cb.on_recv_request(thread_id, request))
    }

    pub(crate) fn response(&self, thread_id: u32, response: &Response) -> bool {
        self.snapshot()
            .iter()
            .any(|cb| cb.on_recv_response(thread_id, response))
    }

    pub(crate) fn timeout(&self, thread_id: u32, request: &Request) {
        for cb in self.snapshot() {
            cb.on_timeout(thread_id, request);
        }
    }

    pub(crate) fn transport_error(&self, thread_id: u32, request: &Request) {
        for cb in self.snapshot() {
            cb.on_transport_error(thread_id, request);
        }
    }

    pub(crate) fn call_end(&self, call_id: &str, status: u16) {
        for cb in self.snapshot() {
            cb.on_call_end(call_id, status);
        }
    }

    pub(crate) fn thread_end(&self, thread_id: u32) {
        for cb in self.snapshot() {
            cb.on_thread_end(thread_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sip_core::Method;

    struct Named {
        name: &'static str,
        consume: bool,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl StackCallback for Named {
        fn on_recv_request(&self, _thread_id: u32, _request: &Request) -> bool {
            self.seen.lock().push(self.name);
            self.consume
        }
    }

    fn named(name: &'static str, consume: bool, seen: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Named> {
        Arc::new(Named {
            name,
            consume,
            seen: seen.clone(),
        })
    }

    #[test]
    fn registration_order_and_consumption() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = CallbackRegistry::default();
        registry.add(named("first", false, &seen));
        registry.add(named("second", true, &seen));
        registry.add(named("third", false, &seen));

        let req = Request::new(Method::Options, "sip:a@b");
        assert!(registry.request(1, &req));
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }

    #[test]
    fn removed_callbacks_are_not_called() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = CallbackRegistry::default();
        let first = registry.add(named("first", false, &seen));
        registry.add(named("second", false, &seen));

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert_eq!(registry.len(), 1);

        let req = Request::new(Method::Options, "sip:a@b");
        assert!(!registry.request(1, &req));
        assert_eq!(*seen.lock(), vec!["second"]);
    }
}
