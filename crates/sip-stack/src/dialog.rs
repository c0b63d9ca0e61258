// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Call-ID keyed table of INVITE exchanges, used to answer CANCEL.
//!
//! An entry lives from INVITE admission until the call ends. Taking the
//! entry out is the point after which the call can no longer be cancelled,
//! so every removal goes through a single locked `take`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use sip_core::Request;
use smol_str::SmolStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// We received the INVITE.
    Inbound,
    /// We sent the INVITE.
    Outbound,
}

#[derive(Debug, Clone)]
pub struct Dialog {
    pub call_id: SmolStr,
    pub invite: Arc<Request>,
    pub direction: Direction,
    pub created: Instant,
    /// Set once a 2xx for the INVITE is sent or received.
    pub started: Option<Instant>,
    pub ended: Option<Instant>,
    /// To tag we answer with (inbound calls).
    pub local_tag: Option<SmolStr>,
}

impl Dialog {
    pub fn new(call_id: impl Into<SmolStr>, invite: Arc<Request>, direction: Direction, now: Instant) -> Self {
        Self {
            call_id: call_id.into(),
            invite,
            direction,
            created: now,
            started: None,
            ended: None,
            local_tag: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.started.is_some()
    }
}

#[derive(Default)]
pub struct DialogMap {
    dialogs: Mutex<HashMap<SmolStr, Dialog>>,
}

impl DialogMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `dialog` unless its Call-ID is already tracked (re-INVITE).
    pub fn insert(&self, dialog: Dialog) -> bool {
        let mut dialogs = self.dialogs.lock();
        if dialogs.contains_key(&dialog.call_id) {
            return false;
        }
        dialogs.insert(dialog.call_id.clone(), dialog);
        true
    }

    pub fn get(&self, call_id: &str) -> Option<Dialog> {
        self.dialogs.lock().get(call_id).cloned()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.dialogs.lock().contains_key(call_id)
    }

    /// Records the answer time. Later 2xx retransmissions keep the first.
    pub fn mark_started(&self, call_id: &str, now: Instant) -> bool {
        match self.dialogs.lock().get_mut(call_id) {
            Some(dialog) => {
                dialog.started.get_or_insert(now);
                true
            }
            None => false,
        }
    }

    pub fn set_local_tag(&self, call_id: &str, tag: &str) {
        if let Some(dialog) = self.dialogs.lock().get_mut(call_id) {
            if dialog.local_tag.is_none() {
                dialog.local_tag = Some(SmolStr::new(tag));
            }
        }
    }

    /// Ends the call: removes the entry and stamps its end time.
    pub fn take(&self, call_id: &str, now: Instant) -> Option<Dialog> {
        let mut dialog = self.dialogs.lock().remove(call_id)?;
        dialog.ended = Some(now);
        Some(dialog)
    }

    /// Takes the entry only if it is an inbound call nobody answered yet.
    pub fn take_cancellable(&self, call_id: &str, now: Instant) -> Option<Dialog> {
        let mut dialogs = self.dialogs.lock();
        let cancellable = dialogs
            .get(call_id)
            .map_or(false, |d| d.direction == Direction::Inbound && d.started.is_none());
        if !cancellable {
            return None;
        }
        let mut dialog = dialogs.remove(call_id)?;
        dialog.ended = Some(now);
        Some(dialog)
    }

    /// Takes an unanswered call of either direction.
    pub fn take_unanswered(&self, call_id: &str, now: Instant) -> Option<Dialog> {
        let mut dialogs = self.dialogs.lock();
        if dialogs.get(call_id)?.started.is_some() {
            return None;
        }
        let mut dialog = dialogs.remove(call_id)?;
        dialog.ended = Some(now);
        Some(dialog)
    }

    pub fn len(&self) -> usize {
        self.dialogs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> usize {
        let mut dialogs = self.dialogs.lock();
        let n = dialogs.len();
        dialogs.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_core::Method;
    use std::time::Duration;

    fn dialog(call_id: &str, direction: Direction, now: Instant) -> Dialog {
        Dialog::new(
            call_id,
            Arc::new(Request::new(Method::Invite, "sip:bob@example.com")),
            direction,
            now,
        )
    }

    #[test]
    fn reinvite_keeps_the_first_entry() {
        let map = DialogMap::new();
        let now = Instant::now();
        assert!(map.insert(dialog("c1", Direction::Inbound, now)));
        assert!(!map.insert(dialog("c1", Direction::Outbound, now)));
        assert_eq!(map.get("c1").unwrap().direction, Direction::Inbound);
    }

    #[test]
    fn only_unanswered_inbound_calls_are_cancellable() {
        let map = DialogMap::new();
        let now = Instant::now();
        map.insert(dialog("in", Direction::Inbound, now));
        map.insert(dialog("out", Direction::Outbound, now));
        map.insert(dialog("answered", Direction::Inbound, now));
        map.mark_started("answered", now);

        assert!(map.take_cancellable("out", now).is_none());
        assert!(map.take_cancellable("answered", now).is_none());
        let later = now + Duration::from_secs(1);
        let taken = map.take_cancellable("in", later).unwrap();
        assert_eq!(taken.ended, Some(later));
        assert!(map.take_cancellable("in", later).is_none());
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn start_time_is_set_once() {
        let map = DialogMap::new();
        let now = Instant::now();
        map.insert(dialog("c", Direction::Outbound, now));
        map.mark_started("c", now);
        map.mark_started("c", now + Duration::from_secs(5));
        assert_eq!(map.get("c").unwrap().started, Some(now));
        assert!(map.take_unanswered("c", now).is_none());
        assert!(map.take("c", now).is_some());
        assert!(!map.mark_started("c", now));
    }

    #[test]
    fn local_tag_keeps_the_first_value() {
        let map = DialogMap::new();
        let now = Instant::now();
        map.insert(dialog("c", Direction::Inbound, now));
        map.set_local_tag("c", "a1");
        map.set_local_tag("c", "b2");
        assert_eq!(map.get("c").unwrap().local_tag.as_deref(), Some("a1"));
    }
}
