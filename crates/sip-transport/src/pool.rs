// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Socket map: (transport, remote endpoint) → live stream connection.
//!
//! TCP and TLS connections to the same address live in separate slots, so a
//! send over one transport never reuses a connection of the other.
//!
//! The map mutex only guards slot lookup. Each endpoint has its own slot
//! mutex, held while a connection for that endpoint is being established,
//! so concurrent senders to one endpoint share a single connect attempt.
//! Lock order is always map, then slot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use sip_core::TransportKind;
use tracing::debug;

use crate::connection::Connection;

#[derive(Default)]
struct Slot {
    conn: Mutex<Option<Entry>>,
}

struct Entry {
    conn: Arc<Connection>,
    thread_id: u32,
}

type SlotKey = (TransportKind, SocketAddr);

#[derive(Default)]
pub struct SocketMap {
    slots: Mutex<HashMap<SlotKey, Arc<Slot>>>,
}

impl SocketMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: TransportKind, peer: SocketAddr) -> Arc<Slot> {
        self.slots.lock().entry((kind, peer)).or_default().clone()
    }

    fn existing_slot(&self, kind: TransportKind, peer: SocketAddr) -> Option<Arc<Slot>> {
        self.slots.lock().get(&(kind, peer)).cloned()
    }

    /// Live `kind` connection to `peer`, if any.
    pub fn get(&self, kind: TransportKind, peer: SocketAddr) -> Option<Arc<Connection>> {
        let slot = self.existing_slot(kind, peer)?;
        let guard = slot.conn.lock();
        guard
            .as_ref()
            .filter(|entry| entry.conn.kind() == kind && !entry.conn.is_closed())
            .map(|entry| entry.conn.clone())
    }

    /// Returns the live `kind` connection to `peer`, or runs `connect` to
    /// create one. `connect` returns the connection and the id of its reader
    /// thread. The boolean is true when this call created the connection.
    pub fn get_or_connect<F>(
        &self,
        kind: TransportKind,
        peer: SocketAddr,
        connect: F,
    ) -> Result<(Arc<Connection>, bool)>
    where
        F: FnOnce() -> Result<(Arc<Connection>, u32)>,
    {
        let slot = self.slot(kind, peer);
        let mut guard = slot.conn.lock();
        if let Some(entry) = guard.as_ref() {
            if entry.conn.kind() == kind && !entry.conn.is_closed() {
                return Ok((entry.conn.clone(), false));
            }
        }
        let (conn, thread_id) = connect()?;
        if conn.kind() != kind {
            conn.shutdown();
            return Err(anyhow!("{} connection to {} opened for {}", conn.kind(), peer, kind));
        }
        debug!(%peer, thread_id, "{} connection stored", kind);
        *guard = Some(Entry {
            conn: conn.clone(),
            thread_id,
        });
        Ok((conn, true))
    }

    /// Records an accepted connection, replacing any previous one of the
    /// same transport.
    pub fn insert(&self, conn: Arc<Connection>, thread_id: u32) {
        let slot = self.slot(conn.kind(), conn.peer());
        let previous = slot.conn.lock().replace(Entry { conn, thread_id });
        if let Some(previous) = previous {
            previous.conn.shutdown();
        }
    }

    /// Removes `conn` if it is still the one recorded for its peer.
    pub fn remove(&self, conn: &Arc<Connection>) -> bool {
        let Some(slot) = self.existing_slot(conn.kind(), conn.peer()) else {
            return false;
        };
        let mut guard = slot.conn.lock();
        match guard.as_ref() {
            Some(entry) if Arc::ptr_eq(&entry.conn, conn) => {
                *guard = None;
                true
            }
            _ => false,
        }
    }

    /// Id of the thread reading from `peer`'s `kind` connection.
    pub fn thread_of(&self, kind: TransportKind, peer: SocketAddr) -> Option<u32> {
        let slot = self.existing_slot(kind, peer)?;
        let guard = slot.conn.lock();
        guard.as_ref().map(|entry| entry.thread_id)
    }

    fn all_slots(&self) -> Vec<Arc<Slot>> {
        self.slots.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.all_slots()
            .iter()
            .filter(|slot| {
                slot.conn
                    .lock()
                    .as_ref()
                    .map_or(false, |entry| !entry.conn.is_closed())
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes out every connection idle for longer than `timeout`, and drops
    /// slots nobody is using.
    pub fn take_idle(&self, timeout: Duration, now: Instant) -> Vec<Arc<Connection>> {
        let mut idle = Vec::new();
        for slot in self.all_slots() {
            let mut guard = slot.conn.lock();
            let expired = guard
                .as_ref()
                .map_or(false, |entry| entry.conn.is_closed() || entry.conn.idle_for(now) > timeout);
            if expired {
                if let Some(entry) = guard.take() {
                    idle.push(entry.conn);
                }
            }
        }
        self.purge_empty();
        idle
    }

    /// Takes out every connection.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let all = self
            .all_slots()
            .iter()
            .filter_map(|slot| slot.conn.lock().take().map(|entry| entry.conn))
            .collect();
        self.purge_empty();
        all
    }

    fn purge_empty(&self) {
        // a slot held elsewhere may be mid-connect
        self.slots.lock().retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || slot.conn.try_lock().map_or(true, |guard| guard.is_some())
        });
    }
}
