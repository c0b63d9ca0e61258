// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounded pool of named OS threads plus a live-thread counter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use thiserror::Error;

/// Every slot of a [`ThreadList`] is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("thread pool exhausted ({capacity} threads live)")]
pub struct PoolExhausted {
    pub capacity: usize,
}

/// Decrements a live counter when the owning thread exits, even by panic.
pub(crate) struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    pub(crate) fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct ThreadList {
    capacity: usize,
    live: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadList {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            live: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Threads currently running.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Spawns `work` on a new thread, or fails with [`PoolExhausted`] when
    /// `capacity` threads are already running.
    pub fn spawn<F>(&self, name: String, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut handles = self.handles.lock();
        handles.retain(|handle| !handle.is_finished());
        if self.live() >= self.capacity {
            return Err(PoolExhausted {
                capacity: self.capacity,
            }
            .into());
        }
        // counted before the thread runs so the check above stays exact
        let guard = LiveGuard::enter(&self.live);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _guard = guard;
                work();
            })
            .with_context(|| format!("failed to spawn thread {}", name))?;
        handles.push(handle);
        Ok(())
    }

    /// Joins every thread spawned so far. Callers signal the threads to stop
    /// first.
    pub fn join_all(&self) {
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}
