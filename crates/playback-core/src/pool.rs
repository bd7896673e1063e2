//! Admission control for concurrently active decode sessions.
//!
//! The pool is the only cross-session shared mutable state in the core.
//! Every mutation is a single synchronous critical section, so no two
//! admissions can both observe a free slot and overshoot the bound.

use crate::error::PlaybackError;
use std::collections::HashSet;
use std::sync::Mutex;

pub struct StreamPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    capacity: usize,
    active: HashSet<String>,
}

impl StreamPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                capacity,
                active: HashSet::new(),
            }),
        }
    }

    /// Admit a session if a slot is free. Never queues or blocks: a full
    /// pool is an immediate error carrying the current capacity so callers
    /// can report the limit precisely. A request for an id that already
    /// holds a slot is a duplicate and is rejected, which lets the slot
    /// serve as the id's reservation while its session is constructed.
    pub fn request_slot(&self, session_id: &str) -> Result<(), PlaybackError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.active.contains(session_id) {
            return Err(PlaybackError::SessionExists(session_id.to_string()));
        }
        if inner.active.len() >= inner.capacity {
            return Err(PlaybackError::CapacityExceeded {
                limit: inner.capacity,
            });
        }
        inner.active.insert(session_id.to_string());
        Ok(())
    }

    /// Release a session's slot. Idempotent.
    pub fn release_slot(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.active.remove(session_id);
    }

    /// Update the bound for subsequent admissions. Shrinking is soft:
    /// sessions already active above a lowered capacity keep their slots
    /// until released.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.capacity = capacity;
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    pub fn active(&self) -> usize {
        self.inner.lock().unwrap().active.len()
    }

    pub fn holds_slot(&self, session_id: &str) -> bool {
        self.inner.lock().unwrap().active.contains(session_id)
    }
}
