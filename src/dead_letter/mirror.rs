//! Bounded per-process mirror of DLQ entries.
//!
//! The mirror is a cache, never a source of truth: eligibility and statistics reads go to
//! the durable store. Entries are keyed by the store-assigned id and evicted oldest-first
//! once `capacity` is reached.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::store::DlqEntry;

#[derive(Debug, Default)]
struct MirrorState {
    entries: HashMap<String, DlqEntry>,
    order: VecDeque<String>,
}

#[derive(Debug)]
pub struct DeadLetterMirror {
    state: Mutex<MirrorState>,
    capacity: usize,
    evicted: AtomicU64,
}

impl DeadLetterMirror {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MirrorState::default()),
            capacity: capacity.max(1),
            evicted: AtomicU64::new(0),
        }
    }

    /// Insert or replace an entry.
    pub fn insert(&self, entry: DlqEntry) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.entries.contains_key(&entry.id) {
            while state.entries.len() >= self.capacity {
                let Some(oldest) = state.order.pop_front() else { break };
                state.entries.remove(&oldest);
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            state.order.push_back(entry.id.clone());
        }
        state.entries.insert(entry.id.clone(), entry);
    }

    /// Replace an entry only if it is already mirrored.
    pub fn refresh(&self, entry: DlqEntry) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.entries.get_mut(&entry.id) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<DlqEntry> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).entries.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<DlqEntry> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = state.entries.remove(id);
        if removed.is_some() {
            state.order.retain(|k| k != id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
