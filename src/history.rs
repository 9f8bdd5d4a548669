//! Per-work-item retry history.
//!
//! Held in memory only and cleared when the item is dead-lettered or reprocessed. Both
//! dimensions are bounded: each item keeps its most recent `per_item_limit` attempts and at
//! most `max_items` items are tracked, evicting the item tracked longest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Default cap on attempts kept per work item.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
/// Default cap on tracked work items.
pub const DEFAULT_MAX_TRACKED_ITEMS: usize = 10_000;

/// One scheduled retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    /// 1-based, increasing per work item.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub delay_ms: u64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
struct HistoryState {
    items: HashMap<String, VecDeque<RetryAttempt>>,
    order: VecDeque<String>,
}

/// Bounded, thread-safe retry history keyed by work item id.
#[derive(Debug)]
pub struct RetryHistory {
    state: Mutex<HistoryState>,
    per_item_limit: usize,
    max_items: usize,
}

impl RetryHistory {
    pub fn new(per_item_limit: usize, max_items: usize) -> Self {
        Self {
            state: Mutex::new(HistoryState::default()),
            per_item_limit: per_item_limit.max(1),
            max_items: max_items.max(1),
        }
    }

    /// Append an attempt. The whole append happens under one lock.
    pub fn record(&self, work_item_id: &str, attempt: RetryAttempt) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.items.contains_key(work_item_id) {
            while state.items.len() >= self.max_items {
                match state.order.pop_front() {
                    Some(oldest) => {
                        state.items.remove(&oldest);
                    }
                    None => break,
                }
            }
            state.order.push_back(work_item_id.to_string());
        }
        let attempts = state.items.entry(work_item_id.to_string()).or_default();
        attempts.push_back(attempt);
        while attempts.len() > self.per_item_limit {
            attempts.pop_front();
        }
    }

    /// Copy of the recorded attempts, oldest first.
    pub fn get(&self, work_item_id: &str) -> Option<Vec<RetryAttempt>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.items.get(work_item_id).map(|a| a.iter().cloned().collect())
    }

    /// Remove and return the history for `work_item_id`.
    pub fn take(&self, work_item_id: &str) -> Vec<RetryAttempt> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = state.items.remove(work_item_id);
        if removed.is_some() {
            state.order.retain(|id| id != work_item_id);
        }
        removed.map(Vec::from).unwrap_or_default()
    }

    /// Remove the given attempts, previously copied out with [`get`](Self::get), and keep
    /// anything recorded since. The item stops being tracked once nothing is left.
    pub fn discard(&self, work_item_id: &str, persisted: &[RetryAttempt]) {
        if persisted.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(attempts) = state.items.get_mut(work_item_id) else {
            return;
        };
        for done in persisted {
            if let Some(pos) = attempts.iter().position(|a| a == done) {
                attempts.remove(pos);
            }
        }
        if attempts.is_empty() {
            state.items.remove(work_item_id);
            state.order.retain(|id| id != work_item_id);
        }
    }

    pub fn clear(&self, work_item_id: &str) {
        let _ = self.take(work_item_id);
    }

    /// Number of tracked work items.
    pub fn tracked(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).items.len()
    }
}

impl Default for RetryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_TRACKED_ITEMS)
    }
}
