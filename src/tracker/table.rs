//! Concurrent path state table and stale-state reaper

use super::{DebouncePolicy, DebounceState};
use crate::watcher::EventKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Map from path to debounce state behind a single lock.
///
/// The event loop, the scheduler and the reaper all go through this lock.
/// An entry is removed exactly once: either here when it turns ready, or by
/// the reaper when it expires.
pub struct PathTable {
    policy: DebouncePolicy,
    entries: Mutex<HashMap<PathBuf, DebounceState>>,
}

impl PathTable {
    pub fn new(policy: DebouncePolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> DebouncePolicy {
        self.policy
    }

    /// Current state for a path, inserting a fresh one if absent
    pub fn get_or_create(&self, path: &Path, now: Instant) -> DebounceState {
        *self
            .entries
            .lock()
            .entry(path.to_path_buf())
            .or_insert_with(|| DebounceState::new(now))
    }

    /// Record an event and report whether the path just became ready.
    ///
    /// Lookup, transition, readiness test and removal happen under one lock
    /// acquisition, so a creation episode is granted inspection at most once.
    pub fn record_and_check(&self, path: &Path, kind: EventKind, now: Instant) -> bool {
        let mut entries = self.entries.lock();

        let state = entries
            .entry(path.to_path_buf())
            .or_insert_with(|| DebounceState::new(now));
        *state = self.policy.record_event(*state, kind, now);

        if self.policy.is_ready(state) {
            entries.remove(path);
            true
        } else {
            false
        }
    }

    /// Drop a path's state
    pub fn remove(&self, path: &Path) -> Option<DebounceState> {
        self.entries.lock().remove(path)
    }

    /// Evict every entry older than `ttl` that never became ready
    pub fn sweep_expired(&self, ttl: Duration, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, state| {
            state.is_ready() || now.saturating_duration_since(state.age_origin()) <= ttl
        });
        before - entries.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Periodically evict path states that never completed.
///
/// A state reaped just before it would have become ready is a missed
/// inspection; that is the price of bounded memory.
pub async fn run_reaper(table: Arc<PathTable>, period: Duration, ttl: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        let evicted = table.sweep_expired(ttl, Instant::now());
        if evicted > 0 {
            debug!(
                evicted,
                remaining = table.len(),
                "Dropped stale path states"
            );
        }
    }
}
