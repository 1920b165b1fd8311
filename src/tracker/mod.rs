//! Per-path debouncing
//!
//! A new file rarely arrives as a single notification. Depending on the
//! platform the kernel reports a create, then writes, then sometimes a
//! permission change for one logical file. The state machine here collapses
//! such a burst into a single "ready to inspect" decision.

pub mod table;

pub use table::{run_reaper, PathTable};

use crate::watcher::EventKind;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// How a burst of events for one path becomes ready for inspection.
///
/// Chosen once at startup; never switched while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebouncePolicy {
    /// Ready as soon as the creation is observed
    Single,
    /// Ready after create, then write, then a permission change
    Sequence,
}

impl DebouncePolicy {
    /// Policy matching the host's notification semantics.
    ///
    /// inotify and ReadDirectoryChangesW report one creation per new file;
    /// FSEvents fragments it into create + write + chmod.
    pub fn for_platform() -> Self {
        if cfg!(target_os = "macos") {
            DebouncePolicy::Sequence
        } else {
            DebouncePolicy::Single
        }
    }

    /// Apply one event to a state, returning the successor state
    pub fn record_event(self, state: DebounceState, kind: EventKind, now: Instant) -> DebounceState {
        if state.ready {
            return state;
        }

        let mut next = state;
        match (self, kind) {
            (DebouncePolicy::Single, EventKind::Create) => {
                next.created_seen = true;
                next.created_at = Some(now);
                next.ready = true;
            }
            (DebouncePolicy::Sequence, EventKind::Create) => {
                next.created_seen = true;
                next.created_at = Some(now);
                next.write_seen = false;
            }
            (DebouncePolicy::Sequence, EventKind::Write) if state.created_seen => {
                next.write_seen = true;
            }
            (DebouncePolicy::Sequence, EventKind::PermissionChange)
                if state.created_seen && state.write_seen =>
            {
                next.ready = true;
            }
            _ => {}
        }
        next
    }

    /// Whether the state has reached its terminal condition
    pub fn is_ready(self, state: &DebounceState) -> bool {
        state.ready
    }
}

impl std::fmt::Display for DebouncePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DebouncePolicy::Single => write!(f, "single"),
            DebouncePolicy::Sequence => write!(f, "sequence"),
        }
    }
}

/// Debounce record for one watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceState {
    created_seen: bool,
    created_at: Option<Instant>,
    write_seen: bool,
    ready: bool,
    /// When the first event of any kind was seen for this path
    first_seen: Instant,
}

impl DebounceState {
    /// Fresh state with all flags cleared
    pub fn new(now: Instant) -> Self {
        Self {
            created_seen: false,
            created_at: None,
            write_seen: false,
            ready: false,
            first_seen: now,
        }
    }

    pub fn created_seen(&self) -> bool {
        self.created_seen
    }

    pub fn write_seen(&self) -> bool {
        self.write_seen
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Time of the creation event, if one was observed
    pub fn created_at(&self) -> Option<Instant> {
        self.created_at
    }

    /// Timestamp the reaper ages this entry by.
    ///
    /// States that never saw a creation age from their first event.
    pub fn age_origin(&self) -> Instant {
        self.created_at.unwrap_or(self.first_seen)
    }
}
