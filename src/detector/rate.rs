//! Detection rate tracking
//!
//! One random-looking file can be a legitimate archive or key. Many of them
//! in a short span is what mass encryption looks like. This module counts
//! detections inside a sliding window and escalates as the count climbs.

use crate::detector::ThreatLevel;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window counter of detections
pub struct DetectionRate {
    /// Detections within `window` that raise the alarm; 0 disables
    limit: u32,
    /// Window duration
    window: Duration,
    /// Detection timestamps, oldest first
    hits: VecDeque<Instant>,
    /// Total detections since start
    total: u64,
}

impl DetectionRate {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: VecDeque::new(),
            total: 0,
        }
    }

    /// Record a detection and return the resulting threat level
    pub fn record(&mut self, now: Instant) -> ThreatLevel {
        self.total += 1;
        self.hits.push_back(now);
        self.level(now)
    }

    /// Current threat level without recording anything
    pub fn level(&mut self, now: Instant) -> ThreatLevel {
        self.expire(now);

        if self.limit == 0 {
            return ThreatLevel::Safe;
        }

        let count = self.hits.len() as u32;
        if count >= self.limit {
            ThreatLevel::Critical
        } else if count >= (self.limit / 2).max(1) {
            ThreatLevel::Suspicious
        } else {
            ThreatLevel::Safe
        }
    }

    /// Detections currently inside the window
    pub fn count(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.hits.len()
    }

    /// Detections since start
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}
