//! Flush cadence tracking for durable component state
//!
//! Components mutate in memory and write back periodically. The tracker
//! answers "is a flush due" from either trigger: enough updates since the
//! last save, or enough wall time. Save failures are logged by the
//! component wrappers and never reach a trading decision.

use std::time::{Duration, Instant};

use crate::config::PersistenceConfig;

/// Tracks updates and elapsed time between flushes.
#[derive(Debug)]
pub struct FlushTracker {
    updates_since_flush: u64,
    last_flush: Instant,
    every_n_updates: u64,
    interval: Duration,
}

impl FlushTracker {
    pub fn new(cfg: &PersistenceConfig) -> Self {
        Self {
            updates_since_flush: 0,
            last_flush: Instant::now(),
            every_n_updates: cfg.flush_every_n_updates.max(1),
            interval: Duration::from_secs(cfg.flush_interval_secs),
        }
    }

    /// Record one state mutation
    pub fn record_update(&mut self) {
        self.updates_since_flush += 1;
    }

    /// Whether either flush trigger has fired
    pub fn is_due(&self) -> bool {
        if self.updates_since_flush == 0 {
            return false;
        }
        self.updates_since_flush >= self.every_n_updates
            || self.last_flush.elapsed() >= self.interval
    }

    /// Reset both triggers after a successful save
    pub fn mark_flushed(&mut self) {
        self.updates_since_flush = 0;
        self.last_flush = Instant::now();
    }

    pub fn pending_updates(&self) -> u64 {
        self.updates_since_flush
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(every_n: u64, interval_secs: u64) -> FlushTracker {
        FlushTracker::new(&PersistenceConfig {
            state_dir: "state".to_string(),
            flush_interval_secs: interval_secs,
            flush_every_n_updates: every_n,
        })
    }

    #[test]
    fn test_not_due_when_clean() {
        let t = tracker(5, 0);
        // Zero pending updates: never due, even with a zero interval
        assert!(!t.is_due());
    }

    #[test]
    fn test_due_after_enough_updates() {
        let mut t = tracker(3, 3600);
        t.record_update();
        t.record_update();
        assert!(!t.is_due());
        t.record_update();
        assert!(t.is_due());

        t.mark_flushed();
        assert!(!t.is_due());
        assert_eq!(t.pending_updates(), 0);
    }

    #[test]
    fn test_due_after_interval() {
        let mut t = tracker(1000, 0);
        t.record_update();
        // Interval of zero elapses immediately
        assert!(t.is_due());
    }
}
