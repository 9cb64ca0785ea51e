//! Acquisition statistics
//!
//! Lock-free counters updated by the manager while it selects engines.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Live counters owned by one manager
#[derive(Debug)]
pub(crate) struct ManagerCounters {
    acquisitions: AtomicU64,
    probe_attempts: AtomicU64,
    probe_failures: AtomicU64,
    failovers: AtomicU64,
    created_at: Instant,
}

impl ManagerCounters {
    pub fn new() -> Self {
        Self {
            acquisitions: AtomicU64::new(0),
            probe_attempts: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe(&self) {
        self.probe_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ManagerStats {
        ManagerStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            probe_attempts: self.probe_attempts.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            created_at: self.created_at,
        }
    }
}

/// Point-in-time copy of the manager's counters
#[derive(Debug, Clone, Copy)]
pub struct ManagerStats {
    /// Runs of the acquisition algorithm (cache fast paths are not counted)
    pub acquisitions: u64,
    /// Engines the backend was asked to create and probe
    pub probe_attempts: u64,
    pub probe_failures: u64,
    /// Selection changes from one URL to another
    pub failovers: u64,
    pub created_at: Instant,
}

impl ManagerStats {
    /// Calculate the probe failure rate as a percentage
    pub fn probe_failure_rate(&self) -> f64 {
        if self.probe_attempts > 0 {
            (self.probe_failures as f64 / self.probe_attempts as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn probe_successes(&self) -> u64 {
        self.probe_attempts.saturating_sub(self.probe_failures)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = ManagerCounters::new();
        counters.record_acquisition();
        counters.record_probe();
        counters.record_probe();
        counters.record_probe_failure();
        counters.record_failover();

        let stats = counters.snapshot();
        assert_eq!(stats.acquisitions, 1);
        assert_eq!(stats.probe_attempts, 2);
        assert_eq!(stats.probe_successes(), 1);
        assert_eq!(stats.failovers, 1);
        assert_eq!(stats.probe_failure_rate(), 50.0);
    }

    #[test]
    fn test_failure_rate_without_probes() {
        assert_eq!(ManagerCounters::new().snapshot().probe_failure_rate(), 0.0);
    }
}
