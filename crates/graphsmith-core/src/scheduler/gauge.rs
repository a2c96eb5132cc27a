//! Merge-lane occupancy counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Active, peak and total merges
#[derive(Debug, Default)]
pub struct MergeGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicU64,
}

/// Point-in-time reading of a [`MergeGauge`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeGaugeSnapshot {
    pub active: usize,
    pub peak: usize,
    pub total: u64,
}

impl MergeGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a merge as active until the guard drops
    pub fn enter(&self) -> MergeGuard<'_> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        MergeGuard { gauge: self }
    }

    pub fn snapshot(&self) -> MergeGaugeSnapshot {
        MergeGaugeSnapshot {
            active: self.active.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}

/// Marks one merge in progress
#[derive(Debug)]
pub struct MergeGuard<'a> {
    gauge: &'a MergeGauge,
}

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
        self.gauge.total.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_tracks_active_peak_and_total() {
        let gauge = MergeGauge::new();
        {
            let _first = gauge.enter();
            let _second = gauge.enter();
            assert_eq!(gauge.snapshot().active, 2);
        }

        let snapshot = gauge.snapshot();
        assert_eq!(snapshot.active, 0);
        assert_eq!(snapshot.peak, 2);
        assert_eq!(snapshot.total, 2);
    }
}
