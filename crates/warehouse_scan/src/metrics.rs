//! In-process counters for pushdown negotiation, planning and release.
//!
//! These metrics are lock-free so they can be updated from every coordinator
//! without contention. One instance is usually shared by all scans of a
//! process.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated counters for scan planning.
#[derive(Debug, Default)]
pub struct ScanMetrics {
    /// Number of filters accepted for pushdown.
    filters_pushed: AtomicU64,
    /// Number of filters left for the host engine.
    filters_rejected: AtomicU64,
    /// Number of remote schema discoveries.
    schema_resolutions: AtomicU64,
    /// Number of split planning calls.
    split_plans: AtomicU64,
    /// Number of plans that produced no data splits.
    empty_plans: AtomicU64,
    /// Number of data partitions emitted.
    data_partitions: AtomicU64,
    /// Number of scans answered by the count fast path.
    count_scans: AtomicU64,
    /// Number of count partitions emitted.
    count_partitions: AtomicU64,
    /// Number of metadata splits distributed.
    broadcasts: AtomicU64,
    /// Number of reconciliations that reused the previous plan pair.
    broadcast_reuses: AtomicU64,
    /// Number of successful handle releases.
    releases: AtomicU64,
    /// Number of failed handle releases.
    release_failures: AtomicU64,
}

/// Immutable snapshot view of [`ScanMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanMetricsSnapshot {
    pub filters_pushed: u64,
    pub filters_rejected: u64,
    pub schema_resolutions: u64,
    pub split_plans: u64,
    pub empty_plans: u64,
    pub data_partitions: u64,
    pub count_scans: u64,
    pub count_partitions: u64,
    pub broadcasts: u64,
    pub broadcast_reuses: u64,
    pub releases: u64,
    pub release_failures: u64,
}

impl ScanMetrics {
    /// Records the outcome of one pushdown negotiation.
    pub fn record_pushdown(&self, pushed: usize, rejected: usize) {
        self.filters_pushed
            .fetch_add(pushed as u64, Ordering::Relaxed);
        self.filters_rejected
            .fetch_add(rejected as u64, Ordering::Relaxed);
    }

    pub fn record_schema_resolution(&self) {
        self.schema_resolutions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one split plan and the data partitions it produced.
    pub fn record_split_plan(&self, data_partitions: usize) {
        self.split_plans.fetch_add(1, Ordering::Relaxed);
        if data_partitions == 0 {
            self.empty_plans.fetch_add(1, Ordering::Relaxed);
        }
        self.data_partitions
            .fetch_add(data_partitions as u64, Ordering::Relaxed);
    }

    /// Records one count fast-path scan.
    pub fn record_count_scan(&self, partitions: usize) {
        self.count_scans.fetch_add(1, Ordering::Relaxed);
        self.count_partitions
            .fetch_add(partitions as u64, Ordering::Relaxed);
    }

    /// Records distribution of `splits` metadata splits.
    pub fn record_broadcast(&self, splits: u64) {
        self.broadcasts.fetch_add(splits, Ordering::Relaxed);
    }

    pub fn record_broadcast_reuse(&self) {
        self.broadcast_reuses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the outcome of one handle release.
    pub fn record_release(&self, ok: bool) {
        if ok {
            self.releases.fetch_add(1, Ordering::Relaxed);
        } else {
            self.release_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Captures a point-in-time copy of all counters.
    pub fn snapshot(&self) -> ScanMetricsSnapshot {
        ScanMetricsSnapshot {
            filters_pushed: self.filters_pushed.load(Ordering::Relaxed),
            filters_rejected: self.filters_rejected.load(Ordering::Relaxed),
            schema_resolutions: self.schema_resolutions.load(Ordering::Relaxed),
            split_plans: self.split_plans.load(Ordering::Relaxed),
            empty_plans: self.empty_plans.load(Ordering::Relaxed),
            data_partitions: self.data_partitions.load(Ordering::Relaxed),
            count_scans: self.count_scans.load(Ordering::Relaxed),
            count_partitions: self.count_partitions.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            broadcast_reuses: self.broadcast_reuses.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
        }
    }

    /// Renders metrics in a plain-text `key=value` format.
    pub fn render_text(&self) -> String {
        let s = self.snapshot();
        format!(
            "scan_filters_pushed={}\nscan_filters_rejected={}\nscan_schema_resolutions={}\nscan_split_plans={}\nscan_empty_plans={}\nscan_data_partitions={}\nscan_count_scans={}\nscan_count_partitions={}\nscan_broadcasts={}\nscan_broadcast_reuses={}\nscan_releases={}\nscan_release_failures={}\n",
            s.filters_pushed,
            s.filters_rejected,
            s.schema_resolutions,
            s.split_plans,
            s.empty_plans,
            s.data_partitions,
            s.count_scans,
            s.count_partitions,
            s.broadcasts,
            s.broadcast_reuses,
            s.releases,
            s.release_failures,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_plan_counts_empty_plans() {
        let metrics = ScanMetrics::default();
        metrics.record_split_plan(0);
        metrics.record_split_plan(5);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.split_plans, 2);
        assert_eq!(snapshot.empty_plans, 1);
        assert_eq!(snapshot.data_partitions, 5);
    }

    #[test]
    fn render_text_lists_every_counter() {
        let metrics = ScanMetrics::default();
        metrics.record_pushdown(2, 1);
        metrics.record_release(false);
        let text = metrics.render_text();
        assert!(text.contains("scan_filters_pushed=2\n"));
        assert!(text.contains("scan_filters_rejected=1\n"));
        assert!(text.contains("scan_release_failures=1\n"));
        assert_eq!(text.lines().count(), 12);
    }
}
