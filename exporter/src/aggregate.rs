//! Aggregation of queue snapshots
//!
//! Turns the rows read in one poll cycle into status counts, the wait time of
//! the oldest active job and a wait-time distribution, all keyed by request
//! URI. The result is rebuilt from scratch every cycle and never merged with a
//! previous one.

use queue_exporter_shared::{JobStatus, QueueRow};
use std::collections::BTreeMap;

/// Upper bounds of the wait-time buckets, in minutes.
pub const BUCKET_BOUNDS_MINUTES: [i64; 8] = [1, 10, 30, 60, 120, 180, 240, 360];

/// Number of buckets including the trailing `+Inf` catch-all.
pub const BUCKET_COUNT: usize = BUCKET_BOUNDS_MINUTES.len() + 1;

/// Bucket labels as exported in the `le` label.
pub const BUCKET_LABELS: [&str; BUCKET_COUNT] =
    ["1", "10", "30", "60", "120", "180", "240", "360", "+Inf"];

/// Wait-time distribution for one request URI.
///
/// Each job lands in exactly one bucket: the first bound it is below. This is
/// not a cumulative Prometheus histogram, so no job is counted twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitHistogram {
    counts: [u64; BUCKET_COUNT],
}

impl WaitHistogram {
    /// Index of the bucket a wait of `elapsed_secs` belongs to.
    pub fn bucket_for(elapsed_secs: i64) -> usize {
        BUCKET_BOUNDS_MINUTES
            .iter()
            .position(|&minutes| elapsed_secs < 60 * minutes)
            .unwrap_or(BUCKET_COUNT - 1)
    }

    /// Count one job and return the index of the bucket it went into.
    pub fn record(&mut self, elapsed_secs: i64) -> usize {
        let bucket = Self::bucket_for(elapsed_secs);
        self.counts[bucket] += 1;
        bucket
    }

    /// Count for the bucket with the given label (`"10"`, `"+Inf"`, ...).
    pub fn count(&self, label: &str) -> Option<u64> {
        BUCKET_LABELS
            .iter()
            .position(|&l| l == label)
            .map(|i| self.counts[i])
    }

    /// All buckets in bound order, including empty ones.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        BUCKET_LABELS.iter().copied().zip(self.counts.iter().copied())
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Row counts for one status, per request URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UriCounts {
    pub by_uri: BTreeMap<String, u64>,
    pub total: u64,
}

/// Row counts per status and request URI, plus the grand total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCounts {
    by_status: BTreeMap<JobStatus, UriCounts>,
    total: u64,
}

impl Default for StatusCounts {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCounts {
    /// Empty counts with the three known statuses present at zero.
    pub fn new() -> Self {
        let by_status = JobStatus::KNOWN
            .iter()
            .map(|status| (status.clone(), UriCounts::default()))
            .collect();
        Self {
            by_status,
            total: 0,
        }
    }

    fn record(&mut self, status: &JobStatus, request_uri: &str) {
        let entry = self.by_status.entry(status.clone()).or_default();
        *entry.by_uri.entry(request_uri.to_string()).or_insert(0) += 1;
        entry.total += 1;
        self.total += 1;
    }

    /// Number of rows processed.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Rows with `status`, across all URIs.
    pub fn status_total(&self, status: &JobStatus) -> u64 {
        self.by_status.get(status).map_or(0, |c| c.total)
    }

    /// Rows with `status` for `request_uri`.
    pub fn get(&self, status: &JobStatus, request_uri: &str) -> u64 {
        self.by_status
            .get(status)
            .and_then(|c| c.by_uri.get(request_uri))
            .copied()
            .unwrap_or(0)
    }

    /// Iterate statuses in order: known statuses first, then unrecognized ones by name.
    pub fn iter(&self) -> impl Iterator<Item = (&JobStatus, &UriCounts)> {
        self.by_status.iter()
    }
}

/// The row that stopped an aggregation because its start time is in the future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaltedRow {
    /// Position of the row in the snapshot
    pub position: usize,
    pub row: QueueRow,
    /// Always negative
    pub elapsed_secs: i64,
}

/// Everything derived from one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub counts: StatusCounts,
    /// Longest wait, in seconds, among active jobs of each URI
    pub oldest_wait_secs: BTreeMap<String, i64>,
    pub histogram: BTreeMap<String, WaitHistogram>,
    /// Set when a future start time cut the snapshot short
    pub halted: Option<HaltedRow>,
}

impl Aggregation {
    /// Rows of unrecognized statuses, summed across all of them.
    pub fn unrecognized_total(&self) -> u64 {
        self.counts
            .iter()
            .filter(|(status, _)| matches!(status, JobStatus::Unknown(_)))
            .map(|(_, c)| c.total)
            .sum()
    }
}

/// Receives every step of an aggregation, for debug logging.
///
/// All methods default to doing nothing.
pub trait AggregationObserver {
    fn row(&mut self, _row: &QueueRow) {}
    fn completed(&mut self, _row: &QueueRow) {}
    fn failed(&mut self, _row: &QueueRow, _elapsed_secs: i64) {}
    fn waiting(&mut self, _row: &QueueRow, _elapsed_secs: i64) {}
    fn bucketed(&mut self, _row: &QueueRow, _bucket: &'static str, _count: u64) {}
    fn oldest_updated(&mut self, _row: &QueueRow, _elapsed_secs: i64) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AggregationObserver for NoopObserver {}

/// Aggregate a snapshot taken at `now_secs` (epoch seconds).
pub fn aggregate(rows: &[QueueRow], now_secs: i64) -> Aggregation {
    aggregate_with(rows, now_secs, &mut NoopObserver)
}

/// Aggregate a snapshot, reporting each step to `observer`.
///
/// A row whose start time lies in the future ends the aggregation: it is
/// counted, recorded in [`Aggregation::halted`], and every row after it is
/// ignored. What was aggregated up to that point is returned.
pub fn aggregate_with<O>(rows: &[QueueRow], now_secs: i64, observer: &mut O) -> Aggregation
where
    O: AggregationObserver + ?Sized,
{
    let mut result = Aggregation::default();

    for (position, row) in rows.iter().enumerate() {
        observer.row(row);
        result.counts.record(&row.status, &row.request_uri);

        if row.status == JobStatus::Completed {
            observer.completed(row);
            continue;
        }

        let elapsed = row.elapsed_secs(now_secs);
        if elapsed < 0 {
            result.halted = Some(HaltedRow {
                position,
                row: row.clone(),
                elapsed_secs: elapsed,
            });
            break;
        }

        if !row.status.is_waiting() {
            observer.failed(row, elapsed);
            continue;
        }

        observer.waiting(row, elapsed);

        let histogram = result.histogram.entry(row.request_uri.clone()).or_default();
        let bucket = histogram.record(elapsed);
        observer.bucketed(row, BUCKET_LABELS[bucket], histogram.counts[bucket]);

        match result.oldest_wait_secs.get_mut(&row.request_uri) {
            Some(oldest) if *oldest >= elapsed => {}
            Some(oldest) => {
                *oldest = elapsed;
                observer.oldest_updated(row, elapsed);
            }
            None => {
                result
                    .oldest_wait_secs
                    .insert(row.request_uri.clone(), elapsed);
                observer.oldest_updated(row, elapsed);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn row(index: u32, uri: &str, status: &str, waited_secs: i64) -> QueueRow {
        QueueRow::new(index.to_string(), uri, status, (NOW - waited_secs) * 1000)
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(BUCKET_LABELS[WaitHistogram::bucket_for(0)], "1");
        assert_eq!(BUCKET_LABELS[WaitHistogram::bucket_for(59)], "1");
        assert_eq!(BUCKET_LABELS[WaitHistogram::bucket_for(60)], "10");
        assert_eq!(BUCKET_LABELS[WaitHistogram::bucket_for(599)], "10");
        assert_eq!(BUCKET_LABELS[WaitHistogram::bucket_for(600)], "30");
        assert_eq!(BUCKET_LABELS[WaitHistogram::bucket_for(3_599)], "60");
        assert_eq!(BUCKET_LABELS[WaitHistogram::bucket_for(21_599)], "360");
        assert_eq!(BUCKET_LABELS[WaitHistogram::bucket_for(21_600)], "+Inf");
        assert_eq!(BUCKET_LABELS[WaitHistogram::bucket_for(i64::MAX / 120)], "+Inf");
    }

    #[test]
    fn test_histogram_always_reports_every_bucket() {
        let mut histogram = WaitHistogram::default();
        histogram.record(700);
        let labels: Vec<_> = histogram.iter().map(|(label, _)| label).collect();
        assert_eq!(labels, BUCKET_LABELS.to_vec());
        assert_eq!(histogram.count("30"), Some(1));
        assert_eq!(histogram.count("1"), Some(0));
        assert_eq!(histogram.count("7"), None);
        assert_eq!(histogram.total(), 1);
    }

    #[test]
    fn test_aggregate_example_snapshot() {
        let rows = vec![
            row(1, "a", "InProgress", 5),
            row(2, "a", "InProgress", 700),
            row(3, "b", "Completed", 10),
        ];
        let result = aggregate(&rows, NOW);

        assert_eq!(result.counts.get(&JobStatus::InProgress, "a"), 2);
        assert_eq!(result.counts.get(&JobStatus::Completed, "b"), 1);
        assert_eq!(result.counts.total(), 3);
        assert_eq!(result.oldest_wait_secs.get("a"), Some(&700));
        assert!(!result.oldest_wait_secs.contains_key("b"));

        let a = &result.histogram["a"];
        assert_eq!(a.count("1"), Some(1));
        assert_eq!(a.count("30"), Some(1));
        assert_eq!(a.count("10"), Some(0));
        assert_eq!(a.total(), 2);
        assert!(!result.histogram.contains_key("b"));
        assert!(result.halted.is_none());
    }

    #[test]
    fn test_aggregate_empty() {
        let result = aggregate(&[], NOW);
        assert_eq!(result.counts.total(), 0);
        // Known statuses are always reported
        let statuses: Vec<_> = result.counts.iter().map(|(s, _)| s.clone()).collect();
        assert_eq!(statuses, JobStatus::KNOWN.to_vec());
        assert!(result.oldest_wait_secs.is_empty());
        assert!(result.histogram.is_empty());
    }

    #[test]
    fn test_status_totals_add_up() {
        let rows = vec![
            row(1, "a", "InProgress", 5),
            row(2, "b", "Failed", 50),
            row(3, "a", "Completed", 500),
            row(4, "c", "Queued", 5_000),
            row(5, "b", "InProgress", 50_000),
            row(6, "a", "Failed", 1),
        ];
        let result = aggregate(&rows, NOW);
        let summed: u64 = result.counts.iter().map(|(_, c)| c.total).sum();
        assert_eq!(summed, result.counts.total());
        assert_eq!(result.counts.total(), rows.len() as u64);
        assert_eq!(result.counts.status_total(&JobStatus::Failed), 2);
        assert_eq!(result.unrecognized_total(), 1);
    }

    #[test]
    fn test_completed_and_failed_are_not_timed() {
        let rows = vec![
            row(1, "done", "Completed", 100_000),
            row(2, "broken", "Failed", 100_000),
        ];
        let result = aggregate(&rows, NOW);
        assert_eq!(result.counts.get(&JobStatus::Completed, "done"), 1);
        assert_eq!(result.counts.get(&JobStatus::Failed, "broken"), 1);
        assert!(result.oldest_wait_secs.is_empty());
        assert!(result.histogram.is_empty());
    }

    #[test]
    fn test_unknown_status_is_timed_like_in_progress() {
        let rows = vec![row(1, "a", "Queued", 90)];
        let result = aggregate(&rows, NOW);
        let queued = JobStatus::Unknown("Queued".to_string());
        assert_eq!(result.counts.get(&queued, "a"), 1);
        assert_eq!(result.oldest_wait_secs.get("a"), Some(&90));
        assert_eq!(result.histogram["a"].count("10"), Some(1));
    }

    #[test]
    fn test_timed_rows_match_waiting_statuses() {
        for status in ["Completed", "Failed", "InProgress", "Queued", ""] {
            let result = aggregate(&[row(1, "a", status, 90)], NOW);
            let waiting = JobStatus::from(status).is_waiting();
            assert_eq!(result.histogram.contains_key("a"), waiting, "status {status:?}");
            assert_eq!(result.oldest_wait_secs.contains_key("a"), waiting, "status {status:?}");
        }
    }

    #[test]
    fn test_oldest_is_max_and_never_decreases() {
        let waits = [30, 4_000, 10, 4_001, 0];
        let mut rows = Vec::new();
        let mut expected = 0;
        for (i, wait) in waits.iter().enumerate() {
            rows.push(row(i as u32, "a", "InProgress", *wait));
            expected = expected.max(*wait);
            let result = aggregate(&rows, NOW);
            assert_eq!(result.oldest_wait_secs["a"], expected);
        }
        let result = aggregate(&rows, NOW);
        assert_eq!(result.histogram["a"].total(), waits.len() as u64);
    }

    #[test]
    fn test_future_start_halts_remaining_rows() {
        let rows = vec![
            row(1, "a", "InProgress", 120),
            row(2, "a", "Failed", -5),
            row(3, "a", "InProgress", 30),
            row(4, "b", "Completed", 30),
        ];
        let result = aggregate(&rows, NOW);

        // The offending row is counted, nothing after it is
        assert_eq!(result.counts.total(), 2);
        assert_eq!(result.counts.get(&JobStatus::Failed, "a"), 1);
        assert_eq!(result.counts.get(&JobStatus::Completed, "b"), 0);
        assert_eq!(result.oldest_wait_secs["a"], 120);
        assert_eq!(result.histogram["a"].total(), 1);

        let halted = result.halted.expect("aggregation should halt");
        assert_eq!(halted.position, 1);
        assert_eq!(halted.row.index, "2");
        assert_eq!(halted.elapsed_secs, -5);
    }

    #[test]
    fn test_future_completed_row_does_not_halt() {
        let rows = vec![row(1, "a", "Completed", -100), row(2, "a", "InProgress", 1)];
        let result = aggregate(&rows, NOW);
        assert!(result.halted.is_none());
        assert_eq!(result.counts.total(), 2);
    }

    #[test]
    fn test_sub_second_future_start_is_not_negative() {
        // Start time 999ms after `now` floors to `now` itself
        let rows = vec![QueueRow::new("1", "a", "InProgress", NOW * 1000 + 999)];
        let result = aggregate(&rows, NOW);
        assert!(result.halted.is_none());
        assert_eq!(result.oldest_wait_secs["a"], 0);
    }

    #[derive(Default)]
    struct Recorder {
        rows: usize,
        completed: usize,
        failed: usize,
        waiting: usize,
        buckets: Vec<(&'static str, u64)>,
        oldest: Vec<i64>,
    }

    impl AggregationObserver for Recorder {
        fn row(&mut self, _row: &QueueRow) {
            self.rows += 1;
        }
        fn completed(&mut self, _row: &QueueRow) {
            self.completed += 1;
        }
        fn failed(&mut self, _row: &QueueRow, _elapsed_secs: i64) {
            self.failed += 1;
        }
        fn waiting(&mut self, _row: &QueueRow, _elapsed_secs: i64) {
            self.waiting += 1;
        }
        fn bucketed(&mut self, _row: &QueueRow, bucket: &'static str, count: u64) {
            self.buckets.push((bucket, count));
        }
        fn oldest_updated(&mut self, _row: &QueueRow, elapsed_secs: i64) {
            self.oldest.push(elapsed_secs);
        }
    }

    #[test]
    fn test_observer_sees_each_step() {
        let rows = vec![
            row(1, "a", "InProgress", 5),
            row(2, "a", "InProgress", 30),
            row(3, "a", "InProgress", 10),
            row(4, "a", "Failed", 10),
            row(5, "a", "Completed", 10),
        ];
        let mut recorder = Recorder::default();
        let result = aggregate_with(&rows, NOW, &mut recorder);

        assert_eq!(recorder.rows, 5);
        assert_eq!(recorder.completed, 1);
        assert_eq!(recorder.failed, 1);
        assert_eq!(recorder.waiting, 3);
        assert_eq!(recorder.buckets, vec![("1", 1), ("1", 2), ("1", 3)]);
        // 10 does not beat 30
        assert_eq!(recorder.oldest, vec![5, 30]);
        assert_eq!(result, aggregate(&rows, NOW));
    }
}
