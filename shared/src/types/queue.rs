//! Queue row definitions
//!
//! These types represent one record of the work-queue table as read by the
//! exporter on every poll cycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Epoch milliseconds, as stored in the queue table's `startTime` column
pub type EpochMillis = i64;

/// Status of a queued job.
///
/// The table stores free-form strings; three values are recognized and
/// anything else is kept verbatim in [`JobStatus::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Completed,
    Failed,
    InProgress,
    Unknown(String),
}

impl JobStatus {
    /// The statuses every aggregation reports, even when no row carries them.
    pub const KNOWN: [JobStatus; 3] = [JobStatus::Completed, JobStatus::Failed, JobStatus::InProgress];

    /// Label value used for this status in metrics and logs.
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::InProgress => "InProgress",
            JobStatus::Unknown(raw) => raw,
        }
    }

    /// Whether rows with this status count as active work whose wait time is tracked.
    ///
    /// Unrecognized statuses are treated like `InProgress`.
    pub fn is_waiting(&self) -> bool {
        !matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        match s {
            "Completed" => JobStatus::Completed,
            "Failed" => JobStatus::Failed,
            "InProgress" => JobStatus::InProgress,
            other => JobStatus::Unknown(other.to_string()),
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Completed" | "Failed" | "InProgress" => JobStatus::from(s.as_str()),
            _ => JobStatus::Unknown(s),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of the queue table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRow {
    /// Opaque row identifier, only used in log messages
    pub index: String,

    /// Request category the job belongs to
    #[serde(rename = "requestUri")]
    pub request_uri: String,

    /// Job status
    pub status: JobStatus,

    /// When the job started, in epoch milliseconds
    #[serde(rename = "startTime")]
    pub start_time_ms: EpochMillis,
}

impl QueueRow {
    pub fn new(
        index: impl Into<String>,
        request_uri: impl Into<String>,
        status: impl Into<JobStatus>,
        start_time_ms: EpochMillis,
    ) -> Self {
        Self {
            index: index.into(),
            request_uri: request_uri.into(),
            status: status.into(),
            start_time_ms,
        }
    }

    /// Seconds this row has been waiting at `now_secs`.
    ///
    /// The start time is floored to whole seconds first. Negative when the
    /// start time lies in the future.
    pub fn elapsed_secs(&self, now_secs: i64) -> i64 {
        now_secs - self.start_time_ms.div_euclid(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!(JobStatus::from("Completed"), JobStatus::Completed);
        assert_eq!(JobStatus::from("Failed"), JobStatus::Failed);
        assert_eq!(JobStatus::from("InProgress"), JobStatus::InProgress);
        assert_eq!(
            JobStatus::from("Queued"),
            JobStatus::Unknown("Queued".to_string())
        );
        // Matching is case sensitive
        assert_eq!(
            JobStatus::from("completed".to_string()),
            JobStatus::Unknown("completed".to_string())
        );
    }

    #[test]
    fn test_status_label_round_trips_raw_text() {
        let status = JobStatus::from("Paused".to_string());
        assert_eq!(status.as_str(), "Paused");
        assert_eq!(String::from(status), "Paused");
        assert_eq!(JobStatus::InProgress.to_string(), "InProgress");
    }

    #[test]
    fn test_waiting_statuses() {
        assert!(JobStatus::InProgress.is_waiting());
        assert!(JobStatus::Unknown("Queued".to_string()).is_waiting());
        assert!(!JobStatus::Completed.is_waiting());
        assert!(!JobStatus::Failed.is_waiting());
    }

    #[test]
    fn test_elapsed_floors_start_time() {
        let row = QueueRow::new("1", "/a", "InProgress", 1_000_999);
        assert_eq!(row.elapsed_secs(1_005), 5);

        let future = QueueRow::new("2", "/a", "InProgress", 2_000_000);
        assert_eq!(future.elapsed_secs(1_999), -1);

        let negative = QueueRow::new("3", "/a", "InProgress", -1);
        assert_eq!(negative.elapsed_secs(0), 1);
    }

    #[test]
    fn test_row_deserializes_from_table_json() {
        let row: QueueRow = serde_json::from_str(
            r#"{"index":"7","requestUri":"/api/run","status":"Queued","startTime":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(row.request_uri, "/api/run");
        assert_eq!(row.status, JobStatus::Unknown("Queued".to_string()));
        assert_eq!(row.start_time_ms, 1_700_000_000_000);
    }
}
