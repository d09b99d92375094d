//! Point-in-time progress view of a download.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{DownloadRecord, DownloadStatus, percentage};

/// What the progress endpoint reports for a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub download_id: Uuid,
    pub status: DownloadStatus,
    pub progress_percentage: f64,
    pub bytes_transferred: u64,
    pub file_size_bytes: Option<u64>,
    pub estimated_seconds_remaining: Option<f64>,
    pub transfer_rate_mbps: Option<f64>,
    pub is_resumable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_endpoint: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub attempt_count: u32,
}

impl ProgressSnapshot {
    /// Build a snapshot from a record, preferring `live_bytes` from an active
    /// worker over the last persisted offset.
    #[must_use]
    pub fn from_record(
        record: &DownloadRecord,
        live_bytes: Option<u64>,
        retry_endpoint: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let bytes = live_bytes
            .filter(|_| record.status == DownloadStatus::InProgress)
            .map_or(record.bytes_transferred, |live| {
                live.max(record.bytes_transferred)
            });
        let pct = match (record.status, record.file_size_bytes) {
            (DownloadStatus::Completed, _) => 100.0,
            (_, Some(total)) => percentage(bytes, total),
            (_, None) => record.progress_percentage,
        };
        // The elapsed time covers the current attempt only, so the ratio must
        // too: bytes served before `resume_offset` took no time in it.
        let eta = if record.status == DownloadStatus::InProgress {
            let attempt_pct = record.file_size_bytes.map_or(pct, |total| {
                percentage(
                    bytes.saturating_sub(record.resume_offset),
                    total.saturating_sub(record.resume_offset),
                )
            });
            estimate_remaining_seconds(attempt_pct, record.attempt_elapsed(now))
        } else {
            None
        };

        Self {
            download_id: record.id,
            status: record.status,
            progress_percentage: pct,
            bytes_transferred: bytes,
            file_size_bytes: record.file_size_bytes,
            estimated_seconds_remaining: eta,
            transfer_rate_mbps: record.transfer_rate_mbps,
            is_resumable: record.is_resumable(),
            error_code: record.error_code.clone(),
            error_message: record.error_message.clone(),
            retry_endpoint: record
                .status
                .is_retryable()
                .then_some(retry_endpoint)
                .flatten(),
            expires_at: record.expires_at,
            attempt_count: record.attempt_count,
        }
    }
}

/// `elapsed / ratio - elapsed`, defined only for `0 < percentage < 100`.
#[must_use]
pub fn estimate_remaining_seconds(percentage: f64, elapsed_seconds: f64) -> Option<f64> {
    if !(percentage > 0.0 && percentage < 100.0) || elapsed_seconds <= 0.0 {
        return None;
    }
    let ratio = percentage / 100.0;
    Some(elapsed_seconds.mul_add(1.0 / ratio, -elapsed_seconds).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DatasetId, FileFormat};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn eta_is_guarded_at_the_edges() {
        assert_eq!(estimate_remaining_seconds(0.0, 10.0), None);
        assert_eq!(estimate_remaining_seconds(100.0, 10.0), None);
        assert_eq!(estimate_remaining_seconds(50.0, 0.0), None);
        let eta = estimate_remaining_seconds(25.0, 10.0).unwrap();
        assert!((eta - 30.0).abs() < 1e-9);
    }

    #[test]
    fn live_bytes_override_persisted_progress() {
        let mut record = DownloadRecord::new(
            Uuid::new_v4(),
            DatasetId::new("ds"),
            FileFormat::Csv,
            t0() + Duration::hours(1),
            t0(),
        );
        record.begin(0, 1_000, t0()).unwrap();
        record.advance(100, t0()).unwrap();

        let snap = ProgressSnapshot::from_record(
            &record,
            Some(500),
            Some("/retry".into()),
            t0() + Duration::seconds(5),
        );
        assert_eq!(snap.bytes_transferred, 500);
        assert!((snap.progress_percentage - 50.0).abs() < 1e-9);
        assert!((snap.estimated_seconds_remaining.unwrap() - 5.0).abs() < 1e-9);
        assert!(snap.retry_endpoint.is_none());
        assert!(!snap.is_resumable);
    }

    #[test]
    fn resumed_transfer_estimates_from_the_current_attempt() {
        let mut record = DownloadRecord::new(
            Uuid::new_v4(),
            DatasetId::new("ds"),
            FileFormat::Csv,
            t0() + Duration::hours(1),
            t0(),
        );
        record.begin(0, 1_000, t0()).unwrap();
        record.interrupt(900, "reset", t0()).unwrap();
        record.reopen(Duration::hours(1), t0()).unwrap();
        record.begin(900, 1_000, t0()).unwrap();
        record.advance(910, t0() + Duration::seconds(10)).unwrap();

        // 10 bytes in 10 s leaves 90 bytes, about 90 s.
        let snap = ProgressSnapshot::from_record(&record, None, None, t0() + Duration::seconds(10));
        assert!((snap.progress_percentage - 91.0).abs() < 1e-9);
        let eta = snap.estimated_seconds_remaining.unwrap();
        assert!((eta - 90.0).abs() < 1e-6, "eta was {eta}");
    }

    #[test]
    fn interrupted_snapshot_offers_retry_and_resume() {
        let mut record = DownloadRecord::new(
            Uuid::new_v4(),
            DatasetId::new("ds"),
            FileFormat::Csv,
            t0() + Duration::hours(1),
            t0(),
        );
        record.begin(0, 1_000, t0()).unwrap();
        record.interrupt(400, "reset", t0()).unwrap();

        let snap = ProgressSnapshot::from_record(&record, None, Some("/retry".into()), t0());
        assert!(snap.is_resumable);
        assert_eq!(snap.retry_endpoint.as_deref(), Some("/retry"));
        assert_eq!(snap.estimated_seconds_remaining, None);
        assert_eq!(snap.error_code.as_deref(), Some("NETWORK_INTERRUPTED"));
    }
}
