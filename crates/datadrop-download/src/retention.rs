//! Periodic retention sweep over download records.
//!
//! Records are never deleted. The sweep expires `pending`/`in_progress`
//! records whose window closed and interrupts `in_progress` records that have
//! not written progress for a while (their worker died with the process).

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use datadrop_core::{Clock, DownloadRecordRepository, RepositoryError};

/// Rows touched by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: u64,
    pub interrupted: u64,
}

pub struct RetentionSweeper {
    repo: Arc<dyn DownloadRecordRepository>,
    clock: Arc<dyn Clock>,
    stale_after: chrono::Duration,
}

impl RetentionSweeper {
    pub fn new(
        repo: Arc<dyn DownloadRecordRepository>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
    ) -> Self {
        let stale_after =
            chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            repo,
            clock,
            stale_after,
        }
    }

    /// Run one sweep.
    pub async fn sweep_once(&self) -> Result<SweepReport, RepositoryError> {
        let now = self.clock.now();
        let expired = self.repo.expire_due(now).await?;
        let stale_before = now
            .checked_sub_signed(self.stale_after)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        let interrupted = self.repo.interrupt_stale(stale_before, now).await?;

        let report = SweepReport {
            expired,
            interrupted,
        };
        if expired + interrupted > 0 {
            tracing::info!(target: "datadrop.retention", expired, interrupted, "retention sweep");
        } else {
            tracing::debug!(target: "datadrop.retention", "retention sweep found nothing");
        }
        Ok(report)
    }

    /// Sweep every `interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once().await {
                            tracing::error!(target: "datadrop.retention", error = %err, "retention sweep failed");
                        }
                    }
                }
            }
            tracing::debug!(target: "datadrop.retention", "retention sweeper stopped");
        })
    }
}
