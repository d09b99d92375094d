//! Transfer worker.
//!
//! One worker task runs per active transfer. It pulls chunks from the artifact
//! store, pushes them into a bounded channel drained by the client, publishes
//! live progress, and writes throttled progress plus the final outcome back to
//! the download record.
//!
//! - Worker receives a `TransferJob` (value type) and `WorkerDeps` (cloned Arcs)
//! - Every record write is a compare-and-set on `in_progress` and the record
//!   revision; losing one means the record was changed elsewhere (expired,
//!   swept, reopened for a later attempt) and the worker stops
//! - Cancellation is handled via `tokio::select!` around every await

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use datadrop_core::{
    ArtifactChunks, ArtifactError, ByteRange, Clock, DownloadRecord, DownloadRecordRepository,
    DownloadStatus, TransientKind,
};

use crate::progress::{LiveProgress, ProgressThrottle};

/// Item type of the client-facing body channel.
pub type BodyChunk = Result<Bytes, io::Error>;

/// Dependencies for the transfer worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub repo: Arc<dyn DownloadRecordRepository>,
    pub clock: Arc<dyn Clock>,
    /// A send stalled longer than this counts as a disconnect.
    pub idle_timeout: Duration,
    /// Minimum spacing between progress writes.
    pub persist_interval: Duration,
}

/// A transfer to run, with the record already moved to `in_progress`.
pub struct TransferJob {
    pub record: DownloadRecord,
    pub range: ByteRange,
    pub chunks: ArtifactChunks,
    pub tx: mpsc::Sender<BodyChunk>,
    pub live: LiveProgress,
    pub cancel: CancellationToken,
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every byte was handed to the client.
    Completed { bytes_served: u64 },
    /// Transient failure; the record keeps `offset` for resumption.
    Interrupted { offset: u64, kind: TransientKind },
    /// Non-transient failure recorded with `code`.
    Failed { code: &'static str },
    /// The record left `in_progress` under the worker.
    Superseded,
}

/// Run a transfer job to completion.
pub async fn run_job(job: TransferJob, deps: &WorkerDeps) -> TransferOutcome {
    let TransferJob {
        mut record,
        range,
        mut chunks,
        tx,
        live,
        cancel,
    } = job;
    let token_id = record.token_id;
    let total = range.total;
    let mut offset = range.start;
    let mut throttle = ProgressThrottle::new(deps.persist_interval);

    let failure = loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            next = chunks.next() => Some(next),
        };
        let Some(next) = next else {
            break Some(shutting_down());
        };

        let chunk = match next {
            None if offset < total => {
                break Some(ArtifactError::corrupted(format!(
                    "artifact ended at byte {offset}, expected {total}"
                )));
            }
            None => break None,
            Some(Err(err)) => break Some(err),
            Some(Ok(chunk)) => chunk,
        };

        let reached = offset + chunk.len() as u64;
        if reached > total {
            break Some(ArtifactError::corrupted(format!(
                "artifact is larger than its recorded size of {total} bytes"
            )));
        }
        if let Err(err) = send_chunk(&tx, chunk, deps.idle_timeout, &cancel).await {
            break Some(err);
        }
        offset = reached;
        live.update(offset);

        if offset < total && throttle.should_emit() {
            match persist_progress(&mut record, offset, deps).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(
                        target: "datadrop.transfer",
                        token_id = %token_id,
                        bytes = offset,
                        "record changed during transfer, stopping"
                    );
                    let _ = tx.try_send(Err(io::Error::other("download is no longer active")));
                    return TransferOutcome::Superseded;
                }
                Err(message) => {
                    tracing::warn!(target: "datadrop.transfer", token_id = %token_id, %message, "progress write failed");
                    // try again on the next chunk
                    throttle.reset();
                }
            }
        }
    };

    let outcome = settle(&mut record, range, offset, failure.as_ref(), deps).await;

    // The body must not end cleanly after a failure, or the client would keep
    // a truncated file. A disconnected client has nobody left to tell.
    if let Some(err) = failure {
        let disconnected = matches!(
            err,
            ArtifactError::Transient {
                kind: TransientKind::ClientDisconnected,
                ..
            }
        );
        if !disconnected {
            let item = Err(io::Error::other(err.to_string()));
            if err.is_transient() {
                let _ = tx.try_send(item);
            } else {
                let _ = tokio::time::timeout(deps.idle_timeout, tx.send(item)).await;
            }
        }
    }
    outcome
}

fn shutting_down() -> ArtifactError {
    ArtifactError::transient(TransientKind::Cancelled, "server shutting down")
}

async fn send_chunk(
    tx: &mpsc::Sender<BodyChunk>,
    chunk: Bytes,
    idle_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), ArtifactError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(shutting_down()),
        sent = tokio::time::timeout(idle_timeout, tx.send(Ok(chunk))) => match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ArtifactError::transient(
                TransientKind::ClientDisconnected,
                "client closed the connection",
            )),
            Err(_) => Err(ArtifactError::transient(
                TransientKind::TimedOut,
                format!("client stalled for more than {}s", idle_timeout.as_secs()),
            )),
        },
    }
}

async fn persist_progress(
    record: &mut DownloadRecord,
    offset: u64,
    deps: &WorkerDeps,
) -> Result<bool, String> {
    record
        .advance(offset, deps.clock.now())
        .map_err(|e| e.to_string())?;
    deps.repo
        .save_transition(record, DownloadStatus::InProgress)
        .await
        .map_err(|e| e.to_string())
}

/// Apply the final transition and persist it.
async fn settle(
    record: &mut DownloadRecord,
    range: ByteRange,
    offset: u64,
    failure: Option<&ArtifactError>,
    deps: &WorkerDeps,
) -> TransferOutcome {
    let now = deps.clock.now();
    let token_id = record.token_id;

    let (transition, outcome) = match failure {
        None => (
            record
                .advance(range.total, now)
                .and_then(|()| record.complete(now)),
            TransferOutcome::Completed {
                bytes_served: range.len(),
            },
        ),
        Some(ArtifactError::Transient { kind, message }) => (
            record.interrupt(offset, format!("{kind}: {message}"), now),
            TransferOutcome::Interrupted {
                offset,
                kind: *kind,
            },
        ),
        Some(err) => {
            let error = err.clone().into_download_error(offset);
            (
                record.fail(error.code(), error.to_string(), now),
                TransferOutcome::Failed { code: error.code() },
            )
        }
    };
    if let Err(err) = transition {
        tracing::error!(target: "datadrop.transfer", token_id = %token_id, error = %err, "illegal final transition");
        return TransferOutcome::Failed {
            code: "DOWNLOAD_FAILED",
        };
    }

    match deps
        .repo
        .save_transition(record, DownloadStatus::InProgress)
        .await
    {
        Ok(true) => {
            match &outcome {
                TransferOutcome::Completed { bytes_served } => tracing::info!(
                    target: "datadrop.transfer",
                    token_id = %token_id,
                    bytes = bytes_served,
                    duration_seconds = record.duration_seconds,
                    rate_mbps = record.transfer_rate_mbps,
                    "download completed"
                ),
                TransferOutcome::Interrupted { offset, kind } => tracing::warn!(
                    target: "datadrop.transfer",
                    token_id = %token_id,
                    bytes = offset,
                    %kind,
                    "download interrupted"
                ),
                TransferOutcome::Failed { code } => tracing::error!(
                    target: "datadrop.transfer",
                    token_id = %token_id,
                    bytes = offset,
                    code,
                    message = record.error_message.as_deref().unwrap_or_default(),
                    "download failed"
                ),
                TransferOutcome::Superseded => {}
            }
            outcome
        }
        Ok(false) => {
            tracing::info!(target: "datadrop.transfer", token_id = %token_id, "record changed before the transfer settled");
            TransferOutcome::Superseded
        }
        Err(err) => {
            tracing::error!(target: "datadrop.transfer", token_id = %token_id, error = %err, "failed to persist transfer outcome");
            outcome
        }
    }
}
