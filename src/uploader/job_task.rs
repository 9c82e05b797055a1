//! Per-job pipeline execution: FETCHING → SPLITTING → UPLOADING(i of N) →
//! DONE, with FAILED and CANCELED absorbing states.
//!
//! Cancellation is cooperative: checked before splitting, before each
//! volume, and inside the protocol client around every network call. Each
//! volume gets exactly one retry after a fixed backoff; an abort signal
//! short-circuits all retry logic.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{JobProgress, QueuedJob, UploadManager};
use crate::chunker;
use crate::error::{Error, FailureClass, Result};
use crate::protocol::StorageClient;
use crate::types::{Event, JobState, UploadedPart, Volume};

/// What a completed job hands to the notification sink
struct JobOutput {
    parts: Vec<UploadedPart>,
    filename: String,
    total_size: u64,
}

/// Execute one job to a terminal state and report it.
///
/// The caller holds the worker permit and the admission guard; this function
/// only has to run the pipeline and report the outcome.
pub(crate) async fn run_job(
    manager: UploadManager,
    job: QueuedJob,
    progress: Arc<JobProgress>,
    cancel: CancellationToken,
) {
    // Each job owns its own client; its abort flag trips with the job's
    // cancellation token.
    let client = manager.clients.create(cancel.child_token());

    match execute(&manager, &job, client.as_ref(), &progress, &cancel).await {
        Ok(output) => {
            progress.set_state(JobState::Done);
            tracing::info!(
                user_id = %job.user_id,
                filename = %output.filename,
                parts = output.parts.len(),
                "job complete"
            );
            manager
                .notifier
                .report_result(
                    &job.user_id,
                    &output.parts,
                    &output.filename,
                    output.total_size,
                )
                .await;
            let _ = manager.event_tx.send(Event::JobCompleted {
                user_id: job.user_id.clone(),
                parts: output.parts,
            });
        }
        Err(err) if err.is_abort() => {
            progress.set_state(JobState::Canceled);
            tracing::info!(user_id = %job.user_id, "job canceled");
            manager
                .notifier
                .report_failure(&job.user_id, "upload canceled")
                .await;
            let _ = manager.event_tx.send(Event::JobCanceled {
                user_id: job.user_id.clone(),
            });
        }
        Err(err) => {
            progress.set_state(JobState::Failed);
            tracing::warn!(user_id = %job.user_id, error = %err, "job failed");
            manager
                .notifier
                .report_failure(&job.user_id, &err.to_string())
                .await;
            let _ = manager.event_tx.send(Event::JobFailed {
                user_id: job.user_id.clone(),
                reason: err.to_string(),
            });
        }
    }
}

/// Drive the state machine; any `Err` is mapped to FAILED or CANCELED by the
/// caller.
async fn execute(
    manager: &UploadManager,
    job: &QueuedJob,
    client: &dyn StorageClient,
    progress: &JobProgress,
    cancel: &CancellationToken,
) -> Result<JobOutput> {
    let config = &manager.config;

    // FETCHING
    progress.set_state(JobState::Fetching);
    let privileged = config
        .transfer
        .privileged_users
        .iter()
        .any(|user| user == &job.user_id);
    let fetched = manager
        .fetcher
        .fetch(&job.url, config.transfer.max_fetch_size, privileged)
        .await?;
    progress.set_total_size(fetched.size);
    progress.advance_to(-2);
    manager
        .notifier
        .report_progress(&job.user_id, &progress.snapshot())
        .await;

    if cancel.is_cancelled() {
        client.abort();
        return Err(Error::Abort);
    }

    // SPLITTING
    progress.set_state(JobState::Splitting);
    let filename = fetched.filename.clone();
    let total_size = fetched.size;
    let volumes = chunker::split_volumes(&filename, fetched.data, config.transfer.volume_size)?;
    progress.set_total_parts(volumes.len() as u32);
    progress.advance_to(0);
    manager
        .notifier
        .report_progress(&job.user_id, &progress.snapshot())
        .await;

    // UPLOADING(i of N)
    progress.set_state(JobState::Uploading);
    let total = volumes.len();
    let mut parts = Vec::with_capacity(total);
    for volume in volumes {
        if cancel.is_cancelled() {
            client.abort();
            return Err(Error::Abort);
        }

        let index = volume.index;
        let size = volume.bytes.len() as u64;
        // step after splitting is 0; volume i spans half-steps 2i-1 and 2i
        let base_halves = (index as i64 - 1) * 2;
        tracing::debug!(user_id = %job.user_id, volume = index, total, "uploading volume");

        let download_url =
            match upload_volume(manager, job, client, progress, &volume, base_halves).await {
                Ok(url) => url,
                Err(err) => match err.classify() {
                    FailureClass::Abort => return Err(Error::Abort),
                    FailureClass::Fatal => return Err(err),
                    FailureClass::Retryable => {
                        tracing::warn!(
                            user_id = %job.user_id,
                            volume = index,
                            error = %err,
                            "volume upload failed, retrying once"
                        );
                        tokio::time::sleep(config.scheduler.retry_delay).await;
                        if cancel.is_cancelled() {
                            client.abort();
                            return Err(Error::Abort);
                        }
                        match upload_volume(manager, job, client, progress, &volume, base_halves)
                            .await
                        {
                            Ok(url) => url,
                            Err(retry_err) if retry_err.is_abort() => return Err(Error::Abort),
                            Err(retry_err) => {
                                return Err(Error::UploadPart {
                                    index,
                                    size,
                                    source: Box::new(retry_err),
                                });
                            }
                        }
                    }
                },
            };

        parts.push(UploadedPart {
            download_url,
            name: volume.name,
        });
        manager
            .notifier
            .report_progress(&job.user_id, &progress.snapshot())
            .await;
    }

    Ok(JobOutput {
        parts,
        filename,
        total_size,
    })
}

/// One login + upload attempt for a volume.
///
/// Tokens are not assumed reusable across volumes, so every attempt logs in
/// afresh. Step advances are absolute (`advance_to`), so a retry that
/// re-runs login cannot move progress backwards or double-count.
async fn upload_volume(
    manager: &UploadManager,
    job: &QueuedJob,
    client: &dyn StorageClient,
    progress: &JobProgress,
    volume: &Volume,
    base_halves: i64,
) -> Result<String> {
    let password = job.account.password.as_deref().ok_or(Error::NotRegistered)?;
    let token = client.login(&job.account.phone, password).await?;
    progress.advance_to(base_halves + 1);
    manager
        .notifier
        .report_progress(&job.user_id, &progress.snapshot())
        .await;

    let url = client.upload_file(&token, &volume.bytes).await?;
    progress.advance_to(base_halves + 2);
    Ok(url)
}
