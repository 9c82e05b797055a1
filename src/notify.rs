//! Notification sink — the interface through which terminal results and
//! progress reach the embedding application (a chat bot, typically).

use async_trait::async_trait;

use crate::types::{Progress, UploadedPart};

/// Receives progress updates and terminal job reports
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Called after every step advance of a running job
    async fn report_progress(&self, user_id: &str, progress: &Progress);

    /// Called once when a job completes, with the ordered
    /// `(download_url, volume_name)` pairs — one per volume, in volume order
    async fn report_result(
        &self,
        user_id: &str,
        parts: &[UploadedPart],
        filename: &str,
        total_size: u64,
    );

    /// Called once when a job fails or is canceled, with a human-readable reason
    async fn report_failure(&self, user_id: &str, reason: &str);
}

/// Sink that writes reports to the tracing log; the default when the
/// embedding application does not supply its own.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn report_progress(&self, user_id: &str, progress: &Progress) {
        tracing::debug!(
            user_id = %user_id,
            state = ?progress.state,
            step = progress.step,
            total_parts = progress.total_parts,
            total_size = progress.total_size,
            "job progress"
        );
    }

    async fn report_result(
        &self,
        user_id: &str,
        parts: &[UploadedPart],
        filename: &str,
        total_size: u64,
    ) {
        tracing::info!(
            user_id = %user_id,
            filename = %filename,
            total_size,
            parts = parts.len(),
            "job complete"
        );
    }

    async fn report_failure(&self, user_id: &str, reason: &str) {
        tracing::warn!(user_id = %user_id, reason = %reason, "job failed");
    }
}
