//! Job lifecycle control — status lookup, cancellation, events, shutdown.

use std::sync::atomic::Ordering;

use tokio::sync::broadcast;

use super::{JobEntry, UploadManager};
use crate::error::{Error, Result};
use crate::types::{Event, JobStatus};

impl UploadManager {
    /// Look up the status of a user's admitted job.
    ///
    /// Returns `None` when the user has no job in flight, `Queued` while the
    /// job waits for a worker, and `Running` with a progress snapshot once a
    /// worker picked it up. Readable at any time; progress is taken from
    /// atomic fields, not from the worker.
    pub fn status(&self, user_id: &str) -> Option<JobStatus> {
        let jobs = self.lock_jobs();
        match jobs.get(user_id) {
            None => None,
            Some(JobEntry::Queued) => Some(JobStatus::Queued),
            Some(JobEntry::Running(handle)) => {
                Some(JobStatus::Running(handle.progress.snapshot()))
            }
        }
    }

    /// Request cancellation of the user's running job.
    ///
    /// Cancellation is cooperative: the worker observes the token at its
    /// safe points and the job settles in the canceled state shortly after.
    /// Only a running job can be canceled; a queued-but-not-yet-started
    /// submission reports [`Error::NoActiveJob`] (a deliberate limitation:
    /// admission-queue entries are not individually revocable).
    pub fn cancel(&self, user_id: &str) -> Result<()> {
        let jobs = self.lock_jobs();
        match jobs.get(user_id) {
            Some(JobEntry::Running(handle)) => {
                tracing::info!(user_id = %user_id, "cancel requested");
                handle.cancel.cancel();
                Ok(())
            }
            Some(JobEntry::Queued) | None => Err(Error::NoActiveJob),
        }
    }

    /// Subscribe to job events.
    ///
    /// Every admitted job produces `JobQueued`, `JobStarted`, then exactly
    /// one of `JobCompleted` / `JobFailed` / `JobCanceled`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Stop accepting new submissions and cancel every running job.
    ///
    /// Queued jobs still drain through the processor; their workers observe
    /// the already-cancelled state only if canceled individually, so callers
    /// that need a hard stop should also abort the processor task.
    pub fn shutdown(&self) {
        self.queue_state.accepting_new.store(false, Ordering::SeqCst);
        let jobs = self.lock_jobs();
        for entry in jobs.values() {
            if let JobEntry::Running(handle) = entry {
                handle.cancel.cancel();
            }
        }
        tracing::info!("shutdown initiated: new submissions refused");
    }
}
