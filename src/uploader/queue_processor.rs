//! Queue processor — pulls admitted jobs off the bounded queue and runs them
//! on the worker pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use super::{JobEntry, JobHandle, JobProgress, UploadManager};
use crate::types::Event;

/// Releases a user's admission slot when the job task ends, on every exit
/// path including a panic inside the worker.
pub(crate) struct AdmissionGuard {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    user_id: String,
}

impl AdmissionGuard {
    pub(crate) fn new(jobs: Arc<Mutex<HashMap<String, JobEntry>>>, user_id: String) -> Self {
        Self { jobs, user_id }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        let mut jobs = self
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.remove(&self.user_id);
    }
}

impl UploadManager {
    /// Start the queue processor task.
    ///
    /// The spawned task continuously:
    /// 1. Receives the next admitted job from the bounded queue
    /// 2. Acquires a permit from the worker semaphore (waits when all
    ///    workers are busy)
    /// 3. Flips the user's registry entry from queued to running, with a
    ///    fresh cancellation token and progress cell
    /// 4. Spawns the job task, which owns the permit and the admission slot
    ///    for the rest of the job's life
    ///
    /// Calling this more than once is a no-op: the queue receiver can only
    /// be taken by the first caller.
    pub fn start_queue_processor(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let receiver = manager.queue_state.job_rx.lock().await.take();
            let Some(mut receiver) = receiver else {
                tracing::warn!("queue processor already running, not starting another");
                return;
            };

            while let Some(job) = receiver.recv().await {
                let permit = match manager
                    .queue_state
                    .worker_limit
                    .clone()
                    .acquire_owned()
                    .await
                {
                    Ok(permit) => permit,
                    Err(_) => break, // semaphore closed, shutting down
                };

                let cancel = CancellationToken::new();
                let progress = Arc::new(JobProgress::new());
                {
                    let mut jobs = manager.lock_jobs();
                    jobs.insert(
                        job.user_id.clone(),
                        JobEntry::Running(JobHandle {
                            progress: Arc::clone(&progress),
                            cancel: cancel.clone(),
                        }),
                    );
                }

                tracing::info!(user_id = %job.user_id, url = %job.url, "job starting");
                let _ = manager.event_tx.send(Event::JobStarted {
                    user_id: job.user_id.clone(),
                });

                let worker = manager.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let _guard = AdmissionGuard::new(
                        Arc::clone(&worker.queue_state.jobs),
                        job.user_id.clone(),
                    );
                    super::job_task::run_job(worker, job, progress, cancel).await;
                });
            }

            tracing::info!("queue processor stopped");
        })
    }
}
