//! Upload manager — admission control, bounded concurrent execution, and the
//! per-user job registry.
//!
//! The `UploadManager` struct and its methods are organized by domain:
//! - [`queue_processor`] - Dispatcher loop and worker-pool execution
//! - [`job_task`] - The per-job pipeline state machine
//! - [`control`] - Status, cancellation, events, shutdown
//! - [`register`] - Account registration flow

mod control;
mod job_task;
mod queue_processor;
mod register;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::accounts::{Account, AccountStore, SqliteAccountStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::notify::{LogNotifier, NotificationSink};
use crate::protocol::{ClientFactory, ToDusClientFactory};
use crate::types::{Event, JobState, Progress};

/// Initial `step` value, in half-step units (-2.0 as documented on
/// [`Progress`])
const INITIAL_STEP_HALVES: i64 = -4;

/// Collaborators injected into the manager
///
/// [`UploadManager::new`] wires the production set; tests and embedders with
/// their own storage or notification channels use
/// [`UploadManager::with_services`].
pub struct Services {
    /// Account record store
    pub accounts: Arc<dyn AccountStore>,
    /// URL-content fetch collaborator
    pub fetcher: Arc<dyn Fetcher>,
    /// Progress and terminal-report sink
    pub notifier: Arc<dyn NotificationSink>,
    /// Per-job protocol client factory
    pub clients: Arc<dyn ClientFactory>,
}

/// Shared, atomically-updated progress of one job
///
/// Workers write, status readers snapshot; no locking. `step` is stored in
/// half-step units and advanced with `fetch_max` so it never decreases, even
/// across a volume retry that re-runs login.
pub(crate) struct JobProgress {
    state: AtomicU8,
    step_halves: AtomicI64,
    total_parts: AtomicU32,
    total_size: AtomicU64,
}

impl JobProgress {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(JobState::Fetching.to_u8()),
            step_halves: AtomicI64::new(INITIAL_STEP_HALVES),
            total_parts: AtomicU32::new(0),
            total_size: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: JobState) {
        self.state.store(state.to_u8(), Ordering::Relaxed);
    }

    /// Advance `step` to the given half-step count; never moves backwards
    pub(crate) fn advance_to(&self, halves: i64) {
        self.step_halves.fetch_max(halves, Ordering::Relaxed);
    }

    /// Record the volume count; immutable once set
    pub(crate) fn set_total_parts(&self, parts: u32) {
        let _ = self
            .total_parts
            .compare_exchange(0, parts, Ordering::Relaxed, Ordering::Relaxed);
    }

    pub(crate) fn set_total_size(&self, size: u64) {
        self.total_size.store(size, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Progress {
        Progress {
            state: JobState::from_u8(self.state.load(Ordering::Relaxed)),
            step: self.step_halves.load(Ordering::Relaxed) as f64 / 2.0,
            total_parts: self.total_parts.load(Ordering::Relaxed),
            total_size: self.total_size.load(Ordering::Relaxed),
        }
    }
}

/// Registry handle for one running job
pub(crate) struct JobHandle {
    pub(crate) progress: Arc<JobProgress>,
    pub(crate) cancel: CancellationToken,
}

/// What the registry knows about a user's admitted job
pub(crate) enum JobEntry {
    /// Admitted, waiting for a free worker
    Queued,
    /// Executing on a worker
    Running(JobHandle),
}

/// A job waiting in the admission queue
pub(crate) struct QueuedJob {
    pub(crate) user_id: String,
    pub(crate) url: String,
    pub(crate) account: Account,
}

/// Admission and execution state shared across manager clones
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Per-user registry: one admitted job per user, held until terminal
    pub(crate) jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    /// Bounded admission queue sender
    pub(crate) job_tx: mpsc::Sender<QueuedJob>,
    /// Receiver end, taken by the queue processor on start
    pub(crate) job_rx: Arc<tokio::sync::Mutex<Option<mpsc::Receiver<QueuedJob>>>>,
    /// Semaphore bounding concurrent job execution
    pub(crate) worker_limit: Arc<Semaphore>,
    /// Cleared during shutdown so new submissions are refused
    pub(crate) accepting_new: Arc<AtomicBool>,
}

/// Main upload manager instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct UploadManager {
    pub(crate) config: Arc<Config>,
    pub(crate) accounts: Arc<dyn AccountStore>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) clients: Arc<dyn ClientFactory>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) queue_state: QueueState,
}

impl UploadManager {
    /// Create a manager with the production collaborators: a SQLite account
    /// store at the configured path, the HTTP fetcher, the tracing-log
    /// notifier, and the live protocol client factory.
    pub async fn new(config: Config) -> Result<Self> {
        let accounts: Arc<dyn AccountStore> =
            Arc::new(SqliteAccountStore::open(&config.persistence.accounts_path).await?);
        let services = Services {
            accounts,
            fetcher: Arc::new(HttpFetcher::new(&config.transfer)),
            notifier: Arc::new(LogNotifier),
            clients: Arc::new(ToDusClientFactory::new(config.protocol.clone())),
        };
        Ok(Self::with_services(config, services))
    }

    /// Create a manager with injected collaborators
    pub fn with_services(config: Config, services: Services) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.scheduler.queue_capacity);
        let (event_tx, _rx) = broadcast::channel(config.scheduler.event_capacity);
        let queue_state = QueueState {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            job_tx,
            job_rx: Arc::new(tokio::sync::Mutex::new(Some(job_rx))),
            worker_limit: Arc::new(Semaphore::new(config.scheduler.max_concurrent_jobs)),
            accepting_new: Arc::new(AtomicBool::new(true)),
        };
        Self {
            config: Arc::new(config),
            accounts: services.accounts,
            fetcher: services.fetcher,
            notifier: services.notifier,
            clients: services.clients,
            event_tx,
            queue_state,
        }
    }

    /// Submit a job for `user_id` to fetch `url` and upload it.
    ///
    /// Admission rules, checked in order:
    /// - shutdown in progress → [`Error::ShuttingDown`]
    /// - no verified account → [`Error::NotRegistered`]
    /// - the user already has an admitted job (queued or running, regardless
    ///   of its current state) → [`Error::AlreadyQueued`]
    /// - the admission queue is at capacity → [`Error::QueueFull`]
    ///
    /// On acceptance the job holds the user's admission slot until it reaches
    /// a terminal state.
    pub async fn submit(&self, user_id: &str, url: &str) -> Result<()> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let account = self
            .accounts
            .get(user_id)
            .await?
            .filter(Account::is_verified)
            .ok_or(Error::NotRegistered)?;

        {
            let mut jobs = self.lock_jobs();
            if jobs.contains_key(user_id) {
                return Err(Error::AlreadyQueued);
            }
            jobs.insert(user_id.to_string(), JobEntry::Queued);
        }

        let queued = QueuedJob {
            user_id: user_id.to_string(),
            url: url.to_string(),
            account,
        };
        match self.queue_state.job_tx.try_send(queued) {
            Ok(()) => {
                tracing::info!(user_id = %user_id, url = %url, "job admitted");
                let _ = self.event_tx.send(Event::JobQueued {
                    user_id: user_id.to_string(),
                    url: url.to_string(),
                });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.lock_jobs().remove(user_id);
                Err(Error::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.lock_jobs().remove(user_id);
                Err(Error::ShuttingDown)
            }
        }
    }

    /// Lock the job registry, recovering the map from a poisoned lock
    /// (entries must still be releasable after a worker panic)
    pub(crate) fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.queue_state
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
