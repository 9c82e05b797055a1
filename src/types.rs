//! Core types for todus-s3

use serde::{Deserialize, Serialize};

/// Pipeline state of a job
///
/// `Done`, `Failed` and `Canceled` are absorbing; the two failure states are
/// reachable from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Acquiring the payload from the fetch collaborator
    Fetching,
    /// Splitting the payload into container volumes
    Splitting,
    /// Uploading volumes in index order
    Uploading,
    /// All volumes uploaded, result emitted
    Done,
    /// The job failed with an error
    Failed,
    /// The job was canceled by the user
    Canceled,
}

impl JobState {
    /// Convert an integer state code to a JobState (for the atomic state cell)
    pub fn from_u8(state: u8) -> Self {
        match state {
            0 => JobState::Fetching,
            1 => JobState::Splitting,
            2 => JobState::Uploading,
            3 => JobState::Done,
            4 => JobState::Failed,
            _ => JobState::Canceled,
        }
    }

    /// Convert a JobState to its integer state code
    pub fn to_u8(self) -> u8 {
        match self {
            JobState::Fetching => 0,
            JobState::Splitting => 1,
            JobState::Uploading => 2,
            JobState::Done => 3,
            JobState::Failed => 4,
            JobState::Canceled => 5,
        }
    }

    /// Returns true for the absorbing states (`Done`, `Failed`, `Canceled`)
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Canceled)
    }
}

/// Point-in-time progress snapshot of a running job
///
/// `step` starts at -2.0 and advances by 1.0 at fetch-complete, 1.0 at
/// chunk-complete, and 0.5 after each per-volume login and upload. A
/// fractional value therefore means "halfway through a volume" (logged in,
/// upload in flight).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Current pipeline state
    pub state: JobState,
    /// Monotonic progress counter (see type docs)
    pub step: f64,
    /// Number of volumes the payload was split into (0 until chunking completes)
    pub total_parts: u32,
    /// Size of the fetched payload in bytes (0 until the fetch completes)
    pub total_size: u64,
}

/// Scheduler-level status of a user's job
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JobStatus {
    /// Admitted but still waiting for a free worker
    Queued,
    /// Executing on a worker
    Running(Progress),
}

/// One bounded-size fragment of the split container
///
/// Volumes are produced in index order with names that sort lexicographically
/// into that same order; consumers zip volume order against upload-result
/// order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    /// 1-based position within the split
    pub index: usize,
    /// Volume file name (fixed-width numeric suffix)
    pub name: String,
    /// The volume's bytes
    pub bytes: Vec<u8>,
}

/// One uploaded volume: its download link paired with the volume name
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    /// Download URL returned by the reservation exchange
    pub download_url: String,
    /// Name of the volume this link belongs to
    pub name: String,
}

/// Payload produced by the fetch collaborator
#[derive(Clone, Debug)]
pub struct FetchedFile {
    /// Inferred file name (content-disposition, URL path, or content-type)
    pub filename: String,
    /// The payload bytes
    pub data: Vec<u8>,
    /// Payload size in bytes
    pub size: u64,
}

/// Events broadcast by the upload manager
///
/// Consumers subscribe via [`crate::UploadManager::subscribe`]; events mirror
/// the notification-sink callbacks as typed values.
#[derive(Clone, Debug)]
pub enum Event {
    /// A job was admitted to the queue
    JobQueued {
        /// The submitting user
        user_id: String,
        /// The requested URL
        url: String,
    },
    /// A worker started executing a job
    JobStarted {
        /// The submitting user
        user_id: String,
    },
    /// A job finished with every volume uploaded
    JobCompleted {
        /// The submitting user
        user_id: String,
        /// Ordered `(download_url, volume_name)` pairs
        parts: Vec<UploadedPart>,
    },
    /// A job reached the failed state
    JobFailed {
        /// The submitting user
        user_id: String,
        /// Human-readable failure reason
        reason: String,
    },
    /// A job was canceled cooperatively
    JobCanceled {
        /// The submitting user
        user_id: String,
    },
}
