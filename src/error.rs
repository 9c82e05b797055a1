//! Error types for todus-s3
//!
//! One crate-wide [`Error`] enum plus an explicit [`FailureClass`] that the
//! upload pipeline checks at each step to decide between aborting, retrying
//! a volume once, and failing the whole job.

use thiserror::Error;

/// Result type alias for todus-s3 operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for todus-s3
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "transfer.volume_size")
        key: Option<String>,
    },

    /// Transport or HTTP failure (timeout, connect error, non-2xx status)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Unexpected response shape from the storage service
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The service rejected the supplied credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Cooperative cancellation was requested; always terminal, never retried
    #[error("operation aborted")]
    Abort,

    /// Fetched payload exceeded the configured size policy
    #[error("file too big: exceeds the {limit} byte limit")]
    TooBig {
        /// The size limit that was exceeded, in bytes
        limit: u64,
    },

    /// A volume failed to upload even after its single retry
    #[error("upload of volume {index} ({size} bytes) failed: {source}")]
    UploadPart {
        /// 1-based index of the failed volume
        index: usize,
        /// Size of the failed volume in bytes
        size: u64,
        /// The error from the second (final) attempt
        #[source]
        source: Box<Error>,
    },

    /// Container construction failed
    #[error("container error: {0}")]
    Chunk(String),

    /// The user already has a job admitted (queued or running)
    #[error("a request for this user is already queued")]
    AlreadyQueued,

    /// The admission queue is at capacity
    #[error("too many pending requests, try again later")]
    QueueFull,

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// The user has no verified account
    #[error("user is not registered")]
    NotRegistered,

    /// The user already has an account
    #[error("user is already registered")]
    AlreadyRegistered,

    /// Cancel was requested but the user has no running job
    #[error("no running job to cancel")]
    NoActiveJob,

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a failure should be handled by the pipeline
///
/// Checked explicitly at each step instead of relying on error identity:
/// an abort short-circuits everything, a retryable failure gets the volume's
/// single retry, and a fatal failure fails the job immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// User-initiated cancellation — terminate the job as canceled
    Abort,
    /// Transient failure — the current volume may be retried once
    Retryable,
    /// Permanent failure — fail the job without retrying
    Fatal,
}

impl Error {
    /// Classify this error for the pipeline's abort/retry/fatal decision
    pub fn classify(&self) -> FailureClass {
        match self {
            Error::Abort => FailureClass::Abort,
            // Network-level and service-side failures may clear up on retry
            Error::Network(_) | Error::Protocol(_) | Error::Auth(_) => FailureClass::Retryable,
            // The retry already happened; the wrapper itself is final
            Error::UploadPart { .. } => FailureClass::Fatal,
            Error::Config { .. }
            | Error::TooBig { .. }
            | Error::Chunk(_)
            | Error::AlreadyQueued
            | Error::QueueFull
            | Error::ShuttingDown
            | Error::NotRegistered
            | Error::AlreadyRegistered
            | Error::NoActiveJob
            | Error::Database(_)
            | Error::Io(_)
            | Error::Serialization(_) => FailureClass::Fatal,
        }
    }

    /// Returns true if this error is the cooperative abort signal
    pub fn is_abort(&self) -> bool {
        self.classify() == FailureClass::Abort
    }
}
