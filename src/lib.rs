//! # todus-s3
//!
//! Backend library for moving files into the ToDus "s3" storage service:
//! fetch a URL, split the payload into bounded archive volumes, upload each
//! volume through the token-based transfer protocol, and hand back the
//! download links.
//!
//! ## Design Philosophy
//!
//! todus-s3 is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Swappable at the seams** - Accounts, fetching, notifications and the
//!   protocol client are traits behind [`Services`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use todus_s3::{Config, UploadManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = UploadManager::new(Config::default()).await?;
//!     manager.start_queue_processor();
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Link an account once, then submit URLs
//!     manager.begin_registration("alice", "5355555555").await?;
//!     // ... user receives the SMS code out of band ...
//!     manager.complete_registration("alice", "123456").await?;
//!     manager.submit("alice", "http://example.org/large-file.iso").await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Account records and phone-number handling
pub mod accounts;
/// Payload containerization and volume splitting
pub mod chunker;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// URL content fetching
pub mod fetch;
/// Progress and result notification sinks
pub mod notify;
/// The ToDus transfer protocol client
pub mod protocol;
/// Core types and events
pub mod types;
/// Upload manager: admission, scheduling, and the job pipeline
pub mod uploader;

// Re-export commonly used types
pub use accounts::{Account, AccountStore, MemoryAccountStore, SqliteAccountStore};
pub use config::{Config, PersistenceConfig, ProtocolConfig, SchedulerConfig, TransferConfig};
pub use error::{Error, FailureClass, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use notify::{LogNotifier, NotificationSink};
pub use protocol::{
    ClientFactory, ReservationExchange, StorageClient, ToDusClient, ToDusClientFactory,
};
pub use types::{Event, JobState, JobStatus, Progress, UploadedPart, Volume};
pub use uploader::{Services, UploadManager};

/// Helper function to run the manager with graceful signal handling.
///
/// Waits for a termination signal, then stops accepting submissions and
/// cancels every running job via [`UploadManager::shutdown`].
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use todus_s3::{Config, UploadManager, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = UploadManager::new(Config::default()).await?;
///     manager.start_queue_processor();
///
///     // Run with automatic signal handling
///     run_with_shutdown(manager).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(manager: UploadManager) {
    wait_for_signal().await;
    manager.shutdown();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
