//! Configuration types for todus-s3

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transfer behavior configuration (size policy, volume bound, fetch timeout)
///
/// Groups settings related to how payloads are fetched and split.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum fetched payload size in bytes for regular users (default: 200 MiB)
    #[serde(default = "default_max_fetch_size")]
    pub max_fetch_size: u64,

    /// Volume size bound in bytes (default: 15 MiB)
    #[serde(default = "default_volume_size")]
    pub volume_size: u64,

    /// Timeout applied to fetch requests (default: 15s)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: Duration,

    /// Users exempt from the size policy (default: empty)
    #[serde(default)]
    pub privileged_users: Vec<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_fetch_size: default_max_fetch_size(),
            volume_size: default_volume_size(),
            fetch_timeout: default_fetch_timeout(),
            privileged_users: Vec::new(),
        }
    }
}

/// Scheduler configuration (admission bound, worker pool, retry backoff)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum jobs waiting for a worker before submissions are rejected (default: 50)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of jobs executing concurrently (default: 10)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Delay before a failed volume's single retry (default: 15s)
    #[serde(default = "default_retry_delay")]
    pub retry_delay: Duration,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            retry_delay: default_retry_delay(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Storage-service protocol configuration
///
/// The defaults target the live service; the auth base URL is configurable so
/// tests can point the client at an HTTP fixture.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Base URL of the authentication service (default: `https://auth.todus.cu`)
    #[serde(default = "default_auth_base_url")]
    pub auth_base_url: String,

    /// Host of the session gateway used for the reservation exchange
    #[serde(default = "default_gateway_host")]
    pub gateway_host: String,

    /// Port of the session gateway (default: 1756)
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,

    /// Client version name carried in user-agent strings (default: "0.38.34")
    #[serde(default = "default_version_name")]
    pub version_name: String,

    /// Client version code sent in the login body (default: "21805")
    #[serde(default = "default_version_code")]
    pub version_code: String,

    /// Timeout for auth requests; also the floor of the size-scaled upload
    /// timeout (default: 60s)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            auth_base_url: default_auth_base_url(),
            gateway_host: default_gateway_host(),
            gateway_port: default_gateway_port(),
            version_name: default_version_name(),
            version_code: default_version_code(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path of the SQLite account database (default: "./accounts.db")
    #[serde(default = "default_accounts_path")]
    pub accounts_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            accounts_path: default_accounts_path(),
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transfer behavior (size policy, volume bound)
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Scheduler behavior (admission bound, worker pool, retry backoff)
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Storage-service protocol settings
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

fn default_max_fetch_size() -> u64 {
    200 * 1024 * 1024
}

fn default_volume_size() -> u64 {
    15 * 1024 * 1024
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_queue_capacity() -> usize {
    50
}

fn default_max_concurrent_jobs() -> usize {
    10
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(15)
}

fn default_event_capacity() -> usize {
    1000
}

fn default_auth_base_url() -> String {
    "https://auth.todus.cu".to_string()
}

fn default_gateway_host() -> String {
    "im.todus.cu".to_string()
}

fn default_gateway_port() -> u16 {
    1756
}

fn default_version_name() -> String {
    "0.38.34".to_string()
}

fn default_version_code() -> String {
    "21805".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_accounts_path() -> PathBuf {
    PathBuf::from("./accounts.db")
}
