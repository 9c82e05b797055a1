//! Shared test helpers: scripted collaborators and a manager factory.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::accounts::{AccountStore, MemoryAccountStore};
use crate::config::{Config, SchedulerConfig, TransferConfig};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::notify::NotificationSink;
use crate::protocol::{ClientFactory, StorageClient};
use crate::types::{FetchedFile, Progress, UploadedPart};
use crate::uploader::{Services, UploadManager};

/// The registered test user
pub(crate) const USER: &str = "alice@example.org";

/// Payload sized so a 1 KiB volume bound yields exactly three volumes
/// (2.5 KiB payload + container overhead < 3 KiB)
pub(crate) fn default_payload() -> Vec<u8> {
    vec![0xAB; 2560]
}

/// Small limits and a fast retry backoff so pipeline tests run in tens of
/// milliseconds
pub(crate) fn test_config() -> Config {
    Config {
        transfer: TransferConfig {
            max_fetch_size: 1024 * 1024,
            volume_size: 1024,
            ..TransferConfig::default()
        },
        scheduler: SchedulerConfig {
            retry_delay: Duration::from_millis(50),
            ..SchedulerConfig::default()
        },
        ..Config::default()
    }
}

/// Fetcher returning a canned payload (or a size-policy failure)
pub(crate) struct MockFetcher {
    filename: String,
    payload: Vec<u8>,
    fail: bool,
}

impl MockFetcher {
    pub(crate) fn new(filename: &str, payload: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            filename: filename.to_string(),
            payload,
            fail: false,
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            filename: String::new(),
            payload: Vec::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, _url: &str, max_size: u64, _privileged: bool) -> Result<FetchedFile> {
        if self.fail {
            return Err(Error::TooBig { limit: max_size });
        }
        Ok(FetchedFile {
            filename: self.filename.clone(),
            data: self.payload.clone(),
            size: self.payload.len() as u64,
        })
    }
}

/// Outcome of one scripted `upload_file` call
#[derive(Clone, Copy, Debug)]
pub(crate) enum UploadOutcome {
    /// Succeed with a generated download URL
    Succeed,
    /// Fail with a retryable protocol error
    Fail,
    /// Park until the client is aborted, then fail with the abort signal
    Block,
}

/// Builds [`ScriptedClient`]s sharing one upload script and call counters
pub(crate) struct ScriptedClientFactory {
    script: Arc<Mutex<VecDeque<UploadOutcome>>>,
    pub(crate) logins: Arc<AtomicUsize>,
    pub(crate) uploads: Arc<AtomicUsize>,
}

impl ScriptedClientFactory {
    pub(crate) fn new(script: Vec<UploadOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Mutex::new(script.into())),
            logins: Arc::new(AtomicUsize::new(0)),
            uploads: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl ClientFactory for ScriptedClientFactory {
    fn create(&self, abort: CancellationToken) -> Arc<dyn StorageClient> {
        Arc::new(ScriptedClient {
            abort,
            script: Arc::clone(&self.script),
            logins: Arc::clone(&self.logins),
            uploads: Arc::clone(&self.uploads),
        })
    }
}

/// Protocol client whose upload outcomes are scripted by the factory;
/// uploads beyond the script succeed.
pub(crate) struct ScriptedClient {
    abort: CancellationToken,
    script: Arc<Mutex<VecDeque<UploadOutcome>>>,
    logins: Arc<AtomicUsize>,
    uploads: Arc<AtomicUsize>,
}

#[async_trait]
impl StorageClient for ScriptedClient {
    async fn request_code(&self, _phone: &str) -> Result<()> {
        Ok(())
    }

    async fn validate_code(&self, _phone: &str, _code: &str) -> Result<String> {
        Ok("p".repeat(96))
    }

    async fn login(&self, _phone: &str, _password: &str) -> Result<String> {
        if self.abort.is_cancelled() {
            return Err(Error::Abort);
        }
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok("bearer-token".to_string())
    }

    async fn upload_file(&self, _token: &str, _data: &[u8]) -> Result<String> {
        if self.abort.is_cancelled() {
            return Err(Error::Abort);
        }
        let call = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(UploadOutcome::Succeed);
        match outcome {
            UploadOutcome::Succeed => Ok(format!("https://s3.example/obj/{}", call)),
            UploadOutcome::Fail => Err(Error::Protocol("scripted upload failure".to_string())),
            UploadOutcome::Block => {
                self.abort.cancelled().await;
                Err(Error::Abort)
            }
        }
    }

    async fn download_file(&self, _token: &str, _url: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn abort(&self) {
        self.abort.cancel();
    }
}

/// Sink recording everything it receives
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) progress: Mutex<Vec<Progress>>,
    pub(crate) results: Mutex<Vec<(Vec<UploadedPart>, String, u64)>>,
    pub(crate) failures: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn report_progress(&self, _user_id: &str, progress: &Progress) {
        self.progress.lock().unwrap().push(*progress);
    }

    async fn report_result(
        &self,
        _user_id: &str,
        parts: &[UploadedPart],
        filename: &str,
        total_size: u64,
    ) {
        self.results
            .lock()
            .unwrap()
            .push((parts.to_vec(), filename.to_string(), total_size));
    }

    async fn report_failure(&self, _user_id: &str, reason: &str) {
        self.failures.lock().unwrap().push(reason.to_string());
    }
}

/// Create a manager with injected collaborators and a verified test user
pub(crate) async fn create_test_manager(
    config: Config,
    fetcher: Arc<dyn Fetcher>,
    script: Vec<UploadOutcome>,
) -> (UploadManager, Arc<RecordingSink>, Arc<ScriptedClientFactory>) {
    let accounts = Arc::new(MemoryAccountStore::new());
    accounts.add(USER, "5355555555").await.unwrap();
    accounts.set_password(USER, &"p".repeat(96)).await.unwrap();

    let sink = Arc::new(RecordingSink::default());
    let factory = ScriptedClientFactory::new(script);
    let manager = UploadManager::with_services(
        config,
        Services {
            accounts,
            fetcher,
            notifier: sink.clone(),
            clients: factory.clone(),
        },
    );
    (manager, sink, factory)
}

/// Register and verify an extra user on an existing manager
pub(crate) async fn add_verified_user(manager: &UploadManager, user_id: &str) {
    manager.accounts.add(user_id, "5311111111").await.unwrap();
    manager
        .accounts
        .set_password(user_id, &"p".repeat(96))
        .await
        .unwrap();
}
