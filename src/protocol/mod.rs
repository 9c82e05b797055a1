//! Storage-service protocol client.
//!
//! Speaks the ToDus authentication and transfer protocol over HTTPS:
//! phone-based registration, SMS-code verification, token login, and chunked
//! upload/download through the reservation exchange. A client instance is
//! stateless apart from its outbound HTTP session and a cooperative abort
//! flag; each job owns its own instance, so nothing here is locked across
//! jobs.

pub mod reservation;
pub mod wire;

pub use reservation::{ReservationExchange, ReservedUrls, SessionGateway};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT};
use tokio_util::sync::CancellationToken;

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};

/// Content type of every auth-protocol request body
const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Per-MiB upload timeout scale (the configured request timeout is the floor)
const UPLOAD_SECS_PER_MIB: f64 = 20.0;

/// Protocol operations consumed by the upload pipeline.
///
/// A trait seam so pipeline tests can script failures without a live service;
/// [`ToDusClient`] is the production implementation.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Ask the service to deliver an out-of-band SMS code to `phone`
    async fn request_code(&self, phone: &str) -> Result<()>;

    /// Exchange the SMS code for the long-lived account password
    async fn validate_code(&self, phone: &str, code: &str) -> Result<String>;

    /// Exchange phone + password for a short-lived bearer token
    async fn login(&self, phone: &str, password: &str) -> Result<String>;

    /// Reserve an upload slot, PUT the payload, return the download URL
    async fn upload_file(&self, token: &str, data: &[u8]) -> Result<String>;

    /// Resolve a reservation URL and fetch the object bytes
    async fn download_file(&self, token: &str, url: &str) -> Result<Vec<u8>>;

    /// Set the cooperative abort flag; subsequent and in-flight calls on this
    /// instance fail fast with [`Error::Abort`]
    fn abort(&self);
}

/// Creates one protocol client per job, wired to the job's abort token
pub trait ClientFactory: Send + Sync {
    /// Build a client whose abort flag trips when `abort` is cancelled
    fn create(&self, abort: CancellationToken) -> Arc<dyn StorageClient>;
}

/// Production [`ClientFactory`] building [`ToDusClient`] instances
pub struct ToDusClientFactory {
    config: ProtocolConfig,
}

impl ToDusClientFactory {
    /// Create a factory for the given protocol configuration
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for ToDusClientFactory {
    fn create(&self, abort: CancellationToken) -> Arc<dyn StorageClient> {
        Arc::new(ToDusClient::with_abort(self.config.clone(), abort))
    }
}

/// Client for the ToDus authentication and transfer protocol
pub struct ToDusClient {
    http: reqwest::Client,
    config: ProtocolConfig,
    abort: CancellationToken,
    reservations: Arc<dyn ReservationExchange>,
}

impl ToDusClient {
    /// Create a client with its own abort flag and the production gateway
    pub fn new(config: ProtocolConfig) -> Self {
        Self::with_abort(config, CancellationToken::new())
    }

    /// Create a client whose abort flag trips when `abort` is cancelled
    pub fn with_abort(config: ProtocolConfig, abort: CancellationToken) -> Self {
        let reservations = Arc::new(SessionGateway::new(&config));
        Self::with_reservations(config, abort, reservations)
    }

    /// Create a client with an injected reservation exchange (used in tests)
    pub fn with_reservations(
        config: ProtocolConfig,
        abort: CancellationToken,
        reservations: Arc<dyn ReservationExchange>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            abort,
            reservations,
        }
    }

    fn auth_ua(&self) -> String {
        format!("ToDus {} Auth", self.config.version_name)
    }

    fn upload_ua(&self) -> String {
        format!("ToDus {} HTTP-Upload", self.config.version_name)
    }

    fn download_ua(&self) -> String {
        format!("ToDus {} HTTP-Download", self.config.version_name)
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!(
            "{}/v2/auth/{}",
            self.config.auth_base_url.trim_end_matches('/'),
            endpoint
        )
    }

    /// Host header carried by auth requests (derived from the base URL so
    /// tests can point at a local fixture)
    fn auth_host(&self) -> Result<String> {
        let parsed = url::Url::parse(&self.config.auth_base_url).map_err(|e| Error::Config {
            message: format!("invalid auth base URL: {}", e),
            key: Some("protocol.auth_base_url".to_string()),
        })?;
        parsed
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Config {
                message: "auth base URL has no host".to_string(),
                key: Some("protocol.auth_base_url".to_string()),
            })
    }

    /// Run a protocol exchange under the abort flag: short-circuit before the
    /// call, race the flag against the call in flight, and re-check after.
    async fn guarded<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        if self.abort.is_cancelled() {
            return Err(Error::Abort);
        }
        let result = tokio::select! {
            biased;
            _ = self.abort.cancelled() => return Err(Error::Abort),
            result = fut => result,
        };
        if self.abort.is_cancelled() {
            return Err(Error::Abort);
        }
        result
    }

    /// POST one auth-protocol body, returning the raw response
    async fn auth_post(&self, endpoint: &str, body: Vec<u8>) -> Result<reqwest::Response> {
        let request = self
            .http
            .post(self.auth_url(endpoint))
            .header(HOST, self.auth_host()?)
            .header(USER_AGENT, self.auth_ua())
            .header(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .timeout(self.config.request_timeout)
            .body(body);
        self.guarded(async move { Ok(request.send().await?) }).await
    }
}

#[async_trait]
impl StorageClient for ToDusClient {
    async fn request_code(&self, phone: &str) -> Result<()> {
        tracing::debug!(phone = %phone, "requesting verification code");
        let body = wire::request_code_body(phone, &wire::generate_nonce(wire::NONCE_LEN));
        let response = self.auth_post("users.reserve", body).await?;
        response.error_for_status()?;
        Ok(())
    }

    async fn validate_code(&self, phone: &str, code: &str) -> Result<String> {
        let body = wire::validate_code_body(phone, &wire::generate_nonce(wire::NONCE_LEN), code);
        let response = self.auth_post("users.register", body).await?;
        let response = response.error_for_status()?;
        let bytes = self.guarded(async { Ok(response.bytes().await?) }).await?;
        wire::extract_password(&bytes)
    }

    async fn login(&self, phone: &str, password: &str) -> Result<String> {
        let body = wire::login_body(
            phone,
            &wire::generate_nonce(wire::NONCE_LEN),
            password,
            &self.config.version_code,
        );
        let response = self.auth_post("token", body).await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Auth(format!(
                "login rejected with status {}",
                status.as_u16()
            )));
        }
        let response = response.error_for_status()?;
        let text = self.guarded(async { Ok(response.text().await?) }).await?;
        // The field-header bytes around the token include 0x0a, which the
        // printable filter keeps as a newline; trim it away.
        let filtered = wire::filter_printable(&text);
        let token = filtered.trim();
        if token.is_empty() {
            return Err(Error::Protocol("login response carried no token".to_string()));
        }
        Ok(token.to_string())
    }

    async fn upload_file(&self, token: &str, data: &[u8]) -> Result<String> {
        let size = data.len() as u64;
        let urls = self
            .guarded(self.reservations.reserve(token, size))
            .await?;

        let timeout = upload_timeout(size, self.config.request_timeout);
        tracing::debug!(size, timeout_secs = timeout.as_secs(), "uploading volume");
        let request = self
            .http
            .put(&urls.upload_url)
            .header(USER_AGENT, self.upload_ua())
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .timeout(timeout)
            .body(data.to_vec());
        self.guarded(async move {
            request.send().await?.error_for_status()?;
            Ok(())
        })
        .await?;

        Ok(urls.download_url)
    }

    async fn download_file(&self, token: &str, url: &str) -> Result<Vec<u8>> {
        let real_url = self.guarded(self.reservations.resolve(token, url)).await?;
        let request = self
            .http
            .get(&real_url)
            .header(USER_AGENT, self.download_ua())
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .timeout(self.config.request_timeout);
        let bytes = self
            .guarded(async move {
                let response = request.send().await?.error_for_status()?;
                Ok(response.bytes().await?)
            })
            .await?;
        Ok(bytes.to_vec())
    }

    fn abort(&self) {
        self.abort.cancel();
    }
}

/// PUT timeout scaling with payload size: the configured request timeout is
/// the floor, above ~1 MiB it grows by 20s per MiB.
fn upload_timeout(size: u64, floor: Duration) -> Duration {
    let scaled = size as f64 / (1024.0 * 1024.0) * UPLOAD_SECS_PER_MIB;
    floor.max(Duration::from_secs_f64(scaled))
}
