//! Reservation exchange — obtains (upload URL, download URL) pairs for
//! not-yet-existing objects and resolves reservation URLs to real fetch URLs.
//!
//! The production implementation speaks the service's session gateway: a TLS
//! connection to `im.todus.cu:1756` carrying XML stanzas. After stream
//! negotiation and app-token authentication, a `todus:purl` query reserves an
//! upload slot for a given size and a `todus:gurl` query resolves a
//! reservation URL. The exchange sits behind a trait so protocol and pipeline
//! tests can stub it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::Rng;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};

/// Upload/download URL pair returned by a reservation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservedUrls {
    /// URL to PUT the object bytes to
    pub upload_url: String,
    /// Paired download URL handed to the requesting user
    pub download_url: String,
}

/// Reservation exchange operations used by the protocol client
#[async_trait]
pub trait ReservationExchange: Send + Sync {
    /// Reserve an upload slot for `size` bytes, returning the URL pair
    async fn reserve(&self, token: &str, size: u64) -> Result<ReservedUrls>;

    /// Resolve a reservation URL to the real fetch URL
    async fn resolve(&self, token: &str, url: &str) -> Result<String>;
}

/// Production reservation exchange over the service's session gateway
pub struct SessionGateway {
    host: String,
    port: u16,
    timeout: Duration,
    connector: TlsConnector,
}

impl SessionGateway {
    /// Create a gateway client from the protocol configuration
    pub fn new(config: &ProtocolConfig) -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            host: config.gateway_host.clone(),
            port: config.gateway_port,
            timeout: config.request_timeout,
            connector: TlsConnector::from(Arc::new(tls)),
        }
    }

    /// Open a TLS stream and run stream negotiation + authentication.
    async fn open_session(&self, token: &str) -> Result<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|_| Error::Protocol(format!("invalid gateway host: {}", self.host)))?;
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let mut stream = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(Error::Io)?;

        let open = stream_open(&self.host);
        stream.write_all(open.as_bytes()).await?;

        let username = token_username(token)?;
        let auth = STANDARD.encode(format!("\0{}\0{}", username, token));

        loop {
            let chunk = read_chunk(&mut stream).await?;
            if chunk.contains("<not-authorized") {
                return Err(Error::Auth("gateway rejected the token".to_string()));
            } else if chunk.contains("<es") {
                let stanza = format!("<es1 xmlns='x2' e='PLAIN' i='false'>{}</es1>", auth);
                stream.write_all(stanza.as_bytes()).await?;
            } else if chunk.contains("<ok") {
                // Authenticated; the stream restarts from the top
                stream.write_all(open.as_bytes()).await?;
            } else if chunk.contains("<b") {
                stream
                    .write_all(b"<en xmlns='x7' u='true' max='300'/>")
                    .await?;
                return Ok(stream);
            }
        }
    }

    /// Send one `iq` query and read until the response carries every wanted
    /// attribute, returning their (entity-unescaped) values in order.
    async fn query(&self, token: &str, body: &str, wanted: &[&str]) -> Result<Vec<String>> {
        let mut stream = self.open_session(token).await?;
        let stanza = format!("<iq i='{}' t='get'>{}</iq>", stanza_id(), body);
        stream.write_all(stanza.as_bytes()).await?;

        let mut response = String::new();
        loop {
            response.push_str(&read_chunk(&mut stream).await?);
            if let Some(values) = wanted
                .iter()
                .map(|name| attr(&response, name))
                .collect::<Option<Vec<_>>>()
            {
                let _ = stream.shutdown().await;
                return Ok(values);
            }
            if response.contains("<error") {
                return Err(Error::Protocol(format!(
                    "gateway query failed: {}",
                    response.trim()
                )));
            }
        }
    }
}

#[async_trait]
impl ReservationExchange for SessionGateway {
    async fn reserve(&self, token: &str, size: u64) -> Result<ReservedUrls> {
        let body = format!(
            "<query xmlns='todus:purl' type='0' persistent='false' size='{}' room=''></query>",
            size
        );
        let exchange = self.query(token, &body, &["put", "get"]);
        let mut values = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Protocol("reservation exchange timed out".to_string()))??;
        let download_url = values.pop().unwrap_or_default();
        let upload_url = values.pop().unwrap_or_default();
        tracing::debug!(size, upload_url = %upload_url, "reserved upload slot");
        Ok(ReservedUrls {
            upload_url,
            download_url,
        })
    }

    async fn resolve(&self, token: &str, url: &str) -> Result<String> {
        let body = format!("<query xmlns='todus:gurl' url='{}'></query>", url);
        let exchange = self.query(token, &body, &["du"]);
        let mut values = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Protocol("URL resolution timed out".to_string()))??;
        let encoded = values.pop().unwrap_or_default();
        // The gateway percent-encodes the real URL (plus-as-space form)
        let plus_decoded = encoded.replace('+', " ");
        let decoded = urlencoding::decode(&plus_decoded)
            .map_err(|_| Error::Protocol("resolved URL is not valid UTF-8".to_string()))?;
        Ok(decoded.into_owned())
    }
}

/// The stream-open stanza sent at connect and again after authentication
fn stream_open(host: &str) -> String {
    format!(
        "<stream:stream xmlns='jc' o='{}' xmlns:stream='x1' v='1.1'>",
        host
    )
}

/// Random 5-letter stanza id
fn stanza_id() -> String {
    let mut rng = rand::thread_rng();
    (0..5).map(|_| rng.gen_range('a'..='z')).collect()
}

/// Pull the account phone number out of the bearer token's JWT payload
fn token_username(token: &str) -> Result<String> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::Protocol("token is not a JWT".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| Error::Protocol("token payload is not base64".to_string()))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    value
        .get("username")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol("token payload has no username".to_string()))
}

/// Extract an XML attribute value, undoing entity escaping
fn attr(chunk: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!("{}='([^']+)'", regex::escape(name))).ok()?;
    re.captures(chunk)
        .map(|c| c[1].replace("&amp;", "&").replace("&apos;", "'"))
}

/// Read the next chunk of stanza bytes off the stream
async fn read_chunk(stream: &mut TlsStream<TcpStream>) -> Result<String> {
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Err(Error::Protocol(
            "gateway closed the stream mid-exchange".to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}
