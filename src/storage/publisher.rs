//! Blob upload with publisher failover
//!
//! Publishers are interchangeable, so every attempt picks one uniformly at
//! random instead of rotating: a client must not keep preferring an endpoint
//! that is down. Each attempt also takes a fresh proxy from the rotator.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Constant;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::proxy::ProxyRotator;

/// Opaque identifier of a stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobId(pub String);

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Publisher response body. Exactly one branch is expected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherResponse {
    pub newly_created: Option<NewlyCreated>,
    pub already_certified: Option<AlreadyCertified>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewlyCreated {
    pub blob_object: BlobObject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobObject {
    pub blob_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlreadyCertified {
    pub blob_id: Option<String>,
}

/// How the publisher accepted the blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredBlob {
    NewlyCreated(BlobId),
    AlreadyCertified(BlobId),
}

impl StoredBlob {
    pub fn blob_id(&self) -> &BlobId {
        match self {
            StoredBlob::NewlyCreated(id) | StoredBlob::AlreadyCertified(id) => id,
        }
    }
}

impl PublisherResponse {
    /// Both "newly created" and "already certified" count as success
    pub fn stored_blob(&self) -> Result<StoredBlob> {
        if let Some(created) = &self.newly_created {
            return created
                .blob_object
                .blob_id
                .clone()
                .filter(|id| !id.is_empty())
                .map(|id| StoredBlob::NewlyCreated(BlobId(id)))
                .ok_or_else(|| {
                    Error::InvalidPublisherResponse("blob id missing in newlyCreated".to_string())
                });
        }

        if let Some(certified) = &self.already_certified {
            return certified
                .blob_id
                .clone()
                .filter(|id| !id.is_empty())
                .map(|id| StoredBlob::AlreadyCertified(BlobId(id)))
                .ok_or_else(|| {
                    Error::InvalidPublisherResponse(
                        "blob id missing in alreadyCertified".to_string(),
                    )
                });
        }

        Err(Error::InvalidPublisherResponse(
            "unexpected response structure".to_string(),
        ))
    }
}

/// One HTTP PUT against a publisher endpoint
#[async_trait]
pub trait PublisherTransport: Send + Sync {
    async fn put_blob(
        &self,
        url: &str,
        payload: &[u8],
        proxy: Option<reqwest::Proxy>,
    ) -> Result<PublisherResponse>;
}

/// reqwest-backed transport; builds a client per call so the proxy is never reused
#[derive(Debug, Default, Clone)]
pub struct HttpPublisher {
    timeout: Option<Duration>,
}

impl HttpPublisher {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PublisherTransport for HttpPublisher {
    async fn put_blob(
        &self,
        url: &str,
        payload: &[u8],
        proxy: Option<reqwest::Proxy>,
    ) -> Result<PublisherResponse> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Publisher(format!("client build failed: {}", e)))?;

        let response = client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| Error::Publisher(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Publisher(format!("HTTP {}: {}", status, body)));
        }

        response
            .json::<PublisherResponse>()
            .await
            .map_err(|e| Error::InvalidPublisherResponse(e.to_string()))
    }
}

/// Upload limits
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Storage durability in epochs
    pub epochs: u32,
    pub max_attempts: u32,
    pub fixed_delay: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            epochs: 1,
            max_attempts: 15,
            fixed_delay: Duration::from_secs(5),
        }
    }
}

/// Anything that can durably store a payload and hand back its blob id
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(&self, payload: &[u8]) -> Result<BlobId>;
}

/// Uploads through a pool of interchangeable publishers
pub struct BlobUploader {
    transport: Arc<dyn PublisherTransport>,
    endpoints: Vec<String>,
    proxies: Arc<ProxyRotator>,
    policy: UploadPolicy,
}

impl BlobUploader {
    pub fn new(
        transport: Arc<dyn PublisherTransport>,
        endpoints: Vec<String>,
        proxies: Arc<ProxyRotator>,
        policy: UploadPolicy,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::Config("no publisher endpoints configured".to_string()));
        }
        Ok(Self {
            transport,
            endpoints,
            proxies,
            policy,
        })
    }

    /// Upload `payload`, failing over between random endpoints.
    ///
    /// Makes at most `max_attempts` attempts, sleeping `fixed_delay` after
    /// every failed attempt except the last.
    pub async fn upload(
        &self,
        payload: &[u8],
        epochs: u32,
        max_attempts: u32,
        fixed_delay: Duration,
    ) -> Result<BlobId> {
        let max_attempts = max_attempts.max(1);
        info!(
            "Uploading blob ({:.2} KB) for {} epoch(s)",
            payload.len() as f64 / 1024.0,
            epochs
        );

        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let this = self;

        let operation = move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match this.attempt(payload, epochs, attempt).await {
                Ok(stored) => Ok(stored),
                Err(e) if attempt >= max_attempts => {
                    error!("Upload failed on attempt {}: {}", attempt, e);
                    error!("Max attempts ({}) reached. Giving up.", max_attempts);
                    Err(backoff::Error::permanent(Error::UploadExhausted {
                        attempts: attempt,
                    }))
                }
                Err(e) => {
                    warn!("Upload failed on attempt {}: {}", attempt, e);
                    Err(backoff::Error::transient(e))
                }
            }
        };

        let stored = backoff::future::retry_notify(
            Constant::new(fixed_delay),
            operation,
            |_: Error, wait: Duration| {
                debug!("Retrying upload in {:.1}s", wait.as_secs_f64());
            },
        )
        .await?;

        match &stored {
            StoredBlob::NewlyCreated(id) => info!("Blob newly created: {}", id),
            StoredBlob::AlreadyCertified(id) => info!("Blob already certified: {}", id),
        }
        Ok(stored.blob_id().clone())
    }

    /// Single attempt against a randomly chosen endpoint
    async fn attempt(&self, payload: &[u8], epochs: u32, attempt: u32) -> Result<StoredBlob> {
        let index = rand::thread_rng().gen_range(0..self.endpoints.len());
        let url = publisher_url(&self.endpoints[index], epochs)?;
        debug!("Attempt {}: using publisher{}", attempt, index + 1);

        let proxy = self.proxies.build_transport_agent();
        let response = self.transport.put_blob(&url, payload, proxy).await?;
        response.stored_blob()
    }
}

#[async_trait]
impl BlobStore for BlobUploader {
    async fn store(&self, payload: &[u8]) -> Result<BlobId> {
        self.upload(
            payload,
            self.policy.epochs,
            self.policy.max_attempts,
            self.policy.fixed_delay,
        )
        .await
    }
}

fn publisher_url(base: &str, epochs: u32) -> Result<String> {
    let mut url = url::Url::parse(base)
        .map_err(|e| Error::Config(format!("invalid publisher url {}: {}", base, e)))?;
    url.query_pairs_mut()
        .append_pair("epochs", &epochs.to_string());
    Ok(url.into())
}
