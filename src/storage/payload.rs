//! Payload acquisition
//!
//! Blobs are images in this domain. They come from a URL, a local file or
//! raw bytes already in memory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::proxy::ProxyRotator;

/// Where the bytes of one upload come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    Url(String),
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl PayloadSource {
    /// Pick a source from optional parts; URL wins over path, path over bytes.
    pub fn from_parts(
        url: Option<String>,
        path: Option<PathBuf>,
        bytes: Option<Vec<u8>>,
    ) -> Option<Self> {
        url.map(PayloadSource::Url)
            .or_else(|| path.map(PayloadSource::Path))
            .or_else(|| bytes.map(PayloadSource::Bytes))
    }

    pub fn describe(&self) -> String {
        match self {
            PayloadSource::Url(url) => url.clone(),
            PayloadSource::Path(path) => path.display().to_string(),
            PayloadSource::Bytes(bytes) => format!("{} in-memory bytes", bytes.len()),
        }
    }
}

/// Image mode used for non-interactive runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    /// Configured default image URL
    #[default]
    Default,
    /// Local image file
    Local,
    /// Probe a random image API
    Random,
}

/// Image choice for a batch, resolved to a [`PayloadSource`] per workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChoice {
    Url(String),
    Local(PathBuf),
    /// A fresh random image URL for every workflow invocation
    Random,
    Bytes(Vec<u8>),
}

impl From<PayloadSource> for ImageChoice {
    fn from(source: PayloadSource) -> Self {
        match source {
            PayloadSource::Url(url) => ImageChoice::Url(url),
            PayloadSource::Path(path) => ImageChoice::Local(path),
            PayloadSource::Bytes(bytes) => ImageChoice::Bytes(bytes),
        }
    }
}

/// Fetches payload bytes, routing URL downloads through the proxy rotator
pub struct PayloadLoader {
    proxies: Arc<ProxyRotator>,
    timeout: Option<Duration>,
    probe_timeout: Duration,
    fallback_image_url: String,
}

impl PayloadLoader {
    pub fn new(
        proxies: Arc<ProxyRotator>,
        timeout: Option<Duration>,
        probe_timeout: Duration,
        fallback_image_url: String,
    ) -> Self {
        Self {
            proxies,
            timeout,
            probe_timeout,
            fallback_image_url,
        }
    }

    /// Load the bytes behind `source`
    pub async fn load(&self, source: &PayloadSource) -> Result<Vec<u8>> {
        let data = match source {
            PayloadSource::Url(url) => {
                info!("Fetching image from URL");
                self.fetch(url).await?
            }
            PayloadSource::Path(path) => {
                info!("Loading local image");
                tokio::fs::read(path)
                    .await
                    .map_err(|e| Error::Payload(format!("{}: {}", path.display(), e)))?
            }
            PayloadSource::Bytes(bytes) => bytes.clone(),
        };

        if data.is_empty() {
            return Err(Error::Payload(format!("{} is empty", source.describe())));
        }

        info!("Image ready: {:.2} KB", data.len() as f64 / 1024.0);
        Ok(data)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let client = self.proxies.http_client(self.timeout)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Payload(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Payload(format!("GET {}: HTTP {}", url, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Payload(format!("GET {}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }

    /// Resolve an image choice into a concrete source
    pub async fn resolve(&self, choice: &ImageChoice) -> PayloadSource {
        match choice {
            ImageChoice::Url(url) => PayloadSource::Url(url.clone()),
            ImageChoice::Local(path) => PayloadSource::Path(path.clone()),
            ImageChoice::Bytes(bytes) => PayloadSource::Bytes(bytes.clone()),
            ImageChoice::Random => PayloadSource::Url(self.random_image_url().await),
        }
    }

    /// First random-image API that answers a HEAD request, or the fallback URL
    pub async fn random_image_url(&self) -> String {
        let candidates = random_image_candidates(rand::thread_rng().gen_range(0..10_000));

        for (i, candidate) in candidates.iter().enumerate() {
            debug!("Trying image source {}/{}", i + 1, candidates.len());
            let client = match self.proxies.http_client(Some(self.probe_timeout)) {
                Ok(client) => client,
                Err(e) => {
                    warn!("Image probe client unavailable: {}", e);
                    break;
                }
            };

            match client.head(candidate).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Image source found: {}", candidate);
                    return candidate.clone();
                }
                Ok(response) => debug!("Image source {} answered {}", candidate, response.status()),
                Err(e) => debug!("Image source {} failed: {}", candidate, e),
            }
        }

        warn!("All image sources failed. Using default image.");
        self.fallback_image_url.clone()
    }
}

/// Candidate random-image URLs, in order of preference
pub fn random_image_candidates(seed: u32) -> Vec<String> {
    let (width, height) = (800, 600);
    vec![
        format!("https://picsum.photos/{}/{}?random={}", width, height, seed),
        format!("https://picsum.photos/seed/{}/{}/{}", seed, width, height),
        format!(
            "https://source.unsplash.com/random/{}x{}/?sig={}",
            width, height, seed
        ),
        format!("https://loremflickr.com/{}/{}?lock={}", width, height, seed),
    ]
}
