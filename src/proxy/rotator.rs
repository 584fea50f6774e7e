//! Round-robin proxy rotation
//!
//! Supported line shapes:
//! - `host:port`
//! - `host:port:user:pass`
//! - `user:pass@host:port`

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Basic-auth credentials for a proxy
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A single egress proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub host: String,
    pub port: u16,
    pub auth: Option<ProxyAuth>,
}

impl ProxyEntry {
    /// Parse one proxy line. Returns `None` for any unsupported shape.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some((auth, host_port)) = line.split_once('@') {
            let (username, password) = split_pair(auth)?;
            let (host, port) = split_pair(host_port)?;
            return Some(Self {
                host: host.to_string(),
                port: port.parse().ok()?,
                auth: Some(ProxyAuth {
                    username: username.to_string(),
                    password: password.to_string(),
                }),
            });
        }

        let parts: Vec<&str> = line.split(':').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }

        match parts.as_slice() {
            [host, port] => Some(Self {
                host: host.to_string(),
                port: port.parse().ok()?,
                auth: None,
            }),
            [host, port, username, password] => Some(Self {
                host: host.to_string(),
                port: port.parse().ok()?,
                auth: Some(ProxyAuth {
                    username: username.to_string(),
                    password: password.to_string(),
                }),
            }),
            _ => None,
        }
    }

    /// Forward-proxy URL without credentials
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Build a reqwest proxy handle, attaching basic auth when present
    pub fn to_transport(&self) -> Result<reqwest::Proxy> {
        let proxy = reqwest::Proxy::all(self.url())
            .map_err(|e| Error::Proxy(format!("{}: {}", self, e)))?;

        Ok(match &self.auth {
            Some(auth) if !auth.username.is_empty() && !auth.password.is_empty() => {
                proxy.basic_auth(&auth.username, &auth.password)
            }
            _ => proxy,
        })
    }
}

impl fmt::Display for ProxyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn split_pair(s: &str) -> Option<(&str, &str)> {
    let (a, b) = s.split_once(':')?;
    if a.is_empty() || b.is_empty() || b.contains(':') {
        return None;
    }
    Some((a, b))
}

/// Owns the proxy list and the rotation index
#[derive(Debug, Default)]
pub struct ProxyRotator {
    proxies: Vec<ProxyEntry>,
    index: AtomicUsize,
}

impl ProxyRotator {
    pub fn new(proxies: Vec<ProxyEntry>) -> Self {
        Self {
            proxies,
            index: AtomicUsize::new(0),
        }
    }

    /// Load proxies from a file.
    ///
    /// A missing or empty file is not an error: the rotator is created empty
    /// and every call goes out directly.
    pub fn load_from_file(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "Proxy file {} not readable ({}). Will proceed without proxies.",
                    path.display(),
                    e
                );
                return Self::default();
            }
        };

        let mut proxies = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match ProxyEntry::parse(line) {
                Some(entry) => proxies.push(entry),
                None => warn!("Skipping unparseable proxy on line {}", lineno + 1),
            }
        }

        if proxies.is_empty() {
            warn!("No proxies found in the proxy file. Will proceed without proxies.");
        } else {
            info!("Loaded {} proxies from {}", proxies.len(), path.display());
        }

        Self::new(proxies)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Next proxy in rotation, wrapping at the end. `None` when no proxies are configured.
    pub fn next(&self) -> Option<ProxyEntry> {
        if self.proxies.is_empty() {
            return None;
        }

        let len = self.proxies.len();
        let current = self
            .index
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % len))
            .unwrap_or(0);

        self.proxies.get(current % len).cloned()
    }

    /// Transport handle for a single outbound call, taken from the next proxy.
    ///
    /// Never cached: consecutive calls fan out across the whole list.
    pub fn build_transport_agent(&self) -> Option<reqwest::Proxy> {
        let entry = self.next()?;
        match entry.to_transport() {
            Ok(proxy) => {
                debug!("Using proxy: {}", entry);
                Some(proxy)
            }
            Err(e) => {
                warn!("Ignoring proxy {}: {}", entry, e);
                None
            }
        }
    }

    /// HTTP client routed through the next proxy (or direct when none)
    pub fn http_client(&self, timeout: Option<Duration>) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = self.build_transport_agent() {
            builder = builder.proxy(proxy);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| Error::Proxy(format!("Failed to build HTTP client: {}", e)))
    }
}
