//! Egress proxy handling
//!
//! Proxies are loaded once from a line-oriented file and handed out
//! round-robin, one per outbound HTTP call.

pub mod rotator;

pub use rotator::{ProxyAuth, ProxyEntry, ProxyRotator};
