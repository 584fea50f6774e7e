//! Credential loading
//!
//! Credentials are opaque strings at this layer: private keys in any of the
//! supported encodings or mnemonic phrases. Interpretation happens in
//! [`super::keys`].

use std::path::Path;

use tracing::{info, warn};

use crate::error::{Error, Result};

/// Load one credential per line from `path`.
///
/// Blank lines and `#` comments are skipped. A missing file yields an empty
/// list and a warning; whether that is fatal is decided by the caller.
pub fn load_credentials(path: &Path) -> Vec<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Wallet file {} not readable: {}", path.display(), e);
            return Vec::new();
        }
    };

    let wallets: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    info!("Loaded {} wallet(s) from {}", wallets.len(), path.display());
    wallets
}

/// Load a single credential: the whole trimmed file content.
pub fn load_single_credential(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let credential = content.trim();
            if credential.is_empty() {
                warn!("Credential file {} is empty", path.display());
                None
            } else {
                info!("Using wallet from {}", path.display());
                Some(credential.to_string())
            }
        }
        Err(_) => None,
    }
}

/// Merge wallet-file credentials with the optional single credential.
///
/// Order is preserved and exact duplicates dropped. Returns
/// [`Error::NoCredentials`] when nothing is left.
pub fn combine_credentials(
    wallets: Vec<String>,
    single: Option<String>,
) -> Result<Vec<String>> {
    let mut combined: Vec<String> = Vec::with_capacity(wallets.len() + 1);
    for credential in wallets.into_iter().chain(single) {
        if !combined.contains(&credential) {
            combined.push(credential);
        }
    }

    if combined.is_empty() {
        return Err(Error::NoCredentials);
    }
    Ok(combined)
}
