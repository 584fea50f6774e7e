//! Failed-units file
//!
//! One wallet identity per line, fully rewritten after every batch. Blank
//! and `#` lines are ignored. A missing file means no known failures.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::wallet::WalletIdentity;

/// Identities whose workflows failed, kept sorted so the file is deterministic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedUnitSet(BTreeSet<WalletIdentity>);

impl FailedUnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: WalletIdentity) -> bool {
        self.0.insert(identity)
    }

    pub fn contains(&self, identity: &WalletIdentity) -> bool {
        self.0.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WalletIdentity> {
        self.0.iter()
    }

    fn parse(content: &str) -> Self {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(WalletIdentity::new)
            .collect()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for identity in &self.0 {
            out.push_str(identity.as_str());
            out.push('\n');
        }
        out
    }
}

impl FromIterator<WalletIdentity> for FailedUnitSet {
    fn from_iter<I: IntoIterator<Item = WalletIdentity>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Reads and rewrites the failed-units file
#[derive(Debug, Clone)]
pub struct FailedUnitStore {
    path: PathBuf,
}

impl FailedUnitStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents; a missing file is an empty set
    pub async fn load(&self) -> Result<FailedUnitSet> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let set = FailedUnitSet::parse(&content);
                debug!("Loaded {} failed wallet(s) from {}", set.len(), self.path.display());
                Ok(set)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FailedUnitSet::new()),
            Err(e) => Err(Error::Persistence(format!("{}: {}", self.path.display(), e))),
        }
    }

    /// Overwrite the file with `set`; an empty set removes it
    pub async fn persist(&self, set: &FailedUnitSet) -> Result<()> {
        if set.is_empty() {
            return self.clear().await;
        }

        tokio::fs::write(&self.path, set.render())
            .await
            .map_err(|e| Error::Persistence(format!("{}: {}", self.path.display(), e)))?;
        info!("Saved {} failed wallet(s) to {}", set.len(), self.path.display());
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Removed {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!("{}: {}", self.path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::assert_ok;

    fn set(ids: &[&str]) -> FailedUnitSet {
        ids.iter().map(|id| WalletIdentity::new(*id)).collect()
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = FailedUnitStore::new(dir.path().join("failed_wallets.txt"));
        assert!(store.load().await.unwrap().is_empty());
        assert_ok!(store.clear().await);
    }

    #[tokio::test]
    async fn test_persist_overwrites_sorted() {
        let dir = tempdir().unwrap();
        let store = FailedUnitStore::new(dir.path().join("failed_wallets.txt"));

        store.persist(&set(&["0xcc", "0xaa", "0xbb"])).await.unwrap();
        store.persist(&set(&["0xbb", "0xaa"])).await.unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content, "0xaa\n0xbb\n");
        assert_eq!(store.load().await.unwrap(), set(&["0xaa", "0xbb"]));
    }

    #[tokio::test]
    async fn test_empty_set_deletes_file() {
        let dir = tempdir().unwrap();
        let store = FailedUnitStore::new(dir.path().join("failed_wallets.txt"));

        store.persist(&set(&["0xaa"])).await.unwrap();
        assert!(store.path().exists());

        store.persist(&FailedUnitSet::new()).await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_load_ignores_blank_and_comment_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed_wallets.txt");
        std::fs::write(&path, "# failed last run\n\n0xbb\n  \n0xaa  \n  # 0xcc\n0xbb\n").unwrap();

        let loaded = FailedUnitStore::new(&path).load().await.unwrap();
        assert_eq!(loaded, set(&["0xaa", "0xbb"]));
    }
}
