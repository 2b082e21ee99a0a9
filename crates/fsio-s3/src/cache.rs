use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

/// Read-through cache of downloaded objects, one file per object key.
///
/// Every open schedules the cached copy for deletion after `expiry`; the
/// handle already returned keeps working after the file is unlinked.
#[derive(Debug, Clone)]
pub(crate) struct DiskCache {
    dir: PathBuf,
    expiry: Duration,
}

impl DiskCache {
    pub(crate) fn new(dir: PathBuf, expiry: Duration) -> Self {
        Self { dir, expiry }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Cache file for `key`, named by the hex SHA-256 of the key.
    pub(crate) fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(hex::encode(Sha256::digest(key.as_bytes())))
    }

    pub(crate) fn schedule_eviction(&self, path: PathBuf) {
        let expiry = self.expiry;
        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "evicted cached object"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => debug!(path = %path.display(), error = %e, "cache eviction failed"),
            }
        });
    }

    /// Drop the cached copy of `key` so the next open fetches it again.
    pub(crate) async fn invalidate(&self, key: &str) {
        let path = self.path_for(key);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "cache invalidation failed");
            }
        }
    }
}
