//! Off-site copies of stored results files.
//!
//! Objects are keyed by content: `<prefix>/<sha256>/<filename>`. A key that
//! already exists holds the same bytes, so uploads are skipped rather than
//! repeated.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::config::{ArchiveBackend, ArchiveConfig};
use crate::error::{IngestError, Result};

mod s3;

pub use s3::S3Archive;

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Store `bytes` under `key` unless the key exists.
    ///
    /// Returns `true` when an upload happened.
    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool>;

    /// Human readable target, for logs
    fn describe(&self) -> String;
}

pub fn object_key(prefix: &str, checksum: &str, filename: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", checksum, filename)
    } else {
        format!("{}/{}/{}", prefix, checksum, filename)
    }
}

/// Build the configured archive backend
pub async fn from_config(config: &ArchiveConfig) -> Result<Box<dyn ArchiveStore>> {
    match config.backend {
        ArchiveBackend::S3 => Ok(Box::new(S3Archive::new(&config.s3).await?)),
        ArchiveBackend::Local => {
            let dir = config
                .dir
                .clone()
                .ok_or_else(|| IngestError::Config("ARCHIVE_DIR is not set".to_string()))?;
            Ok(Box::new(LocalArchive::new(dir)))
        },
    }
}

/// Archive into a directory, typically a mounted network share
#[derive(Debug, Clone)]
pub struct LocalArchive {
    root: PathBuf,
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArchiveStore for LocalArchive {
    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool> {
        let target = self.root.join(key);
        if fs::try_exists(&target).await? {
            debug!(path = %target.display(), "Archive object exists");
            return Ok(false);
        }

        let parent = target
            .parent()
            .ok_or_else(|| IngestError::Archive(format!("invalid object key {}", key)))?;
        let temp = target.with_extension("part");

        let stored: std::io::Result<()> = async {
            fs::create_dir_all(parent).await?;
            fs::write(&temp, &bytes).await?;
            fs::rename(&temp, &target).await
        }
        .await;

        stored.map_err(|e| IngestError::Archive(format!("{}: {}", target.display(), e)))?;
        Ok(true)
    }

    fn describe(&self) -> String {
        format!("dir://{}", self.root.display())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("lenex", "abc", "event_1.lef"), "lenex/abc/event_1.lef");
        assert_eq!(object_key("/lenex/", "abc", "event_1.lef"), "lenex/abc/event_1.lef");
        assert_eq!(object_key("", "abc", "event_1.lef"), "abc/event_1.lef");
    }

    #[tokio::test]
    async fn test_local_archive_uploads_once() {
        let dir = TempDir::new().unwrap();
        let archive = LocalArchive::new(dir.path());
        let key = object_key("lenex", "abc", "event_1.lef");

        assert!(archive.put_if_absent(&key, b"first".to_vec()).await.unwrap());
        assert!(!archive.put_if_absent(&key, b"second".to_vec()).await.unwrap());

        let stored = std::fs::read(dir.path().join("lenex/abc/event_1.lef")).unwrap();
        assert_eq!(stored, b"first");
    }

    #[tokio::test]
    async fn test_local_backend_requires_dir() {
        let config = ArchiveConfig {
            backend: ArchiveBackend::Local,
            dir: None,
            ..crate::config::Config::default().archive
        };
        assert!(matches!(from_config(&config).await, Err(IngestError::Config(_))));
    }
}
