//! Storage mount shared by the fetcher, archiver and importer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{IngestError, Result};

/// Name a fetched results file is stored under.
pub fn lenex_filename(event_id: i64) -> String {
    format!("event_{}.lef", event_id)
}

#[derive(Debug, Clone)]
pub struct FileMount {
    root: PathBuf,
}

impl FileMount {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub async fn exists(&self, filename: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(filename)).await?)
    }

    /// Write `bytes` so that `filename` either does not exist or is complete.
    ///
    /// The data goes to `<filename>.tmp` first and is renamed into place; a
    /// failed write removes the temporary file.
    pub async fn write_atomic(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).await?;

        let target = self.path_for(filename);
        let temp = self.path_for(&format!("{}.tmp", filename));

        let written: std::io::Result<()> = async {
            fs::write(&temp, bytes).await?;
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(path = %target.display(), bytes = bytes.len(), "Stored file written");
        Ok(target)
    }

    /// Read a stored file; a missing file is [`IngestError::MissingFile`].
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self.path_for(filename);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(IngestError::MissingFile(path)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let mount = FileMount::new(dir.path().join("lenex_files"));

        let path = mount.write_atomic("event_7.lef", b"<LENEX/>").await.unwrap();

        assert_eq!(path, dir.path().join("lenex_files/event_7.lef"));
        assert!(mount.exists("event_7.lef").await.unwrap());
        assert!(!mount.exists("event_7.lef.tmp").await.unwrap());
        assert_eq!(mount.read("event_7.lef").await.unwrap(), b"<LENEX/>");
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let mount = FileMount::new(dir.path());

        mount.write_atomic("event_7.lef", b"old").await.unwrap();
        mount.write_atomic("event_7.lef", b"new").await.unwrap();
        assert_eq!(mount.read("event_7.lef").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_missing_file_is_classified() {
        let dir = TempDir::new().unwrap();
        let mount = FileMount::new(dir.path());

        let err = mount.read("event_9.lef").await.unwrap_err();
        assert!(matches!(err, IngestError::MissingFile(_)));
        assert!(err.marks_failed());
    }

    #[test]
    fn test_lenex_filename() {
        assert_eq!(lenex_filename(1201), "event_1201.lef");
    }
}
