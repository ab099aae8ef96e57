use async_trait::async_trait;
use sqlx::PgConnection;
use swim_common::checksum::sha256_hex;
use tracing::{debug, info};

use super::{Advance, Stage};
use crate::archive::{object_key, ArchiveStore};
use crate::error::{IngestError, Result};
use crate::mount::{lenex_filename, FileMount};
use crate::registry::{EntryUpdate, FileStatus, TrackedFile};

/// `downloaded` → `backed_up`
///
/// The upload happens while the entry is claimed, so two runs never upload
/// the same entry.
pub struct ArchiveStage {
    store: Box<dyn ArchiveStore>,
    mount: FileMount,
    prefix: String,
}

impl ArchiveStage {
    pub fn new(store: Box<dyn ArchiveStore>, mount: FileMount, prefix: impl Into<String>) -> Self {
        Self {
            store,
            mount,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Stage for ArchiveStage {
    type Prepared = ();

    fn name(&self) -> &'static str {
        "backup"
    }

    fn input(&self) -> FileStatus {
        FileStatus::Downloaded
    }

    fn failure(&self) -> Option<FileStatus> {
        Some(FileStatus::ProcessingFailed)
    }

    async fn prepare(&self, _entry: &TrackedFile) -> Result<()> {
        Ok(())
    }

    async fn process(&self, _conn: &mut PgConnection, entry: &TrackedFile, _prepared: ()) -> Result<Advance> {
        let filename = entry
            .filename
            .clone()
            .unwrap_or_else(|| lenex_filename(entry.event_id));
        let bytes = self.mount.read(&filename).await?;

        let checksum = sha256_hex(&bytes);
        if let Some(recorded) = &entry.checksum {
            if *recorded != checksum {
                return Err(IngestError::parse(format!(
                    "{} changed since download: checksum {} != {}",
                    filename, checksum, recorded
                )));
            }
        }

        let key = object_key(&self.prefix, &checksum, &filename);
        let uploaded = self.store.put_if_absent(&key, bytes).await?;
        if uploaded {
            info!(event_id = entry.event_id, %key, target = %self.store.describe(), "Archived");
        } else {
            debug!(event_id = entry.event_id, %key, "Already archived");
        }

        Ok(Advance::with(
            FileStatus::BackedUp,
            EntryUpdate {
                checksum: Some(checksum),
                ..EntryUpdate::default()
            },
        ))
    }
}
