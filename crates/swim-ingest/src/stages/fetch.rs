use async_trait::async_trait;
use sqlx::PgConnection;

use super::{Advance, Stage};
use crate::error::Result;
use crate::fetcher::{FetchOutcome, Fetcher};
use crate::registry::{EntryUpdate, FileStatus, TrackedFile};

/// `pending` → `downloaded` | `lenex_not_found`
pub struct FetchStage {
    fetcher: Fetcher,
}

impl FetchStage {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Stage for FetchStage {
    type Prepared = ();

    fn name(&self) -> &'static str {
        "fetch"
    }

    fn input(&self) -> FileStatus {
        FileStatus::Pending
    }

    fn failure(&self) -> Option<FileStatus> {
        None
    }

    async fn prepare(&self, _entry: &TrackedFile) -> Result<()> {
        Ok(())
    }

    async fn process(&self, _conn: &mut PgConnection, entry: &TrackedFile, _prepared: ()) -> Result<Advance> {
        match self.fetcher.fetch(entry.event_id).await? {
            FetchOutcome::Stored {
                filename,
                url,
                checksum,
            } => Ok(Advance::with(
                FileStatus::Downloaded,
                EntryUpdate {
                    filename: Some(filename),
                    url,
                    checksum: Some(checksum),
                    last_error: None,
                },
            )),
            FetchOutcome::NotFound(reason) => Ok(Advance::with(
                FileStatus::LenexNotFound,
                EntryUpdate::failed(reason),
            )),
        }
    }
}
