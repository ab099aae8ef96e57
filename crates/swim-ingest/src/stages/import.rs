use async_trait::async_trait;
use sqlx::PgConnection;
use swim_common::DataSource;
use tracing::info;

use super::{Advance, Stage};
use crate::affiliation::rebuild_timelines;
use crate::error::Result;
use crate::lenex::parse_lenex;
use crate::mount::{lenex_filename, FileMount};
use crate::registry::{FileStatus, TrackedFile};
use crate::store::apply_meet;

/// `backed_up` → `processed`
///
/// Parse errors and constraint violations roll the whole meet back and mark
/// the entry `processing_failed`.
pub struct ImportStage {
    mount: FileMount,
}

impl ImportStage {
    pub fn new(mount: FileMount) -> Self {
        Self { mount }
    }
}

#[async_trait]
impl Stage for ImportStage {
    type Prepared = ();

    fn name(&self) -> &'static str {
        "import"
    }

    fn input(&self) -> FileStatus {
        FileStatus::BackedUp
    }

    fn failure(&self) -> Option<FileStatus> {
        Some(FileStatus::ProcessingFailed)
    }

    async fn prepare(&self, _entry: &TrackedFile) -> Result<()> {
        Ok(())
    }

    async fn process(&self, conn: &mut PgConnection, entry: &TrackedFile, _prepared: ()) -> Result<Advance> {
        let filename = entry
            .filename
            .clone()
            .unwrap_or_else(|| lenex_filename(entry.event_id));
        let bytes = self.mount.read(&filename).await?;

        let results = parse_lenex(&bytes, entry.event_id)?;
        if results.skipped > 0 {
            info!(event_id = entry.event_id, skipped = results.skipped, "Unresolvable results skipped");
        }

        let summary = apply_meet(conn, &results, DataSource::Authoritative).await?;
        let intervals = rebuild_timelines(conn, &summary.affected_athletes).await?;

        info!(
            event_id = entry.event_id,
            results = summary.results,
            relays = summary.relays,
            athletes = summary.affected_athletes.len(),
            intervals,
            "Meet imported"
        );
        Ok(Advance::to(FileStatus::Processed))
    }
}
