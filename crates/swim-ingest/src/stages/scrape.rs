use async_trait::async_trait;
use sqlx::PgConnection;
use swim_common::DataSource;
use tracing::info;

use super::{Advance, Stage};
use crate::affiliation::rebuild_timelines;
use crate::error::Result;
use crate::normalized::MeetResults;
use crate::registry::{FileStatus, TrackedFile};
use crate::scraper::Scraper;
use crate::store::{apply_meet, lock_meet_source};

/// `lenex_not_found` → `scraped` | `scrape_failed`
///
/// Pages are fetched before the entry is claimed; only the schema write runs
/// inside the claim transaction.
pub struct ScrapeStage {
    scraper: Scraper,
}

impl ScrapeStage {
    pub fn new(scraper: Scraper) -> Self {
        Self { scraper }
    }
}

#[async_trait]
impl Stage for ScrapeStage {
    type Prepared = MeetResults;

    fn name(&self) -> &'static str {
        "scrape"
    }

    fn input(&self) -> FileStatus {
        FileStatus::LenexNotFound
    }

    fn failure(&self) -> Option<FileStatus> {
        Some(FileStatus::ScrapeFailed)
    }

    async fn prepare(&self, entry: &TrackedFile) -> Result<MeetResults> {
        self.scraper.scrape_meet(entry.event_id).await
    }

    async fn process(
        &self,
        conn: &mut PgConnection,
        entry: &TrackedFile,
        results: MeetResults,
    ) -> Result<Advance> {
        // Scraped data never replaces a meet imported from its results file.
        if lock_meet_source(conn, entry.event_id).await? == Some(DataSource::Authoritative) {
            info!(event_id = entry.event_id, "Meet already imported from results file, left as is");
            return Ok(Advance::to(FileStatus::Scraped));
        }

        let summary = apply_meet(conn, &results, DataSource::Scraped).await?;
        rebuild_timelines(conn, &summary.affected_athletes).await?;

        info!(
            event_id = entry.event_id,
            results = summary.results,
            splits = summary.splits,
            "Meet scraped into schema"
        );
        Ok(Advance::to(FileStatus::Scraped))
    }
}
