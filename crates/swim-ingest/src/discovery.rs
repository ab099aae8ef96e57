//! Registry population from the results site index page.

use scraper::Html;
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::error::Result;
use crate::html::{query_value, selector, text_of};
use crate::http::SourceClient;
use crate::registry::{self, NewEntry};
use swim_common::time::parse_date_range;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub found: usize,
    pub inserted: usize,
    pub refreshed: usize,
}

/// Finished events listed on the index page.
///
/// A row qualifies when its first cell carries the check icon and its second
/// cell links to an `OnlineEventId`. The third cell holds the date range.
pub fn parse_index(html: &str, base_url: &url::Url) -> Result<Vec<NewEntry>> {
    let document = Html::parse_document(html);
    let rows = selector("tr")?;
    let cells = selector("td")?;
    let check_icon = selector("i.fas.fa-check")?;
    let link = selector("a[href]")?;

    let mut entries = Vec::new();
    for row in document.select(&rows) {
        let tds: Vec<_> = row.select(&cells).collect();
        if tds.len() < 3 || tds[0].select(&check_icon).next().is_none() {
            continue;
        }

        let Some(anchor) = tds[1].select(&link).next() else {
            continue;
        };
        let href = anchor.value().attr("href").unwrap_or_default();
        let Some(event_id) = query_value(base_url, href, "OnlineEventId").and_then(|id| id.parse::<i64>().ok())
        else {
            continue;
        };

        let (date_from, date_to) = match parse_date_range(&text_of(tds[2])) {
            Some((from, to)) => (Some(from), Some(to)),
            None => (None, None),
        };

        entries.push(NewEntry {
            event_id,
            event_name: text_of(anchor),
            date_from,
            date_to,
            source_url: base_url.join(href).ok().map(String::from),
        });
    }

    Ok(entries)
}

/// Fetch the index page and upsert every finished event into the registry.
#[instrument(skip_all)]
pub async fn run_discover(pool: &PgPool, client: &SourceClient) -> Result<DiscoveryReport> {
    let html = client.get_text(client.base_url()).await?;
    let entries = parse_index(&html, client.base_url())?;

    let mut report = DiscoveryReport {
        found: entries.len(),
        ..DiscoveryReport::default()
    };

    let mut conn = pool.acquire().await?;
    for entry in &entries {
        if registry::upsert_discovered(&mut conn, entry).await? {
            report.inserted += 1;
        } else {
            report.refreshed += 1;
        }
    }

    info!(
        found = report.found,
        inserted = report.inserted,
        refreshed = report.refreshed,
        "Discovery complete"
    );
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const INDEX: &str = include_str!("../tests/fixtures/index.html");

    #[test]
    fn test_parse_index_keeps_finished_events() {
        let base = url::Url::parse("https://live.musz.hu").unwrap();
        let entries = parse_index(INDEX, &base).unwrap();

        let ids: Vec<i64> = entries.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1201, 1202]);

        let first = &entries[0];
        assert_eq!(first.event_name, "Tavaszi Kupa");
        assert_eq!(first.date_from, NaiveDate::from_ymd_opt(2023, 6, 1));
        assert_eq!(first.date_to, NaiveDate::from_ymd_opt(2023, 6, 2));
        assert_eq!(
            first.source_url.as_deref(),
            Some("https://live.musz.hu/event/program?OnlineEventId=1201")
        );
    }

    #[test]
    fn test_unparseable_dates_are_left_empty() {
        let base = url::Url::parse("https://live.musz.hu").unwrap();
        let entries = parse_index(INDEX, &base).unwrap();
        let second = &entries[1];
        assert_eq!(second.date_from, None);
        assert_eq!(second.date_to, None);
    }
}
