//! Retrieval of authoritative results files.

use scraper::Html;
use swim_common::checksum::{file_sha256, sha256_hex};
use tracing::{debug, info};
use url::Url;

use crate::error::{IngestError, Result};
use crate::html::{selector, text_of};
use crate::http::SourceClient;
use crate::mount::{lenex_filename, FileMount};

/// Result of looking for an event's results file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Stored {
        filename: String,
        /// `None` when the file was already on the mount
        url: Option<String>,
        checksum: String,
    },
    NotFound(String),
}

/// Link to the event's results file on its program page.
///
/// The link is an `<a target="_blank">LENEX</a>` whose href points below
/// `/file/` and names the event with `?event=<id>`.
pub fn find_lenex_link(html: &str, event_id: i64, base_url: &Url) -> Result<Option<Url>> {
    let document = Html::parse_document(html);
    let anchors = selector("a[href][target=\"_blank\"]")?;
    let marker = format!("?event={}", event_id);

    let href = document
        .select(&anchors)
        .filter(|a| text_of(*a) == "LENEX")
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.starts_with("/file/") && href.contains(&marker));

    match href {
        Some(href) => base_url
            .join(href)
            .map(Some)
            .map_err(|e| IngestError::parse(format!("invalid results file link {}: {}", href, e))),
        None => Ok(None),
    }
}

pub struct Fetcher {
    client: SourceClient,
    mount: FileMount,
}

impl Fetcher {
    pub fn new(client: SourceClient, mount: FileMount) -> Self {
        Self { client, mount }
    }

    /// Store the results file of `event_id` on the mount.
    ///
    /// A file left by an earlier run that stored it but did not record it is
    /// reused without contacting the site.
    pub async fn fetch(&self, event_id: i64) -> Result<FetchOutcome> {
        let filename = lenex_filename(event_id);

        if self.mount.exists(&filename).await? {
            let path = self.mount.path_for(&filename);
            let checksum = tokio::task::spawn_blocking(move || file_sha256(path))
                .await
                .map_err(|e| IngestError::Io(std::io::Error::other(e)))??;
            info!(event_id, %filename, "Results file already stored, reusing");
            return Ok(FetchOutcome::Stored {
                filename,
                url: None,
                checksum,
            });
        }

        let program_url = self
            .client
            .join(&format!("/event/program?OnlineEventId={}", event_id))?;
        let html = match self.client.get_text(&program_url).await {
            Ok(html) => html,
            Err(IngestError::NotFound(_)) => {
                return Ok(FetchOutcome::NotFound(format!("no program page at {}", program_url)));
            },
            Err(e) => return Err(e),
        };

        let Some(file_url) = find_lenex_link(&html, event_id, self.client.base_url())? else {
            debug!(event_id, "Program page has no results file link");
            return Ok(FetchOutcome::NotFound("no LENEX link on program page".to_string()));
        };

        let bytes = match self.client.get_bytes(&file_url).await {
            Ok(bytes) => bytes,
            Err(IngestError::NotFound(_)) => {
                return Ok(FetchOutcome::NotFound(format!("results file link is dead: {}", file_url)));
            },
            Err(e) => return Err(e),
        };

        self.mount.write_atomic(&filename, &bytes).await?;
        info!(event_id, %filename, bytes = bytes.len(), "Results file downloaded");

        Ok(FetchOutcome::Stored {
            filename,
            url: Some(file_url.to_string()),
            checksum: sha256_hex(&bytes),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PROGRAM: &str = include_str!("../tests/fixtures/program.html");

    fn fetcher_for(server: &MockServer, dir: &TempDir) -> Fetcher {
        let config = SourceConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            max_retries: 2,
            user_agent: "swim-ingest-test".to_string(),
        };
        let client = SourceClient::new(&config)
            .unwrap()
            .with_backoff(Duration::from_millis(5));
        Fetcher::new(client, FileMount::new(dir.path()))
    }

    #[test]
    fn test_find_lenex_link() {
        let base = Url::parse("https://live.musz.hu").unwrap();
        let link = find_lenex_link(PROGRAM, 1201, &base).unwrap().unwrap();
        assert_eq!(link.as_str(), "https://live.musz.hu/file/lenex/1201?event=1201");
    }

    #[test]
    fn test_find_lenex_link_other_event() {
        let base = Url::parse("https://live.musz.hu").unwrap();
        assert_eq!(find_lenex_link(PROGRAM, 999, &base).unwrap(), None);
    }

    #[test]
    fn test_find_lenex_link_requires_new_tab_anchor() {
        let base = Url::parse("https://live.musz.hu").unwrap();
        let html = r#"<a href="/file/lenex/5?event=5">LENEX</a>"#;
        assert_eq!(find_lenex_link(html, 5, &base).unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_downloads_and_stores() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/event/program"))
            .and(query_param("OnlineEventId", "1201"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PROGRAM))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/lenex/1201"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<LENEX/>".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server, &dir);
        let outcome = fetcher.fetch(1201).await.unwrap();

        match outcome {
            FetchOutcome::Stored { filename, url, checksum } => {
                assert_eq!(filename, "event_1201.lef");
                assert!(url.unwrap().ends_with("/file/lenex/1201?event=1201"));
                assert_eq!(checksum, sha256_hex(b"<LENEX/>"));
            },
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(std::fs::read(dir.path().join("event_1201.lef")).unwrap(), b"<LENEX/>");
    }

    #[tokio::test]
    async fn test_fetch_without_link_is_not_found() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/event/program"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>Program</body></html>"))
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server, &dir);
        assert!(matches!(fetcher.fetch(42).await.unwrap(), FetchOutcome::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_transient() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server, &dir);
        let err = fetcher.fetch(42).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!dir.path().join("event_42.lef").exists());
    }

    #[tokio::test]
    async fn test_fetch_reuses_stored_file() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("event_7.lef"), b"cached").unwrap();

        let fetcher = fetcher_for(&server, &dir);
        let outcome = fetcher.fetch(7).await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Stored {
                filename: "event_7.lef".to_string(),
                url: None,
                checksum: sha256_hex(b"cached"),
            }
        );
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
