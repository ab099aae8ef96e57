//! HTTP access to the results website.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SourceConfig;
use crate::error::{IngestError, Result};

/// Delay before the first retry; doubled for each further attempt
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Client for the results website with retry and exponential backoff
#[derive(Debug, Clone)]
pub struct SourceClient {
    client: Client,
    base_url: Url,
    max_retries: u32,
    backoff: Duration,
}

impl SourceClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| IngestError::Config(format!("invalid base URL {}: {}", config.base_url, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| IngestError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            max_retries: config.max_retries.max(1),
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Override the initial retry delay
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a site-relative link such as `/event/program?OnlineEventId=1`.
    pub fn join(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| IngestError::parse(format!("invalid link {}: {}", path, e)))
    }

    pub async fn get_text(&self, url: &Url) -> Result<String> {
        let bytes = self.get_bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Fetch `url`, retrying transient failures.
    ///
    /// A 404 is definitive and returned as [`IngestError::NotFound`] without
    /// retrying. Once attempts are exhausted the last error is returned as
    /// [`IngestError::Network`].
    pub async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.get_once(url).await {
                Ok(bytes) => {
                    debug!(%url, bytes = bytes.len(), "Fetched");
                    return Ok(bytes);
                },
                Err(e @ IngestError::NotFound(_)) => return Err(e),
                Err(e) => {
                    warn!(%url, attempt, max = self.max_retries, error = %e, "Request failed");
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        let delay = self.backoff * 2u32.pow(attempt - 1);
                        info!("Retrying in {:?}...", delay);
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| IngestError::Network(format!("no attempt made for {}", url))))
    }

    async fn get_once(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(IngestError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(IngestError::Network(format!("HTTP {} for {}", status, url)));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, retries: u32) -> SourceClient {
        let config = SourceConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            max_retries: retries,
            user_agent: "swim-ingest-test".to_string(),
        };
        SourceClient::new(&config)
            .unwrap()
            .with_backoff(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_get_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        let url = client.join("/index").unwrap();
        assert_eq!(client.get_text(&url).await.unwrap(), "<html>ok</html>");
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        let url = client.join("/missing").unwrap();
        let err = client.get_bytes(&url).await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_server_error_retried_then_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        let url = client.join("/flaky").unwrap();
        let err = client.get_bytes(&url).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_recovers_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"LEF".to_vec()))
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        let url = client.join("/file").unwrap();
        assert_eq!(client.get_bytes(&url).await.unwrap(), b"LEF");
    }
}
