//! Retrieval of raw article HTML.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::ports::{HttpTransport, PortError, PortResult};

/// Hard deadline for one page retrieval.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; NewGenieBot/1.0)";

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml";

/// Parses an absolute http(s) URL or fails with a validation error.
pub fn validate_article_url(raw: &str) -> PortResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|_| PortError::Validation(format!("invalid URL: {}", raw)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(PortError::Validation(format!(
            "only http and https URLs are accepted, got {}",
            other
        ))),
    }
}

pub struct ContentFetcher {
    transport: Arc<dyn HttpTransport>,
    user_agent: String,
}

impl ContentFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, user_agent: impl Into<String>) -> Self {
        Self {
            transport,
            user_agent: user_agent.into(),
        }
    }

    /// Downloads the page body. No retries: the caller owns retry policy.
    pub async fn fetch(&self, raw_url: &str) -> PortResult<String> {
        let url = validate_article_url(raw_url)?;
        let started = Instant::now();
        debug!(url = %url, "fetch starting");

        let headers = [("User-Agent", self.user_agent.as_str()), ("Accept", ACCEPT_HTML)];
        let response = tokio::time::timeout(
            FETCH_TIMEOUT,
            self.transport.get(url.as_str(), &headers, FETCH_TIMEOUT),
        )
        .await
        .map_err(|_| {
            warn!(url = %url, "fetch exceeded deadline");
            PortError::UpstreamTimeout(format!(
                "fetching {} took longer than {}s",
                url,
                FETCH_TIMEOUT.as_secs()
            ))
        })??;

        if !(200..300).contains(&response.status) {
            warn!(url = %url, status = response.status, "fetch returned non-success status");
            return Err(PortError::UpstreamUnavailable(format!(
                "{} answered with status {}",
                url, response.status
            )));
        }
        if response.body.trim().is_empty() {
            return Err(PortError::UpstreamUnavailable(format!("{} returned an empty body", url)));
        }

        info!(
            operation = "fetch",
            url = %url,
            bytes = response.body.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            outcome = "ok",
            "page fetched"
        );
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubTransport;

    #[test]
    fn rejects_relative_and_non_http_urls() {
        assert!(matches!(validate_article_url("news/123"), Err(PortError::Validation(_))));
        assert!(matches!(
            validate_article_url("ftp://example.com/a"),
            Err(PortError::Validation(_))
        ));
        assert!(validate_article_url("https://example.com/news/1").is_ok());
    }

    #[tokio::test]
    async fn returns_body_and_sends_user_agent() {
        let transport = Arc::new(StubTransport::ok("<html>hi</html>"));
        let fetcher = ContentFetcher::new(transport.clone(), "TestBot/1.0");

        let body = fetcher.fetch("https://example.com/a").await.unwrap();

        assert_eq!(body, "<html>hi</html>");
        let seen = transport.last_user_agent().unwrap();
        assert_eq!(seen, "TestBot/1.0");
    }

    #[tokio::test]
    async fn non_success_status_is_unavailable() {
        let fetcher = ContentFetcher::new(Arc::new(StubTransport::status(404, "gone")), DEFAULT_USER_AGENT);
        let err = fetcher.fetch("https://example.com/a").await.unwrap_err();
        assert!(matches!(err, PortError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn blank_body_is_unavailable() {
        let fetcher = ContentFetcher::new(Arc::new(StubTransport::ok("  \n ")), DEFAULT_USER_AGENT);
        let err = fetcher.fetch("https://example.com/a").await.unwrap_err();
        assert!(matches!(err, PortError::UpstreamUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_upstream_times_out() {
        let transport = StubTransport::ok("<html/>").with_latency(Duration::from_secs(30));
        let fetcher = ContentFetcher::new(Arc::new(transport), DEFAULT_USER_AGENT);
        let err = fetcher.fetch("https://example.com/a").await.unwrap_err();
        assert!(matches!(err, PortError::UpstreamTimeout(_)));
    }

    #[tokio::test]
    async fn invalid_url_never_reaches_transport() {
        let transport = Arc::new(StubTransport::ok("<html/>"));
        let fetcher = ContentFetcher::new(transport.clone(), DEFAULT_USER_AGENT);
        let err = fetcher.fetch("mailto:desk@example.com").await.unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
        assert_eq!(transport.calls(), 0);
    }
}
