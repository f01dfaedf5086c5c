//! services/api/src/adapters/fetcher.rs
//!
//! `reqwest`-backed implementation of the `HttpTransport` port.

use async_trait::async_trait;
use newsgenie_core::ports::{HttpResponse, HttpTransport, PortError, PortResult};
use std::time::Duration;

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ReqwestTransport {
    /// Bodies longer than `max_body_bytes` are refused rather than buffered.
    pub fn new(max_body_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client, max_body_bytes })
    }

    fn too_large(&self, url: &str) -> PortError {
        PortError::Validation(format!(
            "{} is larger than the {} byte page limit",
            url, self.max_body_bytes
        ))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(&str, &str)], timeout: Duration) -> PortResult<HttpResponse> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let mut response = request.send().await.map_err(|e| classify(url, e))?;
        let status = response.status().as_u16();
        if response
            .content_length()
            .is_some_and(|declared| declared > self.max_body_bytes as u64)
        {
            return Err(self.too_large(url));
        }

        // Chunked bodies have no declared length, so the cap is enforced while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| classify(url, e))? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

fn classify(url: &str, e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::UpstreamTimeout(format!("{}: {}", url, e))
    } else {
        PortError::UpstreamUnavailable(format!("{}: {}", url, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, body::Bytes, routing::get, Router};

    const LIMIT: usize = 1024;

    async fn serve() -> String {
        let app = Router::new()
            .route("/small", get(|| async { "<p>short</p>" }))
            .route("/big", get(|| async { "x".repeat(LIMIT + 1) }))
            .route(
                "/chunked",
                get(|| async {
                    let chunks = (0..4).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![b'y'; LIMIT / 2])));
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", address)
    }

    #[tokio::test]
    async fn bodies_within_the_limit_are_returned() {
        let base = serve().await;
        let transport = ReqwestTransport::new(LIMIT).unwrap();

        let response = transport
            .get(&format!("{}/small", base), &[], Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, "<p>short</p>");
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused_with_or_without_a_length() {
        let base = serve().await;
        let transport = ReqwestTransport::new(LIMIT).unwrap();

        for path in ["big", "chunked"] {
            let err = transport
                .get(&format!("{}/{}", base, path), &[], Duration::from_secs(5))
                .await
                .unwrap_err();
            assert!(matches!(err, PortError::Validation(_)), "{}: {:?}", path, err);
        }
    }
}
