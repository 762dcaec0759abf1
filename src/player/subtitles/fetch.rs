use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::player::error::{PlayerError, PlayerResult};

/// Downloads subtitle payloads, trying endpoint shapes in order
#[derive(Clone)]
pub struct SubtitleFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

/// A payload and the endpoint that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub url: String,
    pub body: Vec<u8>,
}

impl SubtitleFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> PlayerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlayerError::Io(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, max_bytes })
    }

    pub fn with_client(client: reqwest::Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Try each URL in order and return the first acceptable payload.
    ///
    /// Non-success statuses, transport errors, empty bodies and bodies above
    /// the size ceiling all move on to the next URL.
    pub async fn fetch_first(&self, urls: &[String], headers: &[(String, String)]) -> PlayerResult<Fetched> {
        let headers = build_headers(headers);

        for url in urls {
            match self.fetch_one(url, &headers).await {
                Ok(body) => {
                    info!("Fetched subtitle ({} bytes) from {}", body.len(), url);
                    return Ok(Fetched {
                        url: url.clone(),
                        body,
                    });
                }
                Err(e) => warn!("{}", e),
            }
        }

        Err(PlayerError::SubtitleFetchFailure {
            url: urls.last().cloned().unwrap_or_default(),
            reason: format!("all {} endpoints failed", urls.len()),
        })
    }

    async fn fetch_one(&self, url: &str, headers: &HeaderMap) -> PlayerResult<Vec<u8>> {
        let failure = |reason: String| PlayerError::SubtitleFetchFailure {
            url: url.to_string(),
            reason,
        };

        debug!("Requesting subtitle from {}", url);
        let mut response = self
            .client
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("HTTP {}", status)));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(failure(format!(
                    "payload of {} bytes exceeds the {} byte ceiling",
                    length, self.max_bytes
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| failure(e.to_string()))? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(failure(format!(
                    "payload exceeds the {} byte ceiling",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(failure("empty payload".to_string()));
        }
        Ok(body)
    }
}

fn build_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("Skipping invalid header {}", name),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(max: u64) -> SubtitleFetcher {
        SubtitleFetcher::new(Duration::from_secs(5), max).unwrap()
    }

    #[tokio::test]
    async fn test_falls_through_to_the_first_working_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let missing = server
            .mock("GET", "/a.srt")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let good = server
            .mock("GET", "/b.srt")
            .with_status(200)
            .with_body("1\n00:00:01,000 --> 00:00:02,000\nBonjour\n")
            .expect(1)
            .create_async()
            .await;
        let unused = server
            .mock("GET", "/c.srt")
            .expect(0)
            .create_async()
            .await;

        let urls = vec![
            format!("{}/a.srt", server.url()),
            format!("{}/b.srt", server.url()),
            format!("{}/c.srt", server.url()),
        ];
        let fetched = fetcher(1024).fetch_first(&urls, &[]).await.unwrap();

        assert_eq!(fetched.url, urls[1]);
        assert!(String::from_utf8(fetched.body).unwrap().contains("Bonjour"));
        missing.assert_async().await;
        good.assert_async().await;
        unused.assert_async().await;
    }

    #[tokio::test]
    async fn test_oversized_body_is_a_failure() {
        let mut server = mockito::Server::new_async().await;
        let _big = server
            .mock("GET", "/big.srt")
            .with_status(200)
            .with_body(vec![b'x'; 4096])
            .create_async()
            .await;

        let urls = vec![format!("{}/big.srt", server.url())];
        let err = fetcher(1024).fetch_first(&urls, &[]).await.unwrap_err();
        assert!(matches!(err, PlayerError::SubtitleFetchFailure { .. }));
    }

    #[tokio::test]
    async fn test_auth_headers_are_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/s.vtt")
            .match_header("x-emby-authorization", mockito::Matcher::Regex("Token=\"t0k\"".into()))
            .with_status(200)
            .with_body("WEBVTT\n")
            .create_async()
            .await;

        let urls = vec![format!("{}/s.vtt", server.url())];
        let headers = vec![(
            "X-Emby-Authorization".to_string(),
            r#"MediaBrowser Client="Reel", Token="t0k""#.to_string(),
        )];
        fetcher(1024).fetch_first(&urls, &headers).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_list_fails() {
        let err = fetcher(1024).fetch_first(&[], &[]).await.unwrap_err();
        assert!(err.is_subtitle_degradation());
    }
}
