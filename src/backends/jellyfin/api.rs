use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use crate::backends::traits::{MediaRef, MediaUrls, SubtitleCatalog};
use crate::config::Config;
use crate::player::subtitles::{SubtitleDescriptor, descriptor};

const JELLYFIN_CLIENT_NAME: &str = "Reel TV";
const JELLYFIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Characters left as-is inside a path segment
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

#[derive(Clone)]
pub struct JellyfinApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    user_id: String,
    device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlaybackInfoResponse {
    #[serde(default)]
    media_sources: Vec<MediaSourceInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MediaSourceInfo {
    id: String,
    #[serde(default)]
    media_streams: serde_json::Value,
}

impl JellyfinApi {
    pub fn new(base_url: &str, api_key: String, user_id: String, timeout: Duration) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("Invalid server URL: {}", base_url))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            user_id,
            device_id: Uuid::new_v4().to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let server = &config.server;
        if server.url.is_empty() {
            return Err(anyhow!("No server configured"));
        }
        let api_key = server.access_token.clone().context("No access token configured")?;
        Self::new(
            &server.url,
            api_key,
            server.user_id.clone().unwrap_or_default(),
            Duration::from_secs(config.network.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_auth_header(&self) -> String {
        format!(
            r#"MediaBrowser Client="{}", Device="Android TV", DeviceId="{}", Version="{}", Token="{}""#,
            JELLYFIN_CLIENT_NAME, self.device_id, JELLYFIN_VERSION, self.api_key
        )
    }

    fn segment(value: &str) -> String {
        utf8_percent_encode(value, SEGMENT).to_string()
    }

    fn absolute(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else if path_or_url.starts_with('/') {
            format!("{}{}", self.base_url, path_or_url)
        } else {
            format!("{}/{}", self.base_url, path_or_url)
        }
    }
}

impl MediaUrls for JellyfinApi {
    fn direct_play_url(&self, media: &MediaRef) -> String {
        format!(
            "{}/Videos/{}/stream?Static=true&mediaSourceId={}&api_key={}",
            self.base_url,
            Self::segment(&media.item_id),
            Self::segment(media.source_id()),
            self.api_key
        )
    }

    fn transcode_url(&self, media: &MediaRef, max_bitrate: Option<u64>) -> String {
        let mut url = format!(
            "{}/Videos/{}/main.m3u8?mediaSourceId={}&api_key={}",
            self.base_url,
            Self::segment(&media.item_id),
            Self::segment(media.source_id()),
            self.api_key
        );
        if let Some(bitrate) = max_bitrate {
            url.push_str(&format!("&maxStreamingBitrate={}", bitrate));
        }
        url
    }

    fn subtitle_urls(&self, media: &MediaRef, descriptor: &SubtitleDescriptor, format: &str) -> Vec<String> {
        let item = Self::segment(&media.item_id);
        let source = Self::segment(media.source_id());
        let index = descriptor.index;
        let base = &self.base_url;

        let mut urls = Vec::with_capacity(5);
        if let Some(delivery) = descriptor.delivery_url.as_deref().filter(|u| !u.is_empty()) {
            urls.push(self.absolute(delivery));
        }
        urls.push(format!("{base}/Videos/{item}/{source}/Subtitles/{index}/0/Stream.{format}"));
        urls.push(format!("{base}/Videos/{item}/{source}/Subtitles/{index}/Stream.{format}"));
        urls.push(format!("{base}/Videos/{item}/Subtitles/{index}/Stream.{format}"));
        urls.push(format!("{base}/Items/{item}/Subtitles/{index}/Stream.{format}"));
        urls.dedup();
        urls
    }

    fn auth_headers(&self) -> Vec<(String, String)> {
        vec![("X-Emby-Authorization".to_string(), self.get_auth_header())]
    }
}

#[async_trait]
impl SubtitleCatalog for JellyfinApi {
    async fn subtitle_streams(&self, media: &MediaRef) -> Result<Vec<SubtitleDescriptor>> {
        let url = format!(
            "{}/Items/{}/PlaybackInfo?UserId={}",
            self.base_url,
            Self::segment(&media.item_id),
            Self::segment(&self.user_id)
        );
        debug!("Fetching playback info from {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Emby-Authorization", self.get_auth_header())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("PlaybackInfo failed with status {}: {}", status, body);
            return Err(anyhow!("Failed to get playback info: {}", status));
        }

        let info: PlaybackInfoResponse = response.json().await?;
        let source = info
            .media_sources
            .iter()
            .find(|s| s.id == media.source_id())
            .or_else(|| info.media_sources.first())
            .ok_or_else(|| anyhow!("No media sources for item {}", media.item_id))?;

        Ok(descriptor::from_media_streams(&source.media_streams)?)
    }
}
