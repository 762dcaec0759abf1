use anyhow::Result;
use async_trait::async_trait;

use crate::player::subtitles::SubtitleDescriptor;

/// One playable media source on the server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaRef {
    pub item_id: String,
    /// Defaults to the item id when the server has a single source
    pub media_source_id: Option<String>,
}

impl MediaRef {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            media_source_id: None,
        }
    }

    pub fn with_source(item_id: impl Into<String>, media_source_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            media_source_id: Some(media_source_id.into()),
        }
    }

    pub fn source_id(&self) -> &str {
        self.media_source_id.as_deref().unwrap_or(&self.item_id)
    }
}

/// URL builders and auth for a media server
pub trait MediaUrls: Send + Sync {
    fn direct_play_url(&self, media: &MediaRef) -> String;

    fn transcode_url(&self, media: &MediaRef, max_bitrate: Option<u64>) -> String;

    /// Candidate endpoints for one subtitle stream, in the order they should be tried
    fn subtitle_urls(&self, media: &MediaRef, descriptor: &SubtitleDescriptor, format: &str) -> Vec<String>;

    /// Headers attached to every subtitle request
    fn auth_headers(&self) -> Vec<(String, String)>;
}

/// Source of server-declared subtitle descriptors
#[async_trait]
pub trait SubtitleCatalog: Send + Sync {
    /// Subtitle streams of a media source, in delivery order
    async fn subtitle_streams(&self, media: &MediaRef) -> Result<Vec<SubtitleDescriptor>>;
}
