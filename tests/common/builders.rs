use reel_tv::player::SubtitleDescriptor;
use serde_json::{Value, json};

pub struct DescriptorBuilder {
    index: i64,
    language: Option<String>,
    codec: Option<String>,
    external: bool,
    forced: bool,
    delivery_url: Option<String>,
}

impl DescriptorBuilder {
    pub fn embedded(index: i64, language: &str) -> Self {
        Self {
            index,
            language: Some(language.to_string()),
            codec: Some("subrip".to_string()),
            external: false,
            forced: false,
            delivery_url: None,
        }
    }

    pub fn external(index: i64, language: &str) -> Self {
        Self {
            external: true,
            ..Self::embedded(index, language)
        }
    }

    pub fn with_codec(mut self, codec: &str) -> Self {
        self.codec = Some(codec.to_string());
        self
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    pub fn with_delivery_url(mut self, url: &str) -> Self {
        self.delivery_url = Some(url.to_string());
        self
    }

    pub fn build(self) -> SubtitleDescriptor {
        let mut descriptor = SubtitleDescriptor::new(self.index, self.language.as_deref(), self.external);
        descriptor.codec = self.codec;
        descriptor.is_forced = self.forced;
        descriptor.delivery_url = self.delivery_url;
        descriptor
    }

    /// The same stream as a Jellyfin `MediaStreams` entry
    pub fn to_media_stream(&self) -> Value {
        json!({
            "Type": "Subtitle",
            "Index": self.index,
            "Language": self.language,
            "Codec": self.codec,
            "IsExternal": self.external,
            "IsForced": self.forced,
            "DeliveryUrl": self.delivery_url,
        })
    }
}

/// A `PlaybackInfo` response with one media source
pub fn playback_info(source_id: &str, streams: &[DescriptorBuilder]) -> String {
    let mut media_streams = vec![json!({"Type": "Video", "Index": 0, "Codec": "hevc"})];
    media_streams.extend(streams.iter().map(DescriptorBuilder::to_media_stream));

    json!({
        "MediaSources": [{
            "Id": source_id,
            "MediaStreams": media_streams,
        }]
    })
    .to_string()
}
