use serde::{Deserialize, Serialize};

/// Server-declared subtitle stream. Immutable for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubtitleDescriptor {
    /// App-level stream index as declared by the server
    pub index: i64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub is_forced: bool,
    #[serde(default)]
    pub is_hearing_impaired: bool,
    #[serde(default)]
    pub display_title: Option<String>,
    /// Content-provided delivery path or URL, tried before every other endpoint
    #[serde(default)]
    pub delivery_url: Option<String>,
}

const TEXT_CODECS: &[&str] = &["srt", "subrip", "ass", "ssa", "vtt", "webvtt", "mov_text", "text", "ttml"];

impl SubtitleDescriptor {
    pub fn new(index: i64, language: Option<&str>, is_external: bool) -> Self {
        Self {
            index,
            language: language.map(str::to_string),
            codec: None,
            is_external,
            is_forced: false,
            is_hearing_impaired: false,
            display_title: None,
            delivery_url: None,
        }
    }

    pub fn label(&self) -> String {
        if let Some(title) = &self.display_title {
            return title.clone();
        }
        let mut label = self
            .language
            .clone()
            .unwrap_or_else(|| format!("Track {}", self.index));
        if self.is_forced {
            label.push_str(" (Forced)");
        }
        if self.is_hearing_impaired {
            label.push_str(" (SDH)");
        }
        label
    }

    /// Unknown codecs count as text
    pub fn is_text(&self) -> bool {
        match &self.codec {
            Some(codec) => TEXT_CODECS.contains(&codec.to_ascii_lowercase().as_str()),
            None => true,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MediaStream {
    #[serde(rename = "Type")]
    stream_type: String,
    #[serde(flatten)]
    descriptor: SubtitleDescriptor,
}

/// Subtitle descriptors from a Jellyfin `MediaStreams` array, in delivery order
pub fn from_media_streams(streams: &serde_json::Value) -> serde_json::Result<Vec<SubtitleDescriptor>> {
    let Some(entries) = streams.as_array() else {
        return Ok(Vec::new());
    };

    let mut descriptors = Vec::new();
    for entry in entries {
        if entry.get("Type").and_then(|t| t.as_str()) != Some("Subtitle") {
            continue;
        }
        let stream: MediaStream = serde_json::from_value(entry.clone())?;
        if stream.stream_type == "Subtitle" {
            descriptors.push(stream.descriptor);
        }
    }
    Ok(descriptors)
}
