//! Typed access to the engine's name-keyed property bag.
//!
//! Every property and command name the playback core uses lives in the tables
//! below; the rest of the crate talks in [`Property`] and [`Command`] values.

use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{NativeEngine, PropertyValue};
use crate::player::error::PlayerResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    // Video output / decode
    Vo,
    GpuApi,
    GpuContext,
    Hwdec,
    TargetColorspaceHint,
    ToneMapping,
    DitherDepth,
    FboFormat,
    OutputGeometry,
    ForceWindow,
    Wid,
    // Playback
    Pause,
    TimePos,
    Duration,
    Volume,
    KeepOpen,
    CacheSecs,
    /// Id of the only playlist entry left after a replace load
    PlaylistEntryId,
    // Logging
    MsgLevel,
    Terminal,
    // Tracks
    Sid,
    Aid,
    TrackListCount,
    // Subtitle rendering
    SubVisibility,
    SubAssOverride,
    BlendSubtitles,
    SubAuto,
}

const PROPERTY_NAMES: &[(Property, &str)] = &[
    (Property::Vo, "vo"),
    (Property::GpuApi, "gpu-api"),
    (Property::GpuContext, "gpu-context"),
    (Property::Hwdec, "hwdec"),
    (Property::TargetColorspaceHint, "target-colorspace-hint"),
    (Property::ToneMapping, "tone-mapping"),
    (Property::DitherDepth, "dither-depth"),
    (Property::FboFormat, "fbo-format"),
    (Property::OutputGeometry, "android-surface-size"),
    (Property::ForceWindow, "force-window"),
    (Property::Wid, "wid"),
    (Property::Pause, "pause"),
    (Property::TimePos, "time-pos"),
    (Property::Duration, "duration"),
    (Property::Volume, "volume"),
    (Property::KeepOpen, "keep-open"),
    (Property::CacheSecs, "cache-secs"),
    (Property::PlaylistEntryId, "playlist/0/id"),
    (Property::MsgLevel, "msg-level"),
    (Property::Terminal, "terminal"),
    (Property::Sid, "sid"),
    (Property::Aid, "aid"),
    (Property::TrackListCount, "track-list/count"),
    (Property::SubVisibility, "sub-visibility"),
    (Property::SubAssOverride, "sub-ass-override"),
    (Property::BlendSubtitles, "blend-subtitles"),
    (Property::SubAuto, "sub-auto"),
];

impl Property {
    pub fn name(self) -> &'static str {
        PROPERTY_NAMES
            .iter()
            .find(|(p, _)| *p == self)
            .map(|(_, name)| *name)
            .unwrap_or("")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        PROPERTY_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(p, _)| *p)
    }

    /// Properties that reach into the decoder or video output. These must
    /// never be written while no drawing surface is bound.
    pub fn touches_video_output(self) -> bool {
        matches!(
            self,
            Property::Vo
                | Property::GpuApi
                | Property::GpuContext
                | Property::Hwdec
                | Property::TargetColorspaceHint
                | Property::ToneMapping
                | Property::DitherDepth
                | Property::FboFormat
                | Property::OutputGeometry
                | Property::ForceWindow
                | Property::Wid
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    LoadFile,
    Stop,
    SubAdd,
    Seek,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::LoadFile => "loadfile",
            Command::Stop => "stop",
            Command::SubAdd => "sub-add",
            Command::Seek => "seek",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

impl TrackKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(TrackKind::Video),
            "audio" => Some(TrackKind::Audio),
            "sub" => Some(TrackKind::Subtitle),
            _ => None,
        }
    }
}

/// One entry of the engine's `track-list`, in engine order
#[derive(Debug, Clone, PartialEq)]
pub struct NativeTrack {
    pub id: i64,
    pub kind: TrackKind,
    pub lang: Option<String>,
    pub title: Option<String>,
    pub codec: Option<String>,
    /// Sidecar file added at runtime rather than found in the container
    pub external: bool,
    pub forced: bool,
}

/// Borrowing accessor over a [`NativeEngine`]
pub struct EngineProperties<'a> {
    engine: &'a dyn NativeEngine,
}

impl<'a> EngineProperties<'a> {
    pub fn new(engine: &'a dyn NativeEngine) -> Self {
        Self { engine }
    }

    pub fn set_option(&self, property: Property, value: impl Into<PropertyValue>) -> PlayerResult<()> {
        let value = value.into();
        trace!("engine option {}={:?}", property.name(), value);
        self.engine.set_option(property.name(), value)
    }

    pub fn set(&self, property: Property, value: impl Into<PropertyValue>) -> PlayerResult<()> {
        let value = value.into();
        trace!("engine property {}={:?}", property.name(), value);
        self.engine.set_property(property.name(), value)
    }

    pub fn get(&self, property: Property) -> PlayerResult<PropertyValue> {
        self.engine.get_property(property.name())
    }

    pub fn command(&self, command: Command, args: &[&str]) -> PlayerResult<()> {
        debug!("engine command {} {:?}", command.name(), args);
        self.engine.command(command.name(), args)
    }

    /// Replace the current file in place, keeping the video output pipeline
    pub fn load_replace(&self, locator: &str, resume_offset: Duration) -> PlayerResult<()> {
        if resume_offset.is_zero() {
            self.command(Command::LoadFile, &[locator, "replace"])
        } else {
            let start = format!("start={:.3}", resume_offset.as_secs_f64());
            self.command(Command::LoadFile, &[locator, "replace", "-1", &start])
        }
    }

    /// Playlist entry id of the file a replace load queued, when the engine reports it
    pub fn playlist_entry_id(&self) -> Option<i64> {
        self.get(Property::PlaylistEntryId).ok()?.as_i64()
    }

    pub fn set_paused(&self, paused: bool) -> PlayerResult<()> {
        self.set(Property::Pause, paused)
    }

    pub fn stop(&self) -> PlayerResult<()> {
        self.command(Command::Stop, &[])
    }

    pub fn seek_absolute(&self, position: Duration) -> PlayerResult<()> {
        let target = format!("{:.3}", position.as_secs_f64());
        self.command(Command::Seek, &[&target, "absolute"])
    }

    pub fn time_pos(&self) -> Option<Duration> {
        self.seconds(Property::TimePos)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.seconds(Property::Duration)
    }

    fn seconds(&self, property: Property) -> Option<Duration> {
        let secs = self.get(property).ok()?.as_f64()?;
        if secs.is_finite() && secs >= 0.0 {
            Some(Duration::from_secs_f64(secs))
        } else {
            None
        }
    }

    pub fn set_output_geometry(&self, width: u32, height: u32) -> PlayerResult<()> {
        self.set(Property::OutputGeometry, format!("{}x{}", width, height))
    }

    /// `None` disables subtitles
    pub fn select_subtitle(&self, track_id: Option<i64>) -> PlayerResult<()> {
        match track_id {
            Some(id) => self.set(Property::Sid, id),
            None => self.set(Property::Sid, "no"),
        }
    }

    pub fn select_audio(&self, track_id: Option<i64>) -> PlayerResult<()> {
        match track_id {
            Some(id) => self.set(Property::Aid, id),
            None => self.set(Property::Aid, "no"),
        }
    }

    pub fn current_subtitle(&self) -> Option<i64> {
        self.get(Property::Sid).ok()?.as_i64()
    }

    /// Attach a sidecar subtitle file and select it
    pub fn add_external_subtitle(&self, path: &str, title: &str, lang: Option<&str>) -> PlayerResult<()> {
        match lang {
            Some(lang) => self.command(Command::SubAdd, &[path, "select", title, lang]),
            None => self.command(Command::SubAdd, &[path, "select", title]),
        }
    }

    /// Force text subtitle rendering.
    ///
    /// Once any bitmap subtitle track has been exposed, the engine keeps
    /// rendering in bitmap mode for the rest of the session, which hides text
    /// subtitles. Must be re-applied after every external attach. The exact
    /// trigger is not fully characterized; re-check against new engine releases.
    pub fn force_text_subtitle_rendering(&self) -> PlayerResult<()> {
        self.set(Property::SubVisibility, true)?;
        self.set(Property::SubAssOverride, "scale")?;
        self.set(Property::BlendSubtitles, "no")?;
        Ok(())
    }

    /// Read the engine's track list in engine order
    pub fn track_list(&self) -> Vec<NativeTrack> {
        let count = match self.get(Property::TrackListCount).ok().and_then(|v| v.as_i64()) {
            Some(count) => count,
            None => return Vec::new(),
        };

        let mut tracks = Vec::with_capacity(count.max(0) as usize);
        for i in 0..count {
            match self.track_at(i) {
                Some(track) => tracks.push(track),
                None => warn!("engine: incomplete track-list entry {}", i),
            }
        }
        tracks
    }

    pub fn subtitle_tracks(&self) -> Vec<NativeTrack> {
        self.track_list()
            .into_iter()
            .filter(|t| t.kind == TrackKind::Subtitle)
            .collect()
    }

    pub fn audio_tracks(&self) -> Vec<NativeTrack> {
        self.track_list()
            .into_iter()
            .filter(|t| t.kind == TrackKind::Audio)
            .collect()
    }

    fn track_at(&self, index: i64) -> Option<NativeTrack> {
        let field = |name: &str| self.engine.get_property(&format!("track-list/{}/{}", index, name)).ok();
        let text = |name: &str| field(name).and_then(|v| v.as_str().map(str::to_string));
        let flag = |name: &str| field(name).and_then(|v| v.as_bool()).unwrap_or(false);

        let kind = TrackKind::parse(&text("type")?)?;
        let id = field("id")?.as_i64()?;

        Some(NativeTrack {
            id,
            kind,
            lang: text("lang"),
            title: text("title"),
            codec: text("codec"),
            external: flag("external"),
            forced: flag("forced"),
        })
    }
}
