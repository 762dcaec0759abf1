//! Bounded discovery of embedded subtitle tracks on the native engine.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::descriptor::SubtitleDescriptor;
use super::language;
use crate::config::SubtitleConfig;
use crate::player::engine::{NativeTrack, TrackKind};
use crate::player::error::{PlayerError, PlayerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub interval: Duration,
    pub attempts: u32,
    /// Upper bound on waiting for the video to become ready before polling
    pub ready_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::from(&SubtitleConfig::default())
    }
}

impl From<&SubtitleConfig> for DiscoveryConfig {
    fn from(config: &SubtitleConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            attempts: config.poll_attempts,
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
        }
    }
}

/// First container-embedded subtitle track, in engine order, whose language
/// matches the descriptor's
pub fn match_embedded<'a>(tracks: &'a [NativeTrack], descriptor: &SubtitleDescriptor) -> Option<&'a NativeTrack> {
    let wanted = descriptor.language.as_deref()?;
    tracks
        .iter()
        .filter(|t| t.kind == TrackKind::Subtitle && !t.external)
        .find(|t| t.lang.as_deref().is_some_and(|lang| language::matches(lang, wanted)))
}

/// Poll the engine's track list until a match shows up.
///
/// Each attempt waits one interval and then lists tracks. Running out of
/// attempts is the final "absent" verdict (`TrackNotFound`); cancellation
/// yields `Superseded`.
pub async fn discover<F>(
    list_tracks: F,
    descriptor: &SubtitleDescriptor,
    config: DiscoveryConfig,
    cancel: &CancellationToken,
) -> PlayerResult<NativeTrack>
where
    F: Fn() -> Vec<NativeTrack>,
{
    for attempt in 1..=config.attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Subtitle discovery cancelled");
                return Err(PlayerError::Superseded);
            }
            _ = tokio::time::sleep(config.interval) => {}
        }

        let tracks = list_tracks();
        trace!(
            "Discovery attempt {}/{}: {} tracks",
            attempt,
            config.attempts,
            tracks.len()
        );
        if let Some(track) = match_embedded(&tracks, descriptor) {
            debug!("Found embedded subtitle track {} on attempt {}", track.id, attempt);
            return Ok(track.clone());
        }
    }

    Err(PlayerError::TrackNotFound(format!(
        "stream {} ({}) after {} polls",
        descriptor.index,
        descriptor.language.as_deref().unwrap_or("und"),
        config.attempts
    )))
}
