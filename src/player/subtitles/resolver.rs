use anyhow::Context;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{CacheKey, SubtitleCache};
use super::composite_key::TrackFlags;
use super::descriptor::SubtitleDescriptor;
use super::embedded::{DiscoveryConfig, discover, match_embedded};
use super::fetch::SubtitleFetcher;
use super::identity::{SubtitleIdentityMap, TrackListing};
use crate::backends::{MediaRef, MediaUrls};
use crate::config::Config;
use crate::player::engine::EngineHandle;
use crate::player::error::{PlayerError, PlayerResult};

/// Where a descriptor's payload comes from, decided once per selection
#[derive(Debug, Clone, PartialEq)]
pub enum SubtitleSource {
    Embedded { track_id: i64 },
    External { urls: Vec<String> },
    Unresolvable { reason: String },
}

/// Swap generation and resolver session captured when a selection starts
#[derive(Debug, Clone)]
pub struct SelectionScope {
    generation: u64,
    cancel: CancellationToken,
}

impl SelectionScope {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// An engine that rebuilds its track list into (group, track) positions and
/// does not keep caller-assigned ids
pub trait GroupedTrackEngine: Send + Sync {
    fn subtitle_listing(&self) -> Vec<TrackListing>;

    fn select_subtitle(&self, group: usize, track: usize) -> PlayerResult<()>;

    fn disable_subtitles(&self) -> PlayerResult<()>;
}

pub struct SubtitleResolver {
    urls: Arc<dyn MediaUrls>,
    fetcher: SubtitleFetcher,
    cache: Arc<SubtitleCache>,
    identity: Mutex<SubtitleIdentityMap>,
    discovery: DiscoveryConfig,
    preferred_format: String,
    cancel: Mutex<CancellationToken>,
    active: Mutex<Option<i64>>,
}

impl SubtitleResolver {
    pub fn new(
        urls: Arc<dyn MediaUrls>,
        fetcher: SubtitleFetcher,
        cache: Arc<SubtitleCache>,
        discovery: DiscoveryConfig,
        preferred_format: impl Into<String>,
    ) -> Self {
        Self {
            urls,
            fetcher,
            cache,
            identity: Mutex::new(SubtitleIdentityMap::new()),
            discovery,
            preferred_format: preferred_format.into(),
            cancel: Mutex::new(CancellationToken::new()),
            active: Mutex::new(None),
        }
    }

    pub fn from_config(urls: Arc<dyn MediaUrls>, config: &Config) -> anyhow::Result<Self> {
        let fetcher = SubtitleFetcher::new(
            Duration::from_secs(config.network.timeout_secs),
            config.subtitles.max_payload_bytes,
        )
        .context("Failed to create subtitle fetcher")?;
        let cache_dir = config.subtitles.resolved_cache_dir()?;

        Ok(Self::new(
            urls,
            fetcher,
            Arc::new(SubtitleCache::new(cache_dir)),
            DiscoveryConfig::from(&config.subtitles),
            config.subtitles.preferred_format.clone(),
        ))
    }

    pub fn cache(&self) -> &Arc<SubtitleCache> {
        &self.cache
    }

    /// Descriptor index of the currently selected subtitle on the native engine
    pub fn active(&self) -> Option<i64> {
        *self.active.lock()
    }

    /// ASS/SSA keep their styling; everything else is requested in the
    /// configured text format
    fn delivery_format(&self, descriptor: &SubtitleDescriptor) -> String {
        match descriptor.codec.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("ass") | Some("ssa") => "ass".to_string(),
            _ => self.preferred_format.clone(),
        }
    }

    fn external_source(&self, media: &MediaRef, descriptor: &SubtitleDescriptor) -> SubtitleSource {
        let format = self.delivery_format(descriptor);
        let urls = self.urls.subtitle_urls(media, descriptor, &format);
        if urls.is_empty() {
            SubtitleSource::Unresolvable {
                reason: format!("no endpoint for stream {}", descriptor.index),
            }
        } else {
            SubtitleSource::External { urls }
        }
    }

    /// Capture the swap and resolver session a selection belongs to. Work
    /// done under the scope is dropped once either one moves on.
    pub fn begin_selection(&self, engine: &EngineHandle) -> SelectionScope {
        SelectionScope {
            generation: engine.generation(),
            cancel: self.cancel.lock().clone(),
        }
    }

    fn ensure_current(&self, engine: &EngineHandle, scope: &SelectionScope) -> PlayerResult<()> {
        if scope.cancel.is_cancelled() || engine.generation() != scope.generation {
            debug!("Subtitle selection for generation {} superseded", scope.generation);
            return Err(PlayerError::Superseded);
        }
        Ok(())
    }

    /// Wait until the scoped video is ready. Running out of time is reported
    /// as a missing track so callers degrade instead of failing.
    async fn await_ready(&self, engine: &EngineHandle, scope: &SelectionScope) -> PlayerResult<()> {
        let wait = engine.wait_for_generation(scope.generation, self.discovery.ready_timeout);
        tokio::select! {
            _ = scope.cancel.cancelled() => Err(PlayerError::Superseded),
            result = wait => match result {
                Err(PlayerError::Timeout(what)) => Err(PlayerError::TrackNotFound(format!(
                    "video never became ready ({})",
                    what
                ))),
                other => other,
            },
        }
    }

    /// Decide how a descriptor is delivered on the native engine.
    ///
    /// Embedded descriptors are looked up in the engine's track list once the
    /// video is ready, polling while the demuxer is still publishing tracks.
    /// A track that never shows up is served through the external endpoints
    /// instead.
    pub async fn classify(
        &self,
        engine: &EngineHandle,
        media: &MediaRef,
        descriptor: &SubtitleDescriptor,
    ) -> PlayerResult<SubtitleSource> {
        let scope = self.begin_selection(engine);
        self.classify_in(engine, media, descriptor, &scope).await
    }

    async fn classify_in(
        &self,
        engine: &EngineHandle,
        media: &MediaRef,
        descriptor: &SubtitleDescriptor,
        scope: &SelectionScope,
    ) -> PlayerResult<SubtitleSource> {
        if descriptor.is_external || descriptor.language.is_none() {
            return Ok(self.external_source(media, descriptor));
        }

        let found = match self.await_ready(engine, scope).await {
            Ok(()) => {
                let list_tracks = || {
                    engine
                        .properties()
                        .map(|props| props.track_list())
                        .unwrap_or_default()
                };
                discover(list_tracks, descriptor, self.discovery, &scope.cancel).await
            }
            Err(e) => Err(e),
        };

        match found {
            Ok(track) => Ok(SubtitleSource::Embedded { track_id: track.id }),
            Err(PlayerError::TrackNotFound(reason)) => {
                info!("Embedded subtitle missing ({}), trying external delivery", reason);
                Ok(self.external_source(media, descriptor))
            }
            Err(e) => Err(e),
        }
    }

    /// Select `descriptor` on the native engine, or disable subtitles with `None`.
    ///
    /// Subtitle failures leave nothing selected and return `Ok(None)`.
    pub async fn select_native(
        &self,
        engine: &EngineHandle,
        media: &MediaRef,
        descriptor: Option<&SubtitleDescriptor>,
    ) -> PlayerResult<Option<i64>> {
        let scope = self.begin_selection(engine);
        self.select_native_in(engine, media, descriptor, &scope).await
    }

    /// [`select_native`](Self::select_native) for a scope captured earlier.
    ///
    /// Fails with `Superseded`, leaving the engine untouched, when the video
    /// was swapped or the resolver reset since the scope was taken.
    pub async fn select_native_in(
        &self,
        engine: &EngineHandle,
        media: &MediaRef,
        descriptor: Option<&SubtitleDescriptor>,
        scope: &SelectionScope,
    ) -> PlayerResult<Option<i64>> {
        let Some(descriptor) = descriptor else {
            self.ensure_current(engine, scope)?;
            self.disable_native(engine)?;
            return Ok(None);
        };

        let source = self.classify_in(engine, media, descriptor, scope).await?;
        debug!("Subtitle stream {} resolved to {:?}", descriptor.index, source);

        let selected = match source {
            SubtitleSource::Embedded { track_id } => {
                self.ensure_current(engine, scope)?;
                engine.properties()?.select_subtitle(Some(track_id))?;
                Some(track_id)
            }
            SubtitleSource::External { urls } => {
                match self.attach_external(engine, media, descriptor, &urls, scope).await {
                    Ok(track_id) => track_id,
                    Err(e) if !e.is_fatal() && !matches!(e, PlayerError::Superseded) => {
                        warn!("Subtitle stream {} unavailable: {}", descriptor.index, e);
                        self.ensure_current(engine, scope)?;
                        engine.properties()?.select_subtitle(None)?;
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            SubtitleSource::Unresolvable { reason } => {
                warn!("Subtitle stream {} unresolvable: {}", descriptor.index, reason);
                self.ensure_current(engine, scope)?;
                engine.properties()?.select_subtitle(None)?;
                None
            }
        };

        // Checked under the lock so a concurrent reset always wins
        let mut active = self.active.lock();
        self.ensure_current(engine, scope)?;
        *active = selected.map(|_| descriptor.index);
        Ok(selected)
    }

    pub fn disable_native(&self, engine: &EngineHandle) -> PlayerResult<()> {
        engine.properties()?.select_subtitle(None)?;
        *self.active.lock() = None;
        Ok(())
    }

    async fn attach_external(
        &self,
        engine: &EngineHandle,
        media: &MediaRef,
        descriptor: &SubtitleDescriptor,
        urls: &[String],
        scope: &SelectionScope,
    ) -> PlayerResult<Option<i64>> {
        let path = tokio::select! {
            _ = scope.cancel.cancelled() => {
                debug!("Subtitle fetch for stream {} cancelled", descriptor.index);
                return Err(PlayerError::Superseded);
            }
            fetched = self.fetch_to_cache(media, descriptor, urls) => fetched?,
        };

        self.await_ready(engine, scope).await?;
        self.ensure_current(engine, scope)?;

        let props = engine.properties()?;
        props.add_external_subtitle(
            &path.to_string_lossy(),
            &descriptor.label(),
            descriptor.language.as_deref(),
        )?;
        props.force_text_subtitle_rendering()?;
        Ok(props.current_subtitle())
    }

    async fn fetch_to_cache(
        &self,
        media: &MediaRef,
        descriptor: &SubtitleDescriptor,
        urls: &[String],
    ) -> PlayerResult<std::path::PathBuf> {
        let key = CacheKey::new(media.source_id(), descriptor.index);
        let format = self.delivery_format(descriptor);
        let headers = self.urls.auth_headers();

        self.cache
            .get_or_fetch(&key, &format, || async {
                self.fetcher
                    .fetch_first(urls, &headers)
                    .await
                    .map(|fetched| fetched.body)
            })
            .await
    }

    /// Cached payload for one stream, fetched through the endpoint shapes on a miss
    pub async fn fetch_subtitle(
        &self,
        media: &MediaRef,
        descriptor: &SubtitleDescriptor,
    ) -> PlayerResult<std::path::PathBuf> {
        let format = self.delivery_format(descriptor);
        let urls = self.urls.subtitle_urls(media, descriptor, &format);
        self.fetch_to_cache(media, descriptor, &urls).await
    }

    /// Download every external text subtitle of `media` into the cache.
    ///
    /// Returns how many ended up cached.
    pub async fn prefetch(&self, media: &MediaRef, descriptors: &[SubtitleDescriptor]) -> usize {
        let jobs = descriptors
            .iter()
            .filter(|d| d.is_external && d.is_text())
            .map(|descriptor| self.fetch_subtitle(media, descriptor));

        let cached = join_all(jobs).await.into_iter().filter(Result::is_ok).count();
        debug!("Prefetched {} subtitle payloads", cached);
        cached
    }

    /// Register the identity map from the first concrete listing of a grouped engine
    pub fn register_listing(&self, engine: &dyn GroupedTrackEngine, descriptors: &[SubtitleDescriptor]) -> usize {
        let mut identity = self.identity.lock();
        if identity.is_registered() {
            return 0;
        }
        identity.register(&engine.subtitle_listing(), descriptors)
    }

    /// Select `wanted` on a grouped engine through the identity map.
    ///
    /// Returns the (group, track) position selected, or `None` when nothing
    /// matched and subtitles were disabled.
    pub fn select_grouped(
        &self,
        engine: &dyn GroupedTrackEngine,
        descriptors: &[SubtitleDescriptor],
        wanted: Option<&SubtitleDescriptor>,
    ) -> PlayerResult<Option<(usize, usize)>> {
        let Some(wanted) = wanted else {
            engine.disable_subtitles()?;
            return Ok(None);
        };

        let listing = engine.subtitle_listing();
        let position = {
            let mut identity = self.identity.lock();
            identity.register(&listing, descriptors);
            listing
                .iter()
                .find(|entry| {
                    identity
                        .resolve_listing(entry)
                        .is_some_and(|d| d.index == wanted.index)
                })
                .map(|entry| (entry.group, entry.track))
        };

        match position {
            Some((group, track)) => {
                engine.select_subtitle(group, track)?;
                Ok(Some((group, track)))
            }
            None => {
                warn!("No grouped track for subtitle stream {}", wanted.index);
                engine.disable_subtitles()?;
                Ok(None)
            }
        }
    }

    /// Server descriptor behind the grouped track the engine reports as selected
    pub fn descriptor_for(
        &self,
        group: usize,
        track: usize,
        language: Option<&str>,
        label: &str,
        external: bool,
    ) -> Option<SubtitleDescriptor> {
        let flags = TrackFlags::from_label(label, external);
        self.identity
            .lock()
            .resolve(group, track, language, flags)
            .cloned()
    }

    /// Forget per-session identity and cancel in-flight discovery and fetches
    pub fn reset(&self) {
        self.identity.lock().reset();
        let previous = std::mem::replace(&mut *self.cancel.lock(), CancellationToken::new());
        previous.cancel();
        *self.active.lock() = None;
        debug!("Subtitle resolver reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::engine::{EngineEvent, PropertyValue, TrackKind};
    use crate::test_utils::{RecordingEngine, recording_engine};
    use mockito::Server;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FixedUrls {
        base: String,
    }

    impl MediaUrls for FixedUrls {
        fn direct_play_url(&self, media: &MediaRef) -> String {
            format!("{}/play/{}", self.base, media.item_id)
        }

        fn transcode_url(&self, media: &MediaRef, _max_bitrate: Option<u64>) -> String {
            format!("{}/hls/{}", self.base, media.item_id)
        }

        fn subtitle_urls(&self, media: &MediaRef, descriptor: &SubtitleDescriptor, format: &str) -> Vec<String> {
            vec![
                format!("{}/a/{}/{}.{}", self.base, media.item_id, descriptor.index, format),
                format!("{}/b/{}/{}.{}", self.base, media.item_id, descriptor.index, format),
            ]
        }

        fn auth_headers(&self) -> Vec<(String, String)> {
            vec![("Authorization".to_string(), "MediaBrowser Token=\"t\"".to_string())]
        }
    }

    fn resolver(base: &str, dir: &TempDir) -> SubtitleResolver {
        SubtitleResolver::new(
            Arc::new(FixedUrls { base: base.to_string() }),
            SubtitleFetcher::new(Duration::from_secs(5), 1024).unwrap(),
            Arc::new(SubtitleCache::new(dir.path())),
            DiscoveryConfig {
                interval: Duration::from_millis(10),
                attempts: 3,
                ready_timeout: Duration::from_secs(1),
            },
            "srt",
        )
    }

    fn handle_for(engine: Arc<RecordingEngine>) -> Arc<EngineHandle> {
        EngineHandle::create(engine, |_| Ok(())).unwrap()
    }

    /// Handle with `movie.mkv` loaded and ready
    fn ready_handle(engine: Arc<RecordingEngine>) -> Arc<EngineHandle> {
        let handle = handle_for(engine.clone());
        handle.load_new_video("http://media/movie.mkv", Duration::ZERO).unwrap();
        engine.emit(EngineEvent::StartFile(None));
        engine.emit(EngineEvent::FileLoaded);
        handle
    }

    /// Accepts connections and never answers, so fetches hang until dropped
    async fn silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_embedded_match_selects_engine_track() {
        let dir = TempDir::new().unwrap();
        let engine = recording_engine();
        engine.push_track("sub", 1, Some("en"), None, false);
        engine.push_track("sub", 2, Some("fr"), None, false);
        let handle = ready_handle(engine.clone());

        let resolver = resolver("http://unused.invalid", &dir);
        let descriptor = SubtitleDescriptor::new(3, Some("fra"), false);
        let media = MediaRef::new("movie");

        let selected = resolver
            .select_native(&handle, &media, Some(&descriptor))
            .await
            .unwrap();

        assert_eq!(selected, Some(2));
        assert_eq!(engine.property("sid"), Some(PropertyValue::Int(2)));
        assert_eq!(resolver.active(), Some(3));
    }

    #[tokio::test]
    async fn test_missing_embedded_falls_back_to_external() {
        let mut server = Server::new_async().await;
        let _first = server
            .mock("GET", "/a/movie/4.srt")
            .with_status(404)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/b/movie/4.srt")
            .match_header("authorization", "MediaBrowser Token=\"t\"")
            .with_status(200)
            .with_body("1\n00:00:01,000 --> 00:00:02,000\nBonjour\n")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let engine = recording_engine();
        engine.push_track("sub", 1, Some("en"), None, false);
        let handle = ready_handle(engine.clone());

        let resolver = resolver(&server.url(), &dir);
        let descriptor = SubtitleDescriptor::new(4, Some("fre"), false);

        let selected = resolver
            .select_native(&handle, &MediaRef::new("movie"), Some(&descriptor))
            .await
            .unwrap();

        second.assert_async().await;
        assert_eq!(selected, Some(101));

        let commands = engine.commands();
        let sub_add = commands.iter().position(|c| c[0] == "sub-add").unwrap();
        assert!(commands[sub_add][1].ends_with("movie_4.srt"));

        let calls = engine.calls();
        assert!(calls.ends_with(&[
            crate::test_utils::EngineCall::Command("sub-add".into()),
            crate::test_utils::EngineCall::Set("sub-visibility".into()),
            crate::test_utils::EngineCall::Set("sub-ass-override".into()),
            crate::test_utils::EngineCall::Set("blend-subtitles".into()),
        ]));
    }

    #[tokio::test]
    async fn test_fetch_failure_selects_nothing() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let engine = recording_engine();
        let handle = handle_for(engine.clone());
        let resolver = resolver(&server.url(), &dir);
        let descriptor = SubtitleDescriptor::new(5, Some("de"), true);

        let selected = resolver
            .select_native(&handle, &MediaRef::new("movie"), Some(&descriptor))
            .await
            .unwrap();

        assert_eq!(selected, None);
        assert_eq!(
            engine.property("sid"),
            Some(PropertyValue::Str("no".into()))
        );
        assert!(!engine.commands().iter().any(|c| c[0] == "sub-add"));
        assert_eq!(resolver.active(), None);
    }

    #[tokio::test]
    async fn test_external_descriptor_skips_discovery() {
        let dir = TempDir::new().unwrap();
        let engine = recording_engine();
        let handle = handle_for(engine.clone());
        let resolver = resolver("http://server", &dir);

        let source = resolver
            .classify(&handle, &MediaRef::new("m"), &SubtitleDescriptor::new(1, Some("en"), true))
            .await
            .unwrap();

        assert!(matches!(source, SubtitleSource::External { ref urls } if urls.len() == 2));
        assert_eq!(engine.track_count_reads(), 0);
    }

    #[tokio::test]
    async fn test_ass_codec_keeps_format() {
        let dir = TempDir::new().unwrap();
        let handle = handle_for(recording_engine());
        let resolver = resolver("http://server", &dir);
        let mut descriptor = SubtitleDescriptor::new(7, None, false);
        descriptor.codec = Some("ASS".into());

        let source = resolver
            .classify(&handle, &MediaRef::new("m"), &descriptor)
            .await
            .unwrap();

        match source {
            SubtitleSource::External { urls } => assert!(urls[0].ends_with("/7.ass")),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_discovery() {
        let dir = TempDir::new().unwrap();
        let handle = handle_for(recording_engine());
        let resolver = Arc::new(resolver("http://server", &dir));

        let task = {
            let resolver = resolver.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                resolver
                    .classify(&handle, &MediaRef::new("m"), &SubtitleDescriptor::new(2, Some("it"), false))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        resolver.reset();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(PlayerError::Superseded)));
    }

    #[tokio::test]
    async fn test_embedded_selection_waits_for_ready() {
        let dir = TempDir::new().unwrap();
        let engine = recording_engine();
        engine.push_track("sub", 1, Some("en"), None, false);
        engine.push_track("sub", 2, Some("fr"), None, false);
        let handle = handle_for(engine.clone());
        handle.load_new_video("http://media/next.mkv", Duration::ZERO).unwrap();

        let resolver = Arc::new(resolver("http://unused.invalid", &dir));
        let task = {
            let resolver = resolver.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                resolver
                    .select_native(&handle, &MediaRef::new("next"), Some(&SubtitleDescriptor::new(3, Some("fra"), false)))
                    .await
            })
        };

        // Tracks listed before the load finished belong to the old file
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.track_count_reads(), 0);
        assert_eq!(engine.property("sid"), None);

        engine.emit(EngineEvent::StartFile(None));
        engine.emit(EngineEvent::FileLoaded);

        assert_eq!(task.await.unwrap().unwrap(), Some(2));
        assert_eq!(engine.property("sid"), Some(PropertyValue::Int(2)));
    }

    #[tokio::test]
    async fn test_discovery_polls_exactly_the_configured_attempts() {
        let dir = TempDir::new().unwrap();
        let engine = recording_engine();
        engine.push_track("sub", 1, Some("en"), None, false);
        let handle = ready_handle(engine.clone());
        let resolver = resolver("http://server", &dir);

        let source = resolver
            .classify(&handle, &MediaRef::new("m"), &SubtitleDescriptor::new(2, Some("de"), false))
            .await
            .unwrap();

        assert!(matches!(source, SubtitleSource::External { .. }));
        assert_eq!(engine.track_count_reads(), 3);
    }

    #[tokio::test]
    async fn test_swap_cancels_in_flight_fetch() {
        let dir = TempDir::new().unwrap();
        let engine = recording_engine();
        let handle = ready_handle(engine.clone());
        let resolver = Arc::new(resolver(&silent_server().await, &dir));

        let task = {
            let resolver = resolver.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                resolver
                    .select_native(&handle, &MediaRef::new("a"), Some(&SubtitleDescriptor::new(1, Some("en"), true)))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        resolver.reset();
        handle.load_new_video("http://media/b.mkv", Duration::ZERO).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(PlayerError::Superseded)));
        assert!(!engine.commands().iter().any(|c| c[0] == "sub-add"));
        assert_eq!(resolver.active(), None);
        assert!(std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0) == 0);
    }

    #[tokio::test]
    async fn test_swap_after_fetch_skips_attach() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/a/a/1.srt")
            .with_status(200)
            .with_body("1\n00:00:01,000 --> 00:00:02,000\nHello\n")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let engine = recording_engine();
        let handle = handle_for(engine.clone());
        handle.load_new_video("http://media/a.mkv", Duration::ZERO).unwrap();
        let resolver = Arc::new(resolver(&server.url(), &dir));

        let task = {
            let resolver = resolver.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                resolver
                    .select_native(&handle, &MediaRef::new("a"), Some(&SubtitleDescriptor::new(1, Some("en"), true)))
                    .await
            })
        };

        // The payload lands while `a` is still loading, then `b` replaces it
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.load_new_video("http://media/b.mkv", Duration::ZERO).unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(PlayerError::Superseded)));
        assert!(!engine.commands().iter().any(|c| c[0] == "sub-add"));
        assert_eq!(resolver.active(), None);
    }

    #[tokio::test]
    async fn test_prefetch_only_external_text() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Regex("^/a/".into()))
            .with_status(200)
            .with_body("WEBVTT\n")
            .expect(2)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let resolver = resolver(&server.url(), &dir);
        let mut bitmap = SubtitleDescriptor::new(3, Some("en"), true);
        bitmap.codec = Some("PGSSUB".into());
        let descriptors = vec![
            SubtitleDescriptor::new(1, Some("en"), true),
            SubtitleDescriptor::new(2, Some("fr"), true),
            bitmap,
            SubtitleDescriptor::new(4, Some("de"), false),
        ];

        let cached = resolver.prefetch(&MediaRef::new("movie"), &descriptors).await;

        assert_eq!(cached, 2);
        mock.assert_async().await;
    }

    struct FakeGrouped {
        listing: Vec<TrackListing>,
        selected: Mutex<Option<(usize, usize)>>,
        disabled: AtomicUsize,
    }

    impl FakeGrouped {
        fn new(listing: Vec<TrackListing>) -> Self {
            Self {
                listing,
                selected: Mutex::new(None),
                disabled: AtomicUsize::new(0),
            }
        }
    }

    impl GroupedTrackEngine for FakeGrouped {
        fn subtitle_listing(&self) -> Vec<TrackListing> {
            self.listing.clone()
        }

        fn select_subtitle(&self, group: usize, track: usize) -> PlayerResult<()> {
            *self.selected.lock() = Some((group, track));
            Ok(())
        }

        fn disable_subtitles(&self) -> PlayerResult<()> {
            self.disabled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn listing(group: usize, language: &str, label: &str) -> TrackListing {
        TrackListing {
            group,
            track: 0,
            language: Some(language.to_string()),
            label: label.to_string(),
            external: false,
            is_text: true,
        }
    }

    #[test]
    fn test_grouped_selection_uses_identity() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver("http://server", &dir);
        let engine = FakeGrouped::new(vec![listing(0, "en", "English"), listing(1, "fr", "Français (Forced)")]);
        let mut forced = SubtitleDescriptor::new(8, Some("fre"), false);
        forced.is_forced = true;
        let descriptors = vec![SubtitleDescriptor::new(7, Some("eng"), false), forced.clone()];

        let selected = resolver
            .select_grouped(&engine, &descriptors, Some(&forced))
            .unwrap();

        assert_eq!(selected, Some((1, 0)));
        assert_eq!(*engine.selected.lock(), Some((1, 0)));

        let back = resolver.descriptor_for(1, 0, Some("fr"), "Français (Forced)", false);
        assert_eq!(back.map(|d| d.index), Some(8));
    }

    #[test]
    fn test_grouped_miss_disables() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver("http://server", &dir);
        let engine = FakeGrouped::new(vec![listing(0, "en", "English")]);
        let descriptors = vec![SubtitleDescriptor::new(7, Some("eng"), false)];

        let selected = resolver
            .select_grouped(&engine, &descriptors, Some(&SubtitleDescriptor::new(9, Some("ja"), false)))
            .unwrap();

        assert_eq!(selected, None);
        assert_eq!(engine.disabled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_clears_identity() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver("http://server", &dir);
        let engine = FakeGrouped::new(vec![listing(0, "en", "English")]);
        let descriptors = vec![SubtitleDescriptor::new(7, Some("eng"), false)];

        assert_eq!(resolver.register_listing(&engine, &descriptors), 1);
        assert_eq!(resolver.register_listing(&engine, &descriptors), 0);

        resolver.reset();
        assert!(resolver.descriptor_for(0, 0, Some("en"), "English", false).is_none());
        assert_eq!(resolver.register_listing(&engine, &descriptors), 1);
    }

    #[test]
    fn test_audio_tracks_never_match_subtitles() {
        let engine = recording_engine();
        engine.push_track("audio", 1, Some("en"), None, false);
        let handle = handle_for(engine);
        let tracks = handle.properties().unwrap().track_list();
        assert_eq!(tracks[0].kind, TrackKind::Audio);
        assert!(match_embedded(&tracks, &SubtitleDescriptor::new(0, Some("en"), false)).is_none());
    }
}
