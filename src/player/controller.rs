use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::compositor::{CompositorHandle, EffectParameters};
use super::engine::{EngineHandle, NativeTrack, ReadinessState};
use super::error::{PlayerError, PlayerResult};
use super::subtitles::{SubtitleDescriptor, SubtitleResolver};
use super::surface::{PlayOutcome, PlayRequest, SurfaceLifecycleManager};
use crate::backends::MediaRef;

/// Commands that can be sent to the player controller
#[derive(Debug)]
pub enum PlayerCommand {
    /// Swap to a new video, or queue it until a surface exists
    Play {
        request: PlayRequest,
        media: Option<MediaRef>,
        respond_to: oneshot::Sender<PlayerResult<PlayOutcome>>,
    },
    Pause {
        respond_to: oneshot::Sender<PlayerResult<()>>,
    },
    Resume {
        respond_to: oneshot::Sender<PlayerResult<()>>,
    },
    Seek {
        position: Duration,
        respond_to: oneshot::Sender<PlayerResult<()>>,
    },
    GetPosition {
        respond_to: oneshot::Sender<Option<Duration>>,
    },
    GetDuration {
        respond_to: oneshot::Sender<Option<Duration>>,
    },
    GetAudioTracks {
        respond_to: oneshot::Sender<Vec<NativeTrack>>,
    },
    GetSubtitleTracks {
        respond_to: oneshot::Sender<Vec<NativeTrack>>,
    },
    SelectAudio {
        track_id: Option<i64>,
        respond_to: oneshot::Sender<PlayerResult<()>>,
    },
    /// `None` disables subtitles
    SelectSubtitle {
        descriptor: Option<SubtitleDescriptor>,
        respond_to: oneshot::Sender<PlayerResult<Option<i64>>>,
    },
    /// Route engine frame notifications to a running compositor
    AttachCompositor {
        compositor: CompositorHandle,
        respond_to: oneshot::Sender<()>,
    },
    SetEffects {
        effects: EffectParameters,
        respond_to: oneshot::Sender<PlayerResult<()>>,
    },
    /// Pause, stop, detach and destroy. The controller exits afterwards.
    Teardown {
        respond_to: oneshot::Sender<PlayerResult<()>>,
    },
}

/// Controller that owns the playback core and processes commands
pub struct PlayerController {
    engine: Arc<EngineHandle>,
    surface: Arc<SurfaceLifecycleManager>,
    resolver: Option<Arc<SubtitleResolver>>,
    compositor: Option<CompositorHandle>,
    media: Option<MediaRef>,
    receiver: mpsc::UnboundedReceiver<PlayerCommand>,
    error_sender: mpsc::UnboundedSender<PlayerError>,
}

impl PlayerController {
    pub fn new(
        surface: Arc<SurfaceLifecycleManager>,
        resolver: Option<Arc<SubtitleResolver>>,
    ) -> (PlayerHandle, PlayerController) {
        let engine = surface.engine().clone();
        let (sender, receiver) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let controller = PlayerController {
            engine: engine.clone(),
            surface,
            resolver,
            compositor: None,
            media: None,
            receiver,
            error_sender: error_tx,
        };
        let handle = PlayerHandle {
            sender,
            engine,
            error_receiver: Arc::new(Mutex::new(Some(error_rx))),
        };

        (handle, controller)
    }

    fn setup_error_callback(&self) {
        let sender = self.error_sender.clone();
        self.engine.set_error_callback(move |error| {
            let _ = sender.send(error);
        });
    }

    fn report(&self, error: &PlayerError) {
        if error.is_fatal() {
            let _ = self.error_sender.send(error.clone());
        }
    }

    /// Run the controller event loop
    pub async fn run(mut self) {
        debug!("PlayerController event loop started");
        self.setup_error_callback();

        while let Some(command) = self.receiver.recv().await {
            match command {
                PlayerCommand::Play {
                    request,
                    media,
                    respond_to,
                } => {
                    trace!("Play request: {}", request.locator);
                    if let Some(resolver) = &self.resolver {
                        resolver.reset();
                    }
                    self.media = media;
                    let result = self.surface.play(request);
                    if let Err(e) = &result {
                        self.report(e);
                    }
                    let _ = respond_to.send(result);
                }
                PlayerCommand::Pause { respond_to } => {
                    trace!("Pausing playback");
                    let result = self.engine.properties().and_then(|p| p.set_paused(true));
                    let _ = respond_to.send(result);
                }
                PlayerCommand::Resume { respond_to } => {
                    trace!("Resuming playback");
                    let result = self.engine.properties().and_then(|p| p.set_paused(false));
                    let _ = respond_to.send(result);
                }
                PlayerCommand::Seek {
                    position,
                    respond_to,
                } => {
                    trace!("Seeking to {:?}", position);
                    let result = self
                        .engine
                        .properties()
                        .and_then(|p| p.seek_absolute(position));
                    let _ = respond_to.send(result);
                }
                PlayerCommand::GetPosition { respond_to } => {
                    let _ = respond_to.send(self.engine.position());
                }
                PlayerCommand::GetDuration { respond_to } => {
                    let _ = respond_to.send(self.engine.duration());
                }
                PlayerCommand::GetAudioTracks { respond_to } => {
                    let tracks = self
                        .engine
                        .properties()
                        .map(|p| p.audio_tracks())
                        .unwrap_or_default();
                    let _ = respond_to.send(tracks);
                }
                PlayerCommand::GetSubtitleTracks { respond_to } => {
                    let tracks = self
                        .engine
                        .properties()
                        .map(|p| p.subtitle_tracks())
                        .unwrap_or_default();
                    let _ = respond_to.send(tracks);
                }
                PlayerCommand::SelectAudio {
                    track_id,
                    respond_to,
                } => {
                    trace!("Selecting audio track {:?}", track_id);
                    let result = self
                        .engine
                        .properties()
                        .and_then(|p| p.select_audio(track_id));
                    let _ = respond_to.send(result);
                }
                PlayerCommand::SelectSubtitle {
                    descriptor,
                    respond_to,
                } => self.select_subtitle(descriptor, respond_to),
                PlayerCommand::AttachCompositor {
                    compositor,
                    respond_to,
                } => {
                    let notifier = compositor.frame_notifier();
                    self.engine.set_frame_callback(move || notifier.notify());
                    if let Some(old) = self.compositor.replace(compositor) {
                        old.shutdown();
                    }
                    info!("Compositor attached to engine frame callbacks");
                    let _ = respond_to.send(());
                }
                PlayerCommand::SetEffects {
                    effects,
                    respond_to,
                } => {
                    let result = match &self.compositor {
                        Some(compositor) => compositor.set_effects(effects),
                        None => Err(PlayerError::RenderThreadGone),
                    };
                    let _ = respond_to.send(result);
                }
                PlayerCommand::Teardown { respond_to } => {
                    let result = self.teardown();
                    let _ = respond_to.send(result);
                    break;
                }
            }
        }

        debug!("PlayerController event loop terminated");
    }

    /// Subtitle selection may poll for several seconds, so it runs off the
    /// command loop
    fn select_subtitle(
        &self,
        descriptor: Option<SubtitleDescriptor>,
        respond_to: oneshot::Sender<PlayerResult<Option<i64>>>,
    ) {
        let engine = self.engine.clone();

        let Some(descriptor) = descriptor else {
            let result = match &self.resolver {
                Some(resolver) => resolver.disable_native(&engine),
                None => engine.properties().and_then(|p| p.select_subtitle(None)),
            };
            let _ = respond_to.send(result.map(|_| None));
            return;
        };

        let (Some(resolver), Some(media)) = (self.resolver.clone(), self.media.clone()) else {
            warn!("No subtitle resolver or media for stream {}", descriptor.index);
            let _ = respond_to.send(Err(PlayerError::TrackNotFound(format!(
                "stream {} has no media context",
                descriptor.index
            ))));
            return;
        };

        // Scoped to the video playing now, not whatever plays once the task runs
        let scope = resolver.begin_selection(&engine);
        tokio::spawn(async move {
            let result = resolver
                .select_native_in(&engine, &media, Some(&descriptor), &scope)
                .await;
            let _ = respond_to.send(result);
        });
    }

    fn teardown(&mut self) -> PlayerResult<()> {
        info!("Tearing down player");
        if let Some(resolver) = &self.resolver {
            resolver.reset();
        }
        if let Some(compositor) = self.compositor.take() {
            compositor.shutdown();
        }
        self.media = None;
        self.surface.teardown()
    }
}

/// Handle to send commands to the player controller
#[derive(Clone)]
pub struct PlayerHandle {
    sender: mpsc::UnboundedSender<PlayerCommand>,
    engine: Arc<EngineHandle>,
    error_receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<PlayerError>>>>,
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("sender", &"<UnboundedSender>")
            .field("engine", &self.engine)
            .finish()
    }
}

fn disconnected() -> PlayerError {
    PlayerError::EngineUnavailable("player controller disconnected".to_string())
}

impl PlayerHandle {
    /// Take the error receiver (can only be done once)
    pub fn take_error_receiver(&self) -> Option<mpsc::UnboundedReceiver<PlayerError>> {
        self.error_receiver.lock().take()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> PlayerCommand,
    ) -> PlayerResult<T> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(command(respond_to))
            .map_err(|_| disconnected())?;
        response.await.map_err(|_| disconnected())
    }

    pub async fn play(&self, request: PlayRequest, media: Option<MediaRef>) -> PlayerResult<PlayOutcome> {
        self.request(|respond_to| PlayerCommand::Play {
            request,
            media,
            respond_to,
        })
        .await?
    }

    pub async fn pause(&self) -> PlayerResult<()> {
        self.request(|respond_to| PlayerCommand::Pause { respond_to })
            .await?
    }

    pub async fn resume(&self) -> PlayerResult<()> {
        self.request(|respond_to| PlayerCommand::Resume { respond_to })
            .await?
    }

    pub async fn seek(&self, position: Duration) -> PlayerResult<()> {
        self.request(|respond_to| PlayerCommand::Seek {
            position,
            respond_to,
        })
        .await?
    }

    /// `None` until the current video is ready
    pub async fn get_position(&self) -> PlayerResult<Option<Duration>> {
        self.request(|respond_to| PlayerCommand::GetPosition { respond_to })
            .await
    }

    /// `None` until the current video is ready
    pub async fn get_duration(&self) -> PlayerResult<Option<Duration>> {
        self.request(|respond_to| PlayerCommand::GetDuration { respond_to })
            .await
    }

    pub async fn get_audio_tracks(&self) -> PlayerResult<Vec<NativeTrack>> {
        self.request(|respond_to| PlayerCommand::GetAudioTracks { respond_to })
            .await
    }

    pub async fn get_subtitle_tracks(&self) -> PlayerResult<Vec<NativeTrack>> {
        self.request(|respond_to| PlayerCommand::GetSubtitleTracks { respond_to })
            .await
    }

    pub async fn select_audio(&self, track_id: Option<i64>) -> PlayerResult<()> {
        self.request(|respond_to| PlayerCommand::SelectAudio {
            track_id,
            respond_to,
        })
        .await?
    }

    /// Returns the engine track id that ended up selected, if any
    pub async fn select_subtitle(&self, descriptor: Option<SubtitleDescriptor>) -> PlayerResult<Option<i64>> {
        self.request(|respond_to| PlayerCommand::SelectSubtitle {
            descriptor,
            respond_to,
        })
        .await?
    }

    pub async fn attach_compositor(&self, compositor: CompositorHandle) -> PlayerResult<()> {
        self.request(|respond_to| PlayerCommand::AttachCompositor {
            compositor,
            respond_to,
        })
        .await
    }

    pub async fn set_effects(&self, effects: EffectParameters) -> PlayerResult<()> {
        self.request(|respond_to| PlayerCommand::SetEffects {
            effects,
            respond_to,
        })
        .await?
    }

    pub async fn teardown(&self) -> PlayerResult<()> {
        self.request(|respond_to| PlayerCommand::Teardown { respond_to })
            .await?
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    /// Readiness signal for the UI
    pub fn subscribe_readiness(&self) -> watch::Receiver<ReadinessState> {
        self.engine.subscribe_readiness()
    }

    pub async fn wait_until_ready(&self, timeout: Duration) -> PlayerResult<()> {
        self.engine.wait_until_ready(timeout).await
    }
}
