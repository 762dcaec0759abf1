//! Dedicated render thread owning the GL context.
//!
//! Every GPU call, teardown included, runs on this thread. Other threads only
//! queue commands. Redraw requests coalesce: while one is queued, further
//! requests are dropped.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{Compositor, EffectParameters, FrameSource, GpuDevice};
use crate::player::error::{PlayerError, PlayerResult};

#[derive(Debug)]
enum RenderCommand {
    Redraw,
    Resize(u32, u32),
    Shutdown,
}

/// State shared between callers and the render thread
struct Shared {
    redraw_queued: AtomicBool,
    frame_pending: AtomicBool,
    effects: Mutex<EffectParameters>,
}

impl Shared {
    /// Returns true if the caller must enqueue a redraw
    fn try_queue_redraw(&self) -> bool {
        !self.redraw_queued.swap(true, Ordering::AcqRel)
    }
}

fn request_redraw(tx: &mpsc::UnboundedSender<RenderCommand>, shared: &Shared) -> PlayerResult<()> {
    if shared.try_queue_redraw() {
        if tx.send(RenderCommand::Redraw).is_err() {
            shared.redraw_queued.store(false, Ordering::Release);
            return Err(PlayerError::RenderThreadGone);
        }
    }
    Ok(())
}

/// Cheap handle for the engine's frame-available callback
#[derive(Clone)]
pub struct FrameNotifier {
    tx: mpsc::UnboundedSender<RenderCommand>,
    shared: Arc<Shared>,
}

impl FrameNotifier {
    pub fn notify(&self) {
        self.shared.frame_pending.store(true, Ordering::Release);
        let _ = request_redraw(&self.tx, &self.shared);
    }
}

pub struct CompositorHandle {
    tx: mpsc::UnboundedSender<RenderCommand>,
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for CompositorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositorHandle")
            .field("effects", &*self.shared.effects.lock())
            .field("running", &self.thread.lock().is_some())
            .finish()
    }
}

impl CompositorHandle {
    /// Start the render thread and set up the compositor on it.
    ///
    /// `create` runs on the new thread, where it must make the GL context
    /// current and build the device and frame source. Setup errors (including
    /// shader compile failures) are returned from here.
    pub fn spawn<D, F>(create: F, viewport: (u32, u32), effects: EffectParameters) -> PlayerResult<Self>
    where
        D: GpuDevice + 'static,
        F: FnOnce() -> PlayerResult<(D, Box<dyn FrameSource>)> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<PlayerResult<()>>(1);
        let shared = Arc::new(Shared {
            redraw_queued: AtomicBool::new(false),
            frame_pending: AtomicBool::new(false),
            effects: Mutex::new(effects),
        });

        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("reel-compositor".to_string())
            .spawn(move || {
                let setup = create()
                    .and_then(|(device, source)| Compositor::setup(device, source, viewport, effects));
                match setup {
                    Ok(compositor) => {
                        let _ = ready_tx.send(Ok(()));
                        run(compositor, rx, thread_shared);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| PlayerError::Gpu(format!("Failed to spawn render thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Render thread started");
                Ok(Self {
                    tx,
                    shared,
                    thread: Mutex::new(Some(thread)),
                })
            }
            Ok(Err(e)) => {
                error!("Compositor setup failed: {}", e);
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PlayerError::RenderThreadGone)
            }
        }
    }

    pub fn frame_notifier(&self) -> FrameNotifier {
        FrameNotifier {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }

    /// A new decoded frame is available
    pub fn notify_frame_available(&self) {
        self.shared.frame_pending.store(true, Ordering::Release);
        if let Err(e) = request_redraw(&self.tx, &self.shared) {
            debug!("Dropping frame notification: {}", e);
        }
    }

    pub fn request_redraw(&self) -> PlayerResult<()> {
        request_redraw(&self.tx, &self.shared)
    }

    pub fn effects(&self) -> EffectParameters {
        *self.shared.effects.lock()
    }

    fn update_effects(&self, f: impl FnOnce(&mut EffectParameters)) -> PlayerResult<()> {
        {
            let mut effects = self.shared.effects.lock();
            f(&mut effects);
        }
        self.request_redraw()
    }

    pub fn set_effects(&self, effects: EffectParameters) -> PlayerResult<()> {
        self.update_effects(|e| *e = effects)
    }

    pub fn set_sharpen(&self, enabled: bool, strength: f32) -> PlayerResult<()> {
        self.update_effects(|e| {
            e.set_sharpen_enabled(enabled);
            e.set_sharpen(strength);
        })
    }

    pub fn set_tone_boost(&self, enabled: bool, strength: f32) -> PlayerResult<()> {
        self.update_effects(|e| {
            e.set_tone_enabled(enabled);
            e.set_tone(strength);
        })
    }

    pub fn set_frame_blend(&self, enabled: bool, strength: f32) -> PlayerResult<()> {
        self.update_effects(|e| {
            e.set_blend_enabled(enabled);
            e.set_blend(strength);
        })
    }

    pub fn resize(&self, width: u32, height: u32) -> PlayerResult<()> {
        self.tx
            .send(RenderCommand::Resize(width, height))
            .map_err(|_| PlayerError::RenderThreadGone)?;
        self.request_redraw()
    }

    /// Stop the render thread after it has released every GPU resource.
    /// Blocks until the thread exits.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = self.tx.send(RenderCommand::Shutdown);
        if thread.join().is_err() {
            warn!("Render thread panicked");
        }
        info!("Render thread stopped");
    }
}

impl Drop for CompositorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<D: GpuDevice>(
    mut compositor: Compositor<D>,
    mut rx: mpsc::UnboundedReceiver<RenderCommand>,
    shared: Arc<Shared>,
) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            RenderCommand::Redraw => {
                shared.redraw_queued.store(false, Ordering::Release);
                if shared.frame_pending.swap(false, Ordering::AcqRel) {
                    compositor.mark_frame_pending();
                }
                compositor.set_effects(*shared.effects.lock());
                if let Err(e) = compositor.redraw() {
                    error!("Redraw failed: {}", e);
                }
            }
            RenderCommand::Resize(width, height) => {
                if let Err(e) = compositor.resize(width, height) {
                    error!("Resize failed: {}", e);
                }
            }
            RenderCommand::Shutdown => break,
        }
    }
    compositor.teardown();
    debug!("Render thread exiting");
}
