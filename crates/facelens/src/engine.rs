//! The detection-overlay loop.
//!
//! One session at a time moves through `Idle → Starting → Detecting → Idle`.
//! Each session owns a cancellation token sampled after every suspension
//! point, so results that land after `stop` are dropped instead of
//! published. Inference is single-flight across sessions: a tick that finds
//! a call still in flight is skipped.

use crate::store::{DetectionStore, LoopPhase, Snapshot};
use facelens_core::geometry;
use facelens_core::{Capabilities, DetectorOptions, FaceInference, LoadState, Size};
use facelens_hw::{FrameSource, SourceError, SourceKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};

/// Roughly one animation frame.
pub const DEFAULT_TICK: Duration = Duration::from_millis(16);
/// On-screen width cap for the rendered frame.
pub const DEFAULT_DISPLAY_MAX_WIDTH: u32 = 600;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub detector: DetectorOptions,
    pub capabilities: Capabilities,
    /// Period between loop iterations and readiness polls.
    pub tick: Duration,
    pub display_max_width: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            detector: DetectorOptions::default(),
            capabilities: Capabilities::ALL,
            tick: DEFAULT_TICK,
            display_max_width: DEFAULT_DISPLAY_MAX_WIDTH,
        }
    }
}

/// Guarantees at most one inference call in flight.
#[derive(Default)]
struct InferenceGate {
    busy: AtomicBool,
}

struct GatePermit(Arc<InferenceGate>);

impl InferenceGate {
    fn try_acquire(self: &Arc<Self>) -> Option<GatePermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit(self.clone()))
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

struct Session {
    id: u64,
    cancel: watch::Sender<bool>,
    source: Arc<dyn FrameSource>,
}

/// Drives frame sources through inference into the [`DetectionStore`].
pub struct OverlayEngine {
    inference: Arc<dyn FaceInference>,
    store: Arc<DetectionStore>,
    gate: Arc<InferenceGate>,
    options: EngineOptions,
    session: Option<Session>,
}

impl OverlayEngine {
    pub fn new(inference: Arc<dyn FaceInference>, options: EngineOptions) -> Self {
        Self {
            inference,
            store: Arc::new(DetectionStore::new()),
            gate: Arc::new(InferenceGate::default()),
            options,
            session: None,
        }
    }

    pub fn store(&self) -> &Arc<DetectionStore> {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.store.subscribe()
    }

    pub fn phase(&self) -> LoopPhase {
        self.store.snapshot().phase
    }

    /// Start detecting on `source`, stopping any active session first.
    ///
    /// Resolves once the source reports its native size; detection itself
    /// begins on a later tick, after the first frame is ready and the
    /// inference models are loaded. A source that fails to start leaves the
    /// engine Idle.
    pub async fn start(&mut self, source: Arc<dyn FrameSource>) -> Result<u64, EngineError> {
        self.stop();

        let kind = source.kind();
        let id = self.store.begin_session(kind);
        tracing::info!(session = id, source = %kind, "starting source");

        let native = match source.start().await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(session = id, source = %kind, error = %e, "source failed to start");
                source.stop();
                self.store.finish_session(id, false);
                return Err(e.into());
            }
        };

        let display_size = geometry::fit_width(native, self.options.display_max_width);
        self.store.set_sizes(id, native, display_size);
        if kind == SourceKind::Live {
            self.store.set_camera_on(true);
        }
        tracing::info!(session = id, native = %native, display = %display_size, "source started");

        let (cancel, cancel_rx) = watch::channel(false);
        let ctx = SessionContext {
            id,
            source: source.clone(),
            inference: self.inference.clone(),
            store: self.store.clone(),
            gate: self.gate.clone(),
            options: self.options,
            cancel: cancel_rx,
        };
        tokio::spawn(run_session(ctx));

        self.session = Some(Session { id, cancel, source });
        Ok(id)
    }

    /// Cancel the active session, release its source and clear the overlay.
    ///
    /// An inference call still in flight keeps running but its result is
    /// discarded.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.cancel.send_replace(true);
        session.source.stop();
        self.store.clear();
        tracing::info!(session = session.id, "session stopped");
    }

    /// Update the on-screen size the overlay is drawn at.
    pub fn set_display_size(&self, display: Size) {
        self.store.set_display_size(display);
    }

    /// Wait until the loop is back in Idle (still image done, source ended
    /// or stopped).
    pub async fn wait_until_idle(&self) {
        let mut rx = self.store.subscribe();
        let _ = rx.wait_for(|s| s.phase == LoopPhase::Idle).await;
    }
}

impl Drop for OverlayEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SessionContext {
    id: u64,
    source: Arc<dyn FrameSource>,
    inference: Arc<dyn FaceInference>,
    store: Arc<DetectionStore>,
    gate: Arc<InferenceGate>,
    options: EngineOptions,
    cancel: watch::Receiver<bool>,
}

impl SessionContext {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Wait for the next tick. Returns `false` once the session is cancelled.
    async fn next_tick(&mut self, ticker: &mut Interval) -> bool {
        if self.cancelled() {
            return false;
        }
        tokio::select! {
            _ = ticker.tick() => !self.cancelled(),
            _ = self.cancel.changed() => false,
        }
    }

    /// Run one inference on the current frame and publish it.
    ///
    /// Returns `false` if the session was cancelled, or its source ended,
    /// while inference ran; the result is then dropped.
    async fn detect_once(&self) -> bool {
        let Some(frame) = self.source.current_frame() else {
            tracing::trace!(session = self.id, "no frame available");
            return true;
        };

        let detections = match self
            .inference
            .detect_all(&frame, &self.options.detector, self.options.capabilities)
            .await
        {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(session = self.id, seq = frame.sequence, error = %e, "inference failed; treating as no faces");
                Vec::new()
            }
        };

        if self.cancelled() {
            tracing::debug!(session = self.id, "discarding result of stopped session");
            return false;
        }
        if self.source.is_ended() {
            tracing::info!(session = self.id, "source ended during inference; discarding result");
            self.store.finish_session(self.id, false);
            return false;
        }

        tracing::trace!(session = self.id, seq = frame.sequence, faces = detections.len(), "publishing detections");
        self.store.set_detections(self.id, detections);
        true
    }
}

async fn run_session(mut ctx: SessionContext) {
    let mut ticker = tokio::time::interval(ctx.options.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Starting: re-poll every tick until a frame is ready and models are loaded.
    loop {
        if !ctx.next_tick(&mut ticker).await {
            return;
        }
        if ctx.source.is_ended() {
            tracing::info!(session = ctx.id, "source ended before first frame");
            ctx.store.finish_session(ctx.id, false);
            return;
        }
        match ctx.inference.load_state() {
            LoadState::Ready if ctx.source.is_ready() => break,
            LoadState::Failed(reason) => {
                tracing::error!(session = ctx.id, reason = %reason, "inference backend failed; giving up");
                ctx.source.stop();
                ctx.store.finish_session(ctx.id, false);
                return;
            }
            _ => {}
        }
    }

    if !ctx.store.set_phase(ctx.id, LoopPhase::Detecting) {
        return;
    }
    tracing::info!(session = ctx.id, source = %ctx.source.kind(), "detecting");

    match ctx.source.kind() {
        SourceKind::Still => run_still(&mut ctx, &mut ticker).await,
        SourceKind::Live => run_live(&mut ctx, &mut ticker).await,
    }
}

/// Exactly one inference, then back to Idle with the result kept on screen.
async fn run_still(ctx: &mut SessionContext, ticker: &mut Interval) {
    let permit = loop {
        if let Some(permit) = ctx.gate.try_acquire() {
            break permit;
        }
        if !ctx.next_tick(ticker).await {
            return;
        }
    };

    let published = ctx.detect_once().await;
    drop(permit);

    if published {
        ctx.store.finish_session(ctx.id, true);
        tracing::info!(session = ctx.id, "still image detection complete");
    }
}

async fn run_live(ctx: &mut SessionContext, ticker: &mut Interval) {
    loop {
        if ctx.source.is_ended() {
            tracing::info!(session = ctx.id, "live source ended");
            ctx.store.finish_session(ctx.id, false);
            return;
        }

        match ctx.gate.try_acquire() {
            Some(permit) => {
                let still_active = ctx.detect_once().await;
                drop(permit);
                if !still_active {
                    return;
                }
            }
            None => tracing::trace!(session = ctx.id, "inference still in flight; skipping tick"),
        }

        if !ctx.next_tick(ticker).await {
            return;
        }
    }
}
