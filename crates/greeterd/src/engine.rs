use crate::poller::DetectionFeed;
use crate::render::Renderer;
use greeter_core::machine::Snapshot;
use greeter_core::{
    ContentPools, Effect, Gesture, InteractionStateMachine, Scene, Surface, Tick, TouchRejected,
};
use greeter_io::{AudioOutput, StatsError, StatsStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("stats error: {0}")]
    Stats(#[from] StatsError),
    #[error("engine task exited")]
    ChannelClosed,
}

/// Status report for the admin interface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    #[serde(flatten)]
    pub machine: Snapshot,
    pub scene: Scene,
    pub detector_ready: bool,
    pub content_lines: usize,
}

/// Messages sent from D-Bus handlers to the engine task.
enum EngineRequest {
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Stats {
        reply: oneshot::Sender<Result<BTreeMap<String, u64>, StatsError>>,
    },
    Touch {
        gesture: Gesture,
        reply: oneshot::Sender<Result<(), TouchRejected>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    ReloadContent {
        reply: oneshot::Sender<usize>,
    },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Every recorded day with its greeting count.
    pub async fn greeting_stats(&self) -> Result<BTreeMap<String, u64>, EngineError> {
        Ok(self.request(|reply| EngineRequest::Stats { reply }).await??)
    }

    /// Queue a touch animation; the inner result says whether it was accepted.
    pub async fn touch(&self, gesture: Gesture) -> Result<Result<(), TouchRejected>, EngineError> {
        self.request(|reply| EngineRequest::Touch { gesture, reply })
            .await
    }

    pub async fn reset(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Reset { reply }).await
    }

    /// Reload the content file; returns the number of categories loaded.
    pub async fn reload_content(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::ReloadContent { reply })
            .await
    }
}

/// Sole owner of the state machine and the collaborators it drives.
pub struct Engine<A, S, R> {
    machine: InteractionStateMachine,
    audio: A,
    stats: S,
    renderer: R,
    detections: DetectionFeed,
    surface: Surface,
    content_path: PathBuf,
    scene: Scene,
    finished_tx: mpsc::UnboundedSender<u64>,
    finished_rx: Option<mpsc::UnboundedReceiver<u64>>,
}

impl<A, S, R> Engine<A, S, R>
where
    A: AudioOutput + 'static,
    S: StatsStore + 'static,
    R: Renderer + 'static,
{
    pub fn new(
        machine: InteractionStateMachine,
        audio: A,
        stats: S,
        renderer: R,
        detections: DetectionFeed,
        surface: Surface,
        content_path: PathBuf,
    ) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Self {
            machine,
            audio,
            stats,
            renderer,
            detections,
            surface,
            content_path,
            scene: Scene::Idle,
            finished_tx,
            finished_rx: Some(finished_rx),
        }
    }

    /// Run the engine on a Tokio task, ticking every `tick`. The task ends
    /// when every [`EngineHandle`] has been dropped.
    pub fn spawn(mut self, tick: Duration) -> EngineHandle {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);
        let mut finished_rx = self
            .finished_rx
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            tracing::info!(tick_ms = tick.as_millis() as u64, "engine started");
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.on_tick(Instant::now()),
                    Some(greeting) = finished_rx.recv() => {
                        self.machine.notify_audio_finished(greeting);
                    }
                    request = rx.recv() => match request {
                        Some(request) => self.handle(request),
                        None => break,
                    },
                }
            }
            tracing::info!("engine stopped");
        });

        EngineHandle { tx }
    }

    fn on_tick(&mut self, now: Instant) {
        let local = chrono::Local::now().naive_local();
        let batch = self.detections.latest();
        let effects = self.machine.tick(Tick {
            now,
            local,
            batch: &batch,
            surface: self.surface,
        });
        for effect in effects {
            self.apply(effect);
        }

        let scene = self.machine.scene(now);
        self.renderer.draw(&scene);
        self.scene = scene;
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Transition { .. } => {}
            Effect::StartAnimation(gesture) => {
                tracing::debug!(?gesture, "animation started");
            }
            Effect::PlayClip { greeting, clip } => match self.audio.play_clip(&clip) {
                Ok(playback) => {
                    let finished = self.finished_tx.clone();
                    tokio::spawn(async move {
                        match playback.finished().await {
                            Ok(()) => {
                                let _ = finished.send(greeting);
                            }
                            Err(e) => tracing::warn!(clip, error = %e, "playback failed"),
                        }
                    });
                }
                Err(e) => tracing::warn!(clip, error = %e, "could not start playback"),
            },
            Effect::PlayByKey { greeting, text } => {
                if !self.audio.play_by_key(&text) {
                    tracing::debug!(greeting, "no audio for line; showing text only");
                }
            }
            Effect::RecordGreeting { day } => match self.stats.increment(day) {
                Ok(count) => tracing::info!(%day, count, "greeting counted"),
                Err(e) => tracing::warn!(%day, error = %e, "failed to record greeting"),
            },
        }
    }

    fn handle(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Status { reply } => {
                let _ = reply.send(EngineStatus {
                    machine: self.machine.snapshot(),
                    scene: self.scene.clone(),
                    detector_ready: self.detections.ready(),
                    content_lines: self.machine.picker().pools().len(),
                });
            }
            EngineRequest::Stats { reply } => {
                let _ = reply.send(self.stats.read_all());
            }
            EngineRequest::Touch { gesture, reply } => {
                let result = self.machine.request_touch(gesture, Instant::now());
                match &result {
                    Ok(()) => tracing::info!(?gesture, "touch accepted"),
                    Err(reason) => tracing::info!(?gesture, %reason, "touch rejected"),
                }
                let _ = reply.send(result);
            }
            EngineRequest::Reset { reply } => {
                self.machine.reset(Instant::now());
                let _ = reply.send(());
            }
            EngineRequest::ReloadContent { reply } => {
                let pools = ContentPools::load_or_fallback(&self.content_path);
                let categories = pools.categories().count();
                self.audio.load_clips(&pools);
                self.machine.set_pools(pools);
                let _ = reply.send(categories);
            }
        }
    }
}
