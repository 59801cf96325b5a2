//! Resynchronized playback of synthesized audio.
//!
//! The live source stays muted while any dubbed segment plays. Segments may
//! overlap, so it is unmuted only when the last one ends, whether it finished,
//! errored, or failed to start.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use voxdub_core::error::{Result, VoxdubError};

use crate::capture::LiveSource;

/// A loaded audio segment.
#[async_trait]
pub trait PlayableAudio: Send {
    fn seek(&mut self, position: Duration) -> Result<()>;

    fn set_rate(&mut self, rate: f64) -> Result<()>;

    async fn start(&mut self) -> Result<()>;

    /// Resolves when playback ends naturally (`Ok`) or errors.
    async fn finished(&mut self) -> Result<()>;

    /// Free the underlying resource. Called exactly once.
    fn release(&mut self);
}

#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    async fn load(&self, audio: Bytes) -> Result<Box<dyn PlayableAudio>>;
}

/// Resolves once the segment has finished and been released.
pub struct PlaybackHandle {
    done: oneshot::Receiver<Result<()>>,
}

impl PlaybackHandle {
    pub async fn wait(self) -> Result<()> {
        self.done
            .await
            .map_err(|_| VoxdubError::Playback("playback task dropped".into()))?
    }
}

fn playback_error(e: VoxdubError) -> VoxdubError {
    match e {
        VoxdubError::Playback(_) => e,
        other => VoxdubError::Playback(other.to_string()),
    }
}

/// Unmute `live` if this was the last segment playing.
fn end_segment(playing: &AtomicUsize, live: &dyn LiveSource) {
    if playing.fetch_sub(1, Ordering::SeqCst) == 1 {
        live.set_muted(false);
    }
}

pub struct Player {
    backend: Arc<dyn PlaybackBackend>,
    tasks: TaskTracker,
    playing: Arc<AtomicUsize>,
}

impl Player {
    pub fn new(backend: Arc<dyn PlaybackBackend>) -> Self {
        Self {
            backend,
            tasks: TaskTracker::new(),
            playing: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start `audio` aligned to the live source's position and rate.
    ///
    /// Seek and rate are best-effort. A start failure restores the unmuted
    /// state and releases the segment before returning the error.
    pub async fn play(&self, audio: Bytes, live: Arc<dyn LiveSource>) -> Result<PlaybackHandle> {
        let bytes = audio.len();
        let mut playable = self.backend.load(audio).await.map_err(playback_error)?;

        let position = live.position();
        let rate = live.playback_rate();
        if let Err(e) = playable.seek(position) {
            debug!(%e, ?position, "Seek not applied");
        }
        if let Err(e) = playable.set_rate(rate) {
            debug!(%e, rate, "Rate not applied");
        }

        self.playing.fetch_add(1, Ordering::SeqCst);
        live.set_muted(true);
        if let Err(e) = playable.start().await {
            end_segment(&self.playing, live.as_ref());
            playable.release();
            return Err(playback_error(e));
        }
        info!(bytes, position_ms = position.as_millis() as u64, rate, "Dubbed playback started");

        let (tx, rx) = oneshot::channel();
        let playing = self.playing.clone();
        self.tasks.spawn(async move {
            let outcome = playable.finished().await.map_err(playback_error);
            end_segment(&playing, live.as_ref());
            playable.release();
            debug!(ok = outcome.is_ok(), "Dubbed playback finished");
            let _ = tx.send(outcome);
        });
        Ok(PlaybackHandle { done: rx })
    }

    /// Run `fut` alongside playback so [`Player::drain`] waits for it too.
    pub fn track<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(fut);
    }

    /// Wait for every started segment to finish.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Segments started and not yet ended.
    pub fn playing(&self) -> usize {
        self.playing.load(Ordering::SeqCst)
    }
}

/// Writes each segment to `dir` as `segment-<n>.mp3` and completes at once.
pub struct FileSinkBackend {
    dir: PathBuf,
    next: AtomicU64,
}

impl FileSinkBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl PlaybackBackend for FileSinkBackend {
    async fn load(&self, audio: Bytes) -> Result<Box<dyn PlayableAudio>> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FileSegment {
            path: self.dir.join(format!("segment-{n}.mp3")),
            audio: Some(audio),
        }))
    }
}

struct FileSegment {
    path: PathBuf,
    audio: Option<Bytes>,
}

#[async_trait]
impl PlayableAudio for FileSegment {
    fn seek(&mut self, _position: Duration) -> Result<()> {
        Ok(())
    }

    fn set_rate(&mut self, _rate: f64) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let audio = self
            .audio
            .take()
            .ok_or_else(|| VoxdubError::Playback("segment already started".into()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, &audio).await?;
        info!(path = %self.path.display(), bytes = audio.len(), "Segment written");
        Ok(())
    }

    async fn finished(&mut self) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) {
        self.audio = None;
    }
}
