//! Periodic chunk capture from a live audio source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxdub_core::clock::Clock;
use voxdub_core::error::{Result, VoxdubError};
use voxdub_core::types::AudioChunk;

use crate::batcher::Batcher;

/// Audio component of a live source.
#[async_trait]
pub trait AudioTrack: Send + Sync {
    /// Audio recorded since the previous call. `Ok(None)` once the track has
    /// ended.
    async fn read_chunk(&self) -> Result<Option<AudioChunk>>;
}

/// A playing media element whose audio is being dubbed.
pub trait LiveSource: Send + Sync + 'static {
    /// `None` when the source has no audio component.
    fn audio_track(&self) -> Option<Arc<dyn AudioTrack>>;

    fn position(&self) -> Duration;

    fn playback_rate(&self) -> f64;

    fn set_muted(&self, muted: bool);

    fn is_muted(&self) -> bool;
}

/// Totals for one capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub chunks: u64,
    pub batches: u64,
    pub discarded: usize,
}

struct Session {
    cancel: CancellationToken,
    task: JoinHandle<CaptureSummary>,
}

pub struct ChunkCapturer {
    clock: Arc<dyn Clock>,
    interval: Duration,
    session: Option<Session>,
}

impl ChunkCapturer {
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            session: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Begin sampling `source` every interval, feeding `batcher`.
    ///
    /// The track handle is held until the session ends.
    pub fn start(&mut self, source: &dyn LiveSource, mut batcher: Batcher) -> Result<()> {
        if self.is_running() {
            return Err(VoxdubError::Capture("already running".into()));
        }
        let track = source.audio_track().ok_or(VoxdubError::NoAudioSource)?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let clock = self.clock.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Capture started");
            let mut summary = CaptureSummary::default();
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = clock.sleep(interval) => {}
                }
                let sample = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    sample = track.read_chunk() => sample,
                };
                match sample {
                    Ok(Some(chunk)) if chunk.is_empty() => debug!("Empty sample skipped"),
                    Ok(Some(chunk)) => {
                        summary.chunks += 1;
                        if batcher.on_chunk(chunk).is_some() {
                            summary.batches += 1;
                        }
                    }
                    Ok(None) => {
                        info!("Audio track ended");
                        break;
                    }
                    Err(e) => warn!(%e, "Sample read failed"),
                }
            }
            summary.discarded = batcher.discard_remainder();
            info!(
                chunks = summary.chunks,
                batches = summary.batches,
                discarded = summary.discarded,
                "Capture stopped"
            );
            summary
        });

        self.session = Some(Session { cancel, task });
        Ok(())
    }

    /// Halt sampling. A sample being read is discarded.
    pub async fn stop(&mut self) -> Option<CaptureSummary> {
        let session = self.session.take()?;
        session.cancel.cancel();
        session.task.await.ok()
    }

    /// Wait for the track to end on its own.
    pub async fn join(&mut self) -> Option<CaptureSummary> {
        let session = self.session.take()?;
        session.task.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use voxdub_core::clock::ManualClock;

    use super::*;
    use crate::queue::SubmissionQueue;

    struct ScriptedTrack {
        chunks: Mutex<Vec<AudioChunk>>,
    }

    #[async_trait]
    impl AudioTrack for ScriptedTrack {
        async fn read_chunk(&self) -> Result<Option<AudioChunk>> {
            let mut chunks = self.chunks.lock().unwrap();
            if chunks.is_empty() {
                return Ok(None);
            }
            Ok(Some(chunks.remove(0)))
        }
    }

    struct Source(Option<Arc<dyn AudioTrack>>);

    impl LiveSource for Source {
        fn audio_track(&self) -> Option<Arc<dyn AudioTrack>> {
            self.0.clone()
        }
        fn position(&self) -> Duration {
            Duration::ZERO
        }
        fn playback_rate(&self) -> f64 {
            1.0
        }
        fn set_muted(&self, _muted: bool) {}
        fn is_muted(&self) -> bool {
            false
        }
    }

    fn source(chunks: Vec<AudioChunk>) -> Source {
        Source(Some(Arc::new(ScriptedTrack {
            chunks: Mutex::new(chunks),
        })))
    }

    #[tokio::test]
    async fn test_no_audio_track_fails_start() {
        let mut capturer = ChunkCapturer::new(Arc::new(ManualClock::new(0)), Duration::from_secs(1));
        let queue = Arc::new(SubmissionQueue::new());
        let err = capturer
            .start(&Source(None), Batcher::new(3, queue))
            .unwrap_err();
        assert!(matches!(err, VoxdubError::NoAudioSource));
        assert!(!capturer.is_running());
    }

    #[tokio::test]
    async fn test_floor_n_over_t_batches_and_remainder_discarded() {
        let clock = Arc::new(ManualClock::new(0));
        let mut capturer = ChunkCapturer::new(clock.clone(), Duration::from_secs(1));
        let queue = Arc::new(SubmissionQueue::new());
        let chunks = (0..8u8).map(|i| AudioChunk::new(vec![i])).collect();

        capturer
            .start(&source(chunks), Batcher::new(3, queue.clone()))
            .unwrap();
        let summary = capturer.join().await.unwrap();

        assert_eq!(summary, CaptureSummary { chunks: 8, batches: 2, discarded: 2 });
        assert_eq!(queue.len(), 2);
        // One sleep per sample plus the one that observed end of track.
        assert_eq!(clock.sleeps().len(), 9);
        assert!(clock.sleeps().iter().all(|d| *d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_empty_samples_are_skipped() {
        let mut capturer = ChunkCapturer::new(Arc::new(ManualClock::new(0)), Duration::from_millis(10));
        let queue = Arc::new(SubmissionQueue::new());
        let chunks = vec![
            AudioChunk::new(vec![1]),
            AudioChunk::new(Vec::new()),
            AudioChunk::new(vec![2]),
        ];
        capturer
            .start(&source(chunks), Batcher::new(2, queue.clone()))
            .unwrap();
        let summary = capturer.join().await.unwrap();
        assert_eq!(summary.chunks, 2);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_sampling_and_rejects_double_start() {
        let mut capturer = ChunkCapturer::new(
            Arc::new(voxdub_core::clock::SystemClock),
            Duration::from_secs(1),
        );
        let queue = Arc::new(SubmissionQueue::new());
        let chunks = (0..100u8).map(|i| AudioChunk::new(vec![i])).collect();
        let src = source(chunks);

        capturer.start(&src, Batcher::new(3, queue.clone())).unwrap();
        assert!(capturer.is_running());
        let again = capturer.start(&src, Batcher::new(3, queue.clone()));
        assert!(matches!(again, Err(VoxdubError::Capture(_))));

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        let summary = capturer.stop().await.unwrap();

        assert_eq!(summary.chunks, 4);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.discarded, 1);
        assert!(!capturer.is_running());
    }
}
