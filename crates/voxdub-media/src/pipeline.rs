//! Owned pipeline context: capturer, queue, worker and player for one live
//! source.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use voxdub_core::clock::Clock;
use voxdub_core::config::PipelineConfig;
use voxdub_core::error::Result;
use voxdub_core::processor::RemoteProcessor;
use voxdub_core::settings::SettingsSource;

use crate::batcher::Batcher;
use crate::capture::{CaptureSummary, ChunkCapturer, LiveSource};
use crate::notify::Notifier;
use crate::player::{PlaybackBackend, Player};
use crate::queue::{SubmissionQueue, SubmissionWorker, WorkerStats};

/// External collaborators the pipeline is wired to.
pub struct PipelineServices {
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<dyn SettingsSource>,
    pub processor: Arc<dyn RemoteProcessor>,
    pub backend: Arc<dyn PlaybackBackend>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct DubbingPipeline {
    live: Arc<dyn LiveSource>,
    queue: Arc<SubmissionQueue>,
    player: Arc<Player>,
    capturer: ChunkCapturer,
    batch_threshold: usize,
    stats: Arc<WorkerStats>,
    worker_cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl DubbingPipeline {
    /// Build the pipeline and spawn its submission worker. Capture does not
    /// start until [`DubbingPipeline::start`].
    pub fn new(config: &PipelineConfig, live: Arc<dyn LiveSource>, services: PipelineServices) -> Self {
        let queue = Arc::new(SubmissionQueue::new());
        let player = Arc::new(Player::new(services.backend));
        let stats = Arc::new(WorkerStats::default());
        let worker_cancel = CancellationToken::new();

        let worker = SubmissionWorker {
            queue: queue.clone(),
            settings: services.settings,
            processor: services.processor,
            player: player.clone(),
            live: live.clone(),
            notifier: services.notifier,
            notification_ttl: Duration::from_millis(config.notification_ttl_ms),
            stats: stats.clone(),
        }
        .spawn(worker_cancel.clone());

        Self {
            live,
            queue,
            player,
            capturer: ChunkCapturer::new(
                services.clock,
                Duration::from_millis(config.chunk_interval_ms),
            ),
            batch_threshold: config.batch_threshold,
            stats,
            worker_cancel,
            worker: Some(worker),
        }
    }

    /// Begin capturing from the live source.
    pub fn start(&mut self) -> Result<()> {
        let batcher = Batcher::new(self.batch_threshold, self.queue.clone());
        self.capturer.start(self.live.as_ref(), batcher)?;
        info!(threshold = self.batch_threshold, "Dubbing started");
        Ok(())
    }

    /// Stop capturing. Queued and in-flight batches are still processed.
    pub async fn stop(&mut self) -> Option<CaptureSummary> {
        let summary = self.capturer.stop().await;
        if summary.is_some() {
            info!("Dubbing stopped");
        }
        summary
    }

    /// Start or stop capture to match an `enabled` flag.
    pub async fn sync_enabled(&mut self, enabled: bool) -> Result<()> {
        match (enabled, self.capturer.is_running()) {
            (true, false) => self.start(),
            (false, true) => {
                self.stop().await;
                Ok(())
            }
            _ => {
                debug!(enabled, "Capture already in requested state");
                Ok(())
            }
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capturer.is_running()
    }

    pub fn queue(&self) -> &Arc<SubmissionQueue> {
        &self.queue
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    pub fn live(&self) -> &Arc<dyn LiveSource> {
        &self.live
    }

    /// Wait for the live source's audio to end.
    pub async fn wait_for_source_end(&mut self) -> Option<CaptureSummary> {
        self.capturer.join().await
    }

    /// Wait until every queued batch is processed and playback has finished.
    pub async fn drain(&self) {
        self.queue.wait_idle().await;
        self.player.drain().await;
    }

    /// Stop capture, let the worker finish its current batch, and wait for
    /// playback to end.
    pub async fn shutdown(mut self) {
        self.stop().await;
        self.worker_cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        self.player.drain().await;
    }
}

impl Drop for DubbingPipeline {
    fn drop(&mut self) {
        self.worker_cancel.cancel();
    }
}
