//! Ordered submission queue drained by a single worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxdub_core::processor::RemoteProcessor;
use voxdub_core::settings::SettingsSource;
use voxdub_core::types::AudioBatch;

use crate::capture::LiveSource;
use crate::notify::{Notifier, PLAYBACK_FAILED, PROCESSING_FAILED};
use crate::player::Player;

/// FIFO of formed batches plus the worker's busy flag.
///
/// `busy` only changes while the item lock is held, so "empty and idle" is
/// observed atomically.
#[derive(Default)]
pub struct SubmissionQueue {
    items: Mutex<VecDeque<AudioBatch>>,
    busy: AtomicBool,
    wake: Notify,
    idle: Notify,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<AudioBatch>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append to the tail and wake the worker.
    pub fn enqueue(&self, batch: AudioBatch) {
        let depth = {
            let mut items = self.items();
            items.push_back(batch);
            items.len()
        };
        debug!(depth, "Batch enqueued");
        self.wake.notify_one();
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Pop the head and mark busy, or mark idle when nothing is queued.
    pub(crate) fn take_next(&self) -> Option<AudioBatch> {
        let mut items = self.items();
        let next = items.pop_front();
        self.busy.store(next.is_some(), Ordering::SeqCst);
        if next.is_none() {
            self.idle.notify_waiters();
        }
        next
    }

    /// Resolve once the queue is empty and no batch is being processed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let items = self.items();
                if items.is_empty() && !self.is_busy() {
                    return;
                }
            }
            notified.await;
        }
    }
}

/// Per-worker outcome counters.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Batches discarded because dubbing was disabled at dequeue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// The single consumer of a [`SubmissionQueue`].
pub struct SubmissionWorker {
    pub(crate) queue: Arc<SubmissionQueue>,
    pub(crate) settings: Arc<dyn SettingsSource>,
    pub(crate) processor: Arc<dyn RemoteProcessor>,
    pub(crate) player: Arc<Player>,
    pub(crate) live: Arc<dyn LiveSource>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) notification_ttl: Duration,
    pub(crate) stats: Arc<WorkerStats>,
}

impl SubmissionWorker {
    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Run until `cancel` fires. Cancellation is only observed between
    /// batches; an in-flight call always completes.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Submission worker started");
            loop {
                while let Some(batch) = self.queue.take_next() {
                    self.handle(batch).await;
                    if cancel.is_cancelled() {
                        break;
                    }
                }
                if cancel.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.queue.wake.notified() => {}
                }
            }
            self.queue.busy.store(false, Ordering::SeqCst);
            self.queue.idle.notify_waiters();
            info!(
                processed = self.stats.processed(),
                dropped = self.stats.dropped(),
                failed = self.stats.failed(),
                "Submission worker stopped"
            );
        })
    }

    async fn handle(&self, batch: AudioBatch) {
        let seq = batch.seq();
        let settings = match self.settings.load().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(seq, %e, "Failed to read settings");
                self.fail();
                return;
            }
        };

        if !settings.enabled {
            debug!(seq, "Dubbing disabled, dropping batch");
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let selection = settings.selection();
        debug!(seq, bytes = batch.len(), voice = %selection.voice, accent = %selection.accent, "Submitting batch");

        let audio = match self.processor.process(&batch, &selection).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(seq, %e, kind = e.kind(), "Batch processing failed");
                self.fail();
                return;
            }
        };
        self.stats.processed.fetch_add(1, Ordering::SeqCst);

        match self.player.play(audio, self.live.clone()).await {
            Ok(handle) => {
                let notifier = self.notifier.clone();
                let ttl = self.notification_ttl;
                self.player.track(async move {
                    if let Err(e) = handle.wait().await {
                        warn!(seq, %e, "Playback ended with error");
                        notifier.notify(PLAYBACK_FAILED, ttl);
                    }
                });
            }
            Err(e) => {
                warn!(seq, %e, "Playback failed to start");
                self.notifier.notify(PLAYBACK_FAILED, self.notification_ttl);
            }
        }
    }

    fn fail(&self) {
        self.stats.failed.fetch_add(1, Ordering::SeqCst);
        self.notifier
            .notify(PROCESSING_FAILED, self.notification_ttl);
    }
}
