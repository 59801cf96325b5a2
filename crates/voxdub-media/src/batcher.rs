//! Groups captured chunks into fixed-size batches.

use std::sync::Arc;

use tracing::{debug, info};

use voxdub_core::types::{AudioBatch, AudioChunk};

use crate::queue::SubmissionQueue;

pub struct Batcher {
    threshold: usize,
    pending: Vec<AudioChunk>,
    next_seq: u64,
    queue: Arc<SubmissionQueue>,
}

impl Batcher {
    /// A threshold of 0 is treated as 1.
    pub fn new(threshold: usize, queue: Arc<SubmissionQueue>) -> Self {
        let threshold = threshold.max(1);
        Self {
            threshold,
            pending: Vec::with_capacity(threshold),
            next_seq: 0,
            queue,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Accept one chunk. Returns the sequence number of the batch it
    /// completed, if any.
    pub fn on_chunk(&mut self, chunk: AudioChunk) -> Option<u64> {
        self.pending.push(chunk);
        if self.pending.len() < self.threshold {
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let batch = AudioBatch::from_chunks(seq, &self.pending);
        self.pending.clear();
        debug!(seq, bytes = batch.len(), "Batch formed");
        self.queue.enqueue(batch);
        Some(seq)
    }

    /// Drop chunks that never reached the threshold.
    pub fn discard_remainder(&mut self) -> usize {
        let count = self.pending.len();
        if count > 0 {
            info!(count, "Discarding partial batch");
            self.pending.clear();
        }
        count
    }
}
