//! A live source backed by a recorded audio file.
//!
//! Each `read_chunk` yields the next `chunk_bytes` of the file and advances
//! the reported position by one chunk duration.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use voxdub_core::error::Result;
use voxdub_core::types::AudioChunk;

use crate::capture::{AudioTrack, LiveSource};

/// Default chunk size when splitting a file.
pub const DEFAULT_CHUNK_BYTES: usize = 16 * 1024;

struct FileTrack {
    data: Bytes,
    chunk_bytes: usize,
    offset: AtomicU64,
    chunks_read: AtomicU64,
}

#[async_trait]
impl AudioTrack for FileTrack {
    async fn read_chunk(&self) -> Result<Option<AudioChunk>> {
        let start = self
            .offset
            .fetch_add(self.chunk_bytes as u64, Ordering::SeqCst) as usize;
        if start >= self.data.len() {
            return Ok(None);
        }
        let end = (start + self.chunk_bytes).min(self.data.len());
        self.chunks_read.fetch_add(1, Ordering::SeqCst);
        Ok(Some(AudioChunk::new(self.data.slice(start..end))))
    }
}

pub struct FileLiveSource {
    track: Arc<FileTrack>,
    chunk_duration: Duration,
    rate: f64,
    muted: AtomicBool,
}

impl FileLiveSource {
    pub fn from_bytes(data: impl Into<Bytes>, chunk_bytes: usize, chunk_duration: Duration) -> Self {
        Self {
            track: Arc::new(FileTrack {
                data: data.into(),
                chunk_bytes: chunk_bytes.max(1),
                offset: AtomicU64::new(0),
                chunks_read: AtomicU64::new(0),
            }),
            chunk_duration,
            rate: 1.0,
            muted: AtomicBool::new(false),
        }
    }

    pub async fn open(path: &Path, chunk_bytes: usize, chunk_duration: Duration) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(data, chunk_bytes, chunk_duration))
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn len(&self) -> usize {
        self.track.data.len()
    }

    /// True once every byte has been handed out as a chunk.
    pub fn is_exhausted(&self) -> bool {
        self.track.offset.load(Ordering::SeqCst) as usize >= self.track.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track.data.is_empty()
    }
}

impl LiveSource for FileLiveSource {
    /// An empty file has no audio component.
    fn audio_track(&self) -> Option<Arc<dyn AudioTrack>> {
        if self.track.data.is_empty() {
            return None;
        }
        Some(self.track.clone() as Arc<dyn AudioTrack>)
    }

    fn position(&self) -> Duration {
        let chunks = self.track.chunks_read.load(Ordering::SeqCst);
        u32::try_from(chunks)
            .ok()
            .and_then(|n| self.chunk_duration.checked_mul(n))
            .unwrap_or(Duration::MAX)
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_splits_file_and_tracks_position() {
        let source = FileLiveSource::from_bytes(b"abcdefg".to_vec(), 3, Duration::from_secs(1));
        let track = source.audio_track().unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = track.read_chunk().await.unwrap() {
            chunks.push(chunk.as_bytes().to_vec());
        }
        assert_eq!(chunks, vec![b"abc".to_vec(), b"def".to_vec(), b"g".to_vec()]);
        assert_eq!(source.position(), Duration::from_secs(3));
        assert!(source.is_exhausted());
        assert!(track.read_chunk().await.unwrap().is_none());
    }

    #[test]
    fn test_position_saturates_instead_of_wrapping() {
        let source = FileLiveSource::from_bytes(b"abc".to_vec(), 1, Duration::from_secs(1));
        source
            .track
            .chunks_read
            .store(u64::from(u32::MAX) + 2, Ordering::SeqCst);
        assert_eq!(source.position(), Duration::MAX);

        source.track.chunks_read.store(5, Ordering::SeqCst);
        assert_eq!(source.position(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_empty_file_has_no_track() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.webm");
        std::fs::write(&path, b"").unwrap();

        let source = FileLiveSource::open(&path, 4, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(source.audio_track().is_none());
    }
}
