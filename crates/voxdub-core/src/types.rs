use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Default speech synthesis voice.
pub const DEFAULT_VOICE: &str = "Matthew";

/// Default accent (synthesis language code).
pub const DEFAULT_ACCENT: &str = "en-US";

/// One fixed-duration sample of captured audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk(Bytes);

impl AudioChunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A fixed-size concatenation of chunks, submitted as one processing unit.
///
/// Immutable once formed: the payload is a shared `Bytes` and no mutating
/// accessors exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBatch {
    seq: u64,
    chunk_count: usize,
    data: Bytes,
}

impl AudioBatch {
    /// Concatenate `chunks` in arrival order.
    pub fn from_chunks(seq: u64, chunks: &[AudioChunk]) -> Self {
        let total = chunks.iter().map(AudioChunk::len).sum();
        let mut buf = BytesMut::with_capacity(total);
        for chunk in chunks {
            buf.extend_from_slice(chunk.as_bytes());
        }
        Self {
            seq,
            chunk_count: chunks.len(),
            data: buf.freeze(),
        }
    }

    /// Formation order, starting at 0 for each capture session.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Voice and accent requested for one synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSelection {
    pub accent: String,
    pub voice: String,
}

impl VoiceSelection {
    /// Build a selection, substituting defaults for blank values.
    pub fn new(accent: &str, voice: &str) -> Self {
        Self {
            accent: non_blank_or(accent, DEFAULT_ACCENT),
            voice: non_blank_or(voice, DEFAULT_VOICE),
        }
    }
}

impl Default for VoiceSelection {
    fn default() -> Self {
        Self::new(DEFAULT_ACCENT, DEFAULT_VOICE)
    }
}

fn non_blank_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_concatenates_in_order() {
        let chunks = vec![
            AudioChunk::new(vec![1u8, 2]),
            AudioChunk::new(vec![3u8]),
            AudioChunk::new(vec![4u8, 5, 6]),
        ];
        let batch = AudioBatch::from_chunks(7, &chunks);
        assert_eq!(batch.seq(), 7);
        assert_eq!(batch.chunk_count(), 3);
        assert_eq!(batch.data().as_ref(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_voice_selection_defaults_blank_values() {
        let sel = VoiceSelection::new("  ", "");
        assert_eq!(sel.accent, "en-US");
        assert_eq!(sel.voice, "Matthew");

        let sel = VoiceSelection::new("en-GB", " Amy ");
        assert_eq!(sel.accent, "en-GB");
        assert_eq!(sel.voice, "Amy");
    }
}
