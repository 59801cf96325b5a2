//! Server-side processing: turns one uploaded audio batch into synthesized
//! speech by driving object storage, an asynchronous transcription job, and a
//! speech synthesizer.
//!
//! Each external system sits behind a trait so the [`Orchestrator`] state
//! machine can be exercised with in-memory doubles.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use voxdub_core::clock::SystemClock;
use voxdub_core::config::ProcessorConfig;
use voxdub_core::error::Result;

pub mod elevenlabs;
pub mod orchestrator;
pub mod store;
pub mod transcript;
pub mod whisper;

pub use orchestrator::{JobKeys, JobState, Orchestrator, PollPolicy};

/// Transient object storage (`input/…`, `transcript/…`).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Delete `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// URI a transcription job can use to reference `key`.
    fn uri(&self, key: &str) -> String;
}

/// Parameters for starting an asynchronous transcription job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    pub job_name: String,
    pub media_key: String,
    pub media_uri: String,
    pub media_format: String,
    /// Source language, e.g. `en-US`.
    pub language_code: String,
    /// Where the service writes the transcript document.
    pub output_key: String,
}

/// Status reported for a transcription job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TranscriptionStatus {
    Queued,
    InProgress,
    Completed,
    Failed { reason: Option<String> },
}

impl TranscriptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn start_job(&self, request: &TranscriptionRequest) -> Result<()>;

    async fn job_status(&self, job_name: &str) -> Result<TranscriptionStatus>;

    /// Forget `job_name` and stop any work still running for it. Once this
    /// returns the service writes nothing more for the job.
    async fn cancel_job(&self, _job_name: &str) -> Result<()> {
        Ok(())
    }
}

/// One speech synthesis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    /// Accent, e.g. `en-GB`.
    pub language_code: String,
    pub engine: String,
    pub output_format: String,
}

impl SpeechRequest {
    /// Neural-engine MP3 request for plain text.
    pub fn mp3(text: String, voice: &str, language_code: &str) -> Self {
        Self {
            text,
            voice: voice.to_string(),
            language_code: language_code.to_string(),
            engine: "neural".into(),
            output_format: "mp3".into(),
        }
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns encoded audio bytes.
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Bytes>;
}

/// Orchestrator over `store` with the configured Whisper transcriber and
/// ElevenLabs synthesizer on the system clock.
pub fn build_orchestrator(config: &ProcessorConfig, store: Arc<dyn ObjectStore>) -> Orchestrator {
    let transcriber = whisper::WhisperTranscriber::new(
        store.clone(),
        config.transcription.clone().unwrap_or_default(),
    );
    let synthesizer =
        elevenlabs::ElevenLabsSynthesizer::new(config.tts.clone().unwrap_or_default());
    Orchestrator::new(
        store,
        Arc::new(transcriber),
        Arc::new(synthesizer),
        Arc::new(SystemClock),
        PollPolicy::from(config),
    )
}
