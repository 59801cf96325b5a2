//! Transcription via a Whisper-compatible HTTP API (Groq or OpenAI).
//!
//! The API is synchronous, so each job runs on a spawned task and its status
//! is tracked in memory until a terminal status has been reported once or the
//! job is cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use voxdub_core::config::TranscriptionConfig;
use voxdub_core::error::{Result, VoxdubError};

use crate::transcript::TranscriptDocument;
use crate::{ObjectStore, TranscriptionRequest, TranscriptionService, TranscriptionStatus};

/// Default endpoint for a provider.
pub fn provider_url(provider: &str) -> &'static str {
    match provider {
        "openai" => "https://api.openai.com/v1/audio/transcriptions",
        _ => "https://api.groq.com/openai/v1/audio/transcriptions",
    }
}

pub fn default_model(provider: &str) -> &'static str {
    match provider {
        "openai" => "whisper-1",
        _ => "whisper-large-v3-turbo",
    }
}

/// Whisper takes ISO 639-1 codes: `en-US` -> `en`.
pub fn whisper_language(language_code: &str) -> &str {
    language_code
        .split(['-', '_'])
        .next()
        .unwrap_or(language_code)
}

struct TrackedJob {
    status: TranscriptionStatus,
    task: JoinHandle<()>,
}

type JobTable = Arc<Mutex<HashMap<String, TrackedJob>>>;

pub struct WhisperTranscriber {
    store: Arc<dyn ObjectStore>,
    config: TranscriptionConfig,
    client: reqwest::Client,
    jobs: JobTable,
}

impl WhisperTranscriber {
    pub fn new(store: Arc<dyn ObjectStore>, config: TranscriptionConfig) -> Self {
        Self {
            store,
            config,
            client: reqwest::Client::new(),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn api_key(&self) -> Option<String> {
        self.config.resolve_api_key().or_else(|| {
            let env_var = match self.config.provider.as_str() {
                "openai" => "OPENAI_API_KEY",
                _ => "GROQ_API_KEY",
            };
            std::env::var(env_var).ok().filter(|v| !v.is_empty())
        })
    }

    fn url(&self) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| provider_url(&self.config.provider).to_string())
    }

    fn model(&self) -> String {
        self.config
            .model
            .clone()
            .unwrap_or_else(|| default_model(&self.config.provider).to_string())
    }

    /// Jobs started and not yet reported terminal or cancelled.
    pub async fn tracked_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

/// Everything a spawned job needs, detached from `&self`.
struct WhisperCall {
    client: reqwest::Client,
    store: Arc<dyn ObjectStore>,
    url: String,
    model: String,
    api_key: String,
}

impl WhisperCall {
    async fn run(&self, request: &TranscriptionRequest) -> Result<()> {
        let audio = self.store.get(&request.media_key).await?;
        let text = self.transcribe(audio, request).await?;
        let doc = TranscriptDocument::new(&request.job_name, &text);
        let body = serde_json::to_vec(&doc)?;
        self.store
            .put(&request.output_key, Bytes::from(body), "application/json")
            .await
    }

    async fn transcribe(&self, audio: Bytes, request: &TranscriptionRequest) -> Result<String> {
        let file_name = format!("{}.{}", request.job_name, request.media_format);
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(file_name)
            .mime_str(&format!("audio/{}", request.media_format))
            .map_err(|e| VoxdubError::Transcription(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", whisper_language(&request.language_code).to_string())
            .text("response_format", "text");

        debug!(job = %request.job_name, url = %self.url, model = %self.model, "Sending audio for transcription");

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoxdubError::Transcription(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoxdubError::Transcription(format!(
                "Transcription API error {status}: {body}"
            )));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| VoxdubError::Transcription(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl TranscriptionService for WhisperTranscriber {
    async fn start_job(&self, request: &TranscriptionRequest) -> Result<()> {
        let api_key = self.api_key().ok_or_else(|| {
            VoxdubError::Transcription(format!(
                "Transcription not configured. Set processor.transcription.api_key or {}.",
                if self.config.provider == "openai" {
                    "OPENAI_API_KEY"
                } else {
                    "GROQ_API_KEY"
                }
            ))
        })?;

        let call = WhisperCall {
            client: self.client.clone(),
            store: self.store.clone(),
            url: self.url(),
            model: self.model(),
            api_key,
        };
        let job_name = request.job_name.clone();
        let jobs = self.jobs.clone();
        let request = request.clone();

        // Hold the table lock across spawn so the task cannot report before
        // its entry exists.
        let mut table = self.jobs.lock().await;
        let task = tokio::spawn(async move {
            let status = match call.run(&request).await {
                Ok(()) => TranscriptionStatus::Completed,
                Err(e) => {
                    warn!(job = %request.job_name, %e, "Transcription failed");
                    TranscriptionStatus::Failed {
                        reason: Some(e.to_string()),
                    }
                }
            };
            // A cancelled job has no entry left to update.
            if let Some(job) = jobs.lock().await.get_mut(&request.job_name) {
                job.status = status;
            }
        });
        table.insert(
            job_name,
            TrackedJob {
                status: TranscriptionStatus::InProgress,
                task,
            },
        );
        Ok(())
    }

    async fn job_status(&self, job_name: &str) -> Result<TranscriptionStatus> {
        let mut jobs = self.jobs.lock().await;
        let status = jobs
            .get(job_name)
            .map(|job| job.status.clone())
            .ok_or_else(|| VoxdubError::Transcription(format!("unknown job: {job_name}")))?;
        if status.is_terminal() {
            jobs.remove(job_name);
        }
        Ok(status)
    }

    async fn cancel_job(&self, job_name: &str) -> Result<()> {
        let Some(job) = self.jobs.lock().await.remove(job_name) else {
            return Ok(());
        };
        if !job.task.is_finished() {
            debug!(job = job_name, "Aborting transcription");
        }
        job.task.abort();
        // Wait out the abort so no transcript lands after cleanup.
        let _ = job.task.await;
        Ok(())
    }
}
