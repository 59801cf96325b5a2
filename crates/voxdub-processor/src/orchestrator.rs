//! Job orchestration state machine.
//!
//! ```text
//! Uploaded -> Submitted -> Polling -> Transcribed -> Synthesized -> Done
//!                             |
//!                             +-> Failed | TimedOut
//! ```
//!
//! Any external-call error aborts the job. Transient objects are deleted and
//! the transcription job cancelled on every exit path, including a dropped
//! future; cleanup failures are logged and never change the result.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use voxdub_core::clock::Clock;
use voxdub_core::config::ProcessorConfig;
use voxdub_core::error::{Result, VoxdubError};
use voxdub_core::processor::RemoteProcessor;
use voxdub_core::types::{AudioBatch, VoiceSelection};

use crate::{
    ObjectStore, SpeechRequest, SpeechSynthesizer, TranscriptionRequest, TranscriptionService,
    TranscriptionStatus, transcript,
};

/// Language the uploaded speech is transcribed in.
const SOURCE_LANGUAGE: &str = "en-US";

/// Lifecycle of one processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Uploaded,
    Submitted,
    Polling,
    Transcribed,
    Synthesized,
    Done,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::TimedOut)
    }

    /// Legal forward transitions. `Failed` is reachable from every
    /// non-terminal state because any external call may error.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Uploaded, Submitted)
            | (Submitted, Polling)
            | (Polling, Transcribed)
            | (Polling, TimedOut)
            | (Transcribed, Synthesized)
            | (Synthesized, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Transcribed => "transcribed",
            Self::Synthesized => "synthesized",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Storage keys and job name derived from one timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobKeys {
    pub timestamp: u64,
    pub job_name: String,
    pub input_key: String,
    pub transcript_key: String,
}

impl JobKeys {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            job_name: format!("job-{timestamp}"),
            input_key: format!("input/{timestamp}.webm"),
            transcript_key: format!("transcript/{timestamp}.json"),
        }
    }
}

/// Fixed (non-adaptive) polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Worst-case wait before `JobTimedOut`.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&ProcessorConfig::default())
    }
}

impl From<&ProcessorConfig> for PollPolicy {
    fn from(config: &ProcessorConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_poll_attempts.max(1),
        }
    }
}

/// Tracks the state of one job and logs every transition.
struct Job<'a> {
    keys: &'a JobKeys,
    state: JobState,
}

impl<'a> Job<'a> {
    fn new(keys: &'a JobKeys) -> Self {
        Self {
            keys,
            state: JobState::Uploaded,
        }
    }

    fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            job = %self.keys.job_name,
            from = self.state.as_str(),
            to = next.as_str(),
            "Job state transition"
        );
        self.state = next;
    }
}

/// Cancel the transcription job, then delete both transient objects.
async fn cleanup_job(
    store: &dyn ObjectStore,
    transcriber: &dyn TranscriptionService,
    keys: &JobKeys,
) {
    if let Err(e) = transcriber.cancel_job(&keys.job_name).await {
        warn!(job = %keys.job_name, %e, "Transcription cancel failed");
    }
    let (input, transcript) = futures::join!(
        store.delete(&keys.input_key),
        store.delete(&keys.transcript_key)
    );
    for (key, outcome) in [(&keys.input_key, input), (&keys.transcript_key, transcript)] {
        if let Err(e) = outcome {
            warn!(job = %keys.job_name, key = %key, %e, "Cleanup failed");
        }
    }
}

/// Counts a job as active until dropped. A job dropped before
/// [`JobGuard::disarm`] (its future cancelled mid-flight) is cleaned up on a
/// spawned task.
struct JobGuard {
    store: Arc<dyn ObjectStore>,
    transcriber: Arc<dyn TranscriptionService>,
    keys: JobKeys,
    active: Arc<AtomicUsize>,
    cleaned: bool,
}

impl JobGuard {
    fn new(orchestrator: &Orchestrator, keys: JobKeys) -> Self {
        orchestrator.active_jobs.fetch_add(1, Ordering::SeqCst);
        Self {
            store: orchestrator.store.clone(),
            transcriber: orchestrator.transcriber.clone(),
            keys,
            active: orchestrator.active_jobs.clone(),
            cleaned: false,
        }
    }

    fn disarm(mut self) {
        self.cleaned = true;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.cleaned {
            return;
        }

        warn!(job = %self.keys.job_name, "Job abandoned before cleanup");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.store.clone();
                let transcriber = self.transcriber.clone();
                let keys = self.keys.clone();
                handle.spawn(async move {
                    cleanup_job(store.as_ref(), transcriber.as_ref(), &keys).await;
                });
            }
            Err(_) => warn!(job = %self.keys.job_name, "No runtime left to clean up job"),
        }
    }
}

/// Drives one batch through upload, transcription, synthesis, and cleanup.
pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    transcriber: Arc<dyn TranscriptionService>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
    last_timestamp: AtomicU64,
    active_jobs: Arc<AtomicUsize>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transcriber: Arc<dyn TranscriptionService>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        clock: Arc<dyn Clock>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            store,
            transcriber,
            synthesizer,
            clock,
            policy,
            last_timestamp: AtomicU64::new(0),
            active_jobs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Jobs currently between upload and cleanup.
    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Clock time in ms, bumped past the previous job's timestamp so keys
    /// never collide within one orchestrator.
    fn next_timestamp(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut prev = self.last_timestamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self.last_timestamp.compare_exchange(
                prev,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Process one uploaded batch and return synthesized audio.
    ///
    /// Dropping the returned future part-way still deletes the job's objects
    /// and releases its `active_jobs` slot.
    pub async fn run(&self, audio: Bytes, selection: &VoiceSelection) -> Result<Bytes> {
        let keys = JobKeys::new(self.next_timestamp());
        let started = Instant::now();
        let guard = JobGuard::new(self, keys.clone());

        let mut job = Job::new(&keys);
        let result = self.drive(&mut job, audio, selection).await;
        match &result {
            Ok(_) => job.advance(JobState::Done),
            Err(VoxdubError::JobTimedOut { .. }) => job.advance(JobState::TimedOut),
            Err(_) => job.advance(JobState::Failed),
        }

        self.cleanup(&keys).await;
        guard.disarm();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(out) => info!(
                job = %keys.job_name,
                voice = %selection.voice,
                accent = %selection.accent,
                out_bytes = out.len(),
                elapsed_ms,
                "Job completed"
            ),
            Err(e) => warn!(
                job = %keys.job_name,
                state = job.state.as_str(),
                %e,
                elapsed_ms,
                "Job ended without audio"
            ),
        }
        result
    }

    async fn drive(
        &self,
        job: &mut Job<'_>,
        audio: Bytes,
        selection: &VoiceSelection,
    ) -> Result<Bytes> {
        let keys = job.keys;

        self.store
            .put(&keys.input_key, audio, "audio/webm")
            .await?;
        debug!(job = %keys.job_name, key = %keys.input_key, "Batch uploaded");

        let request = TranscriptionRequest {
            job_name: keys.job_name.clone(),
            media_key: keys.input_key.clone(),
            media_uri: self.store.uri(&keys.input_key),
            media_format: "webm".into(),
            language_code: SOURCE_LANGUAGE.into(),
            output_key: keys.transcript_key.clone(),
        };
        self.transcriber.start_job(&request).await?;
        job.advance(JobState::Submitted);

        job.advance(JobState::Polling);
        self.wait_for_transcription(&keys.job_name).await?;

        let raw = self.store.get(&keys.transcript_key).await?;
        let text = transcript::extract_text(&raw)?;
        job.advance(JobState::Transcribed);

        let speech = SpeechRequest::mp3(text, &selection.voice, &selection.accent);
        let audio = self.synthesizer.synthesize(&speech).await?;
        job.advance(JobState::Synthesized);

        Ok(audio)
    }

    /// Poll until the job completes, fails, or the attempt budget runs out.
    ///
    /// One sleep follows each non-terminal status, so the worst-case wait is
    /// exactly `interval * max_attempts`.
    async fn wait_for_transcription(&self, job_name: &str) -> Result<()> {
        for attempt in 1..=self.policy.max_attempts {
            match self.transcriber.job_status(job_name).await? {
                TranscriptionStatus::Completed => {
                    debug!(job = job_name, attempt, "Transcription completed");
                    return Ok(());
                }
                TranscriptionStatus::Failed { reason } => {
                    return Err(VoxdubError::JobFailed(
                        reason.unwrap_or_else(|| "no failure reason reported".into()),
                    ));
                }
                status => {
                    debug!(job = job_name, attempt, ?status, "Transcription pending");
                }
            }
            self.clock.sleep(self.policy.interval).await;
        }

        Err(VoxdubError::JobTimedOut {
            attempts: self.policy.max_attempts,
            waited_ms: self.policy.budget().as_millis() as u64,
        })
    }

    async fn cleanup(&self, keys: &JobKeys) {
        cleanup_job(self.store.as_ref(), self.transcriber.as_ref(), keys).await;
    }
}

#[async_trait]
impl RemoteProcessor for Orchestrator {
    async fn process(&self, batch: &AudioBatch, selection: &VoiceSelection) -> Result<Bytes> {
        self.run(batch.data().clone(), selection).await
    }
}
