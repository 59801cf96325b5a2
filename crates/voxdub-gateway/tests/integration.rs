//! Gateway integration tests: start a real gateway backed by in-memory
//! services and talk to it over HTTP.
//!
//! Run with: `cargo test -p voxdub-gateway --test integration`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use voxdub_core::clock::ManualClock;
use voxdub_core::config::{Config, ResponseEncoding, ServerConfig};
use voxdub_core::error::{Result, VoxdubError};
use voxdub_core::processor::RemoteProcessor;
use voxdub_core::types::{AudioBatch, AudioChunk, VoiceSelection};
use voxdub_gateway::GatewayState;
use voxdub_media::HttpRemoteProcessor;
use voxdub_processor::store::MemoryObjectStore;
use voxdub_processor::transcript::TranscriptDocument;
use voxdub_processor::{
    ObjectStore, Orchestrator, PollPolicy, SpeechRequest, SpeechSynthesizer, TranscriptionRequest,
    TranscriptionService, TranscriptionStatus,
};

/// Completes (or fails) every job on the first poll.
struct InstantTranscriber {
    store: Arc<dyn ObjectStore>,
    failure: Option<String>,
}

#[async_trait]
impl TranscriptionService for InstantTranscriber {
    async fn start_job(&self, request: &TranscriptionRequest) -> Result<()> {
        if self.failure.is_none() {
            let doc = TranscriptDocument::new(&request.job_name, "hello from the video");
            self.store
                .put(
                    &request.output_key,
                    Bytes::from(serde_json::to_vec(&doc)?),
                    "application/json",
                )
                .await?;
        }
        Ok(())
    }

    async fn job_status(&self, _job_name: &str) -> Result<TranscriptionStatus> {
        Ok(match &self.failure {
            Some(reason) => TranscriptionStatus::Failed {
                reason: Some(reason.clone()),
            },
            None => TranscriptionStatus::Completed,
        })
    }
}

/// Never finishes.
struct StuckTranscriber;

#[async_trait]
impl TranscriptionService for StuckTranscriber {
    async fn start_job(&self, _request: &TranscriptionRequest) -> Result<()> {
        Ok(())
    }

    async fn job_status(&self, _job_name: &str) -> Result<TranscriptionStatus> {
        Ok(TranscriptionStatus::InProgress)
    }
}

struct TaggedSynthesizer;

#[async_trait]
impl SpeechSynthesizer for TaggedSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Bytes> {
        Ok(Bytes::from(format!(
            "{}|{}|{}",
            request.voice, request.language_code, request.text
        )))
    }
}

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

enum Mode {
    Ok,
    Fail(&'static str),
    Stuck,
}

/// Start a gateway and return its port plus the backing store.
async fn start_test_gateway(
    mode: Mode,
    encoding: ResponseEncoding,
) -> (u16, Arc<MemoryObjectStore>) {
    let port = find_free_port();
    let store = Arc::new(MemoryObjectStore::new());

    let transcriber: Arc<dyn TranscriptionService> = match mode {
        Mode::Ok => Arc::new(InstantTranscriber {
            store: store.clone(),
            failure: None,
        }),
        Mode::Fail(reason) => Arc::new(InstantTranscriber {
            store: store.clone(),
            failure: Some(reason.into()),
        }),
        Mode::Stuck => Arc::new(StuckTranscriber),
    };
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        transcriber,
        Arc::new(TaggedSynthesizer),
        Arc::new(ManualClock::new(1_700_000_000_000)),
        PollPolicy {
            interval: Duration::from_millis(1000),
            max_attempts: 3,
        },
    ));

    let config = Config {
        server: Some(ServerConfig {
            port,
            bind: Some("127.0.0.1".into()),
            max_upload_bytes: 1024 * 1024,
            response_encoding: encoding,
        }),
        ..Default::default()
    };
    let state = Arc::new(GatewayState::new(config, orchestrator));

    tokio::spawn(async move {
        let _ = voxdub_gateway::start_gateway(state, port).await;
    });

    // Wait for gateway to be ready
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (port, store)
}

fn form(audio: &'static [u8], accent: &str, voice: &str) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .part(
            "audio",
            reqwest::multipart::Part::bytes(audio)
                .file_name("audio.webm")
                .mime_str("audio/webm")
                .unwrap(),
        )
        .text("accent", accent.to_string())
        .text("voice", voice.to_string())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (port, _) = start_test_gateway(Mode::Ok, ResponseEncoding::Binary).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["busy_jobs"], 0);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_process_audio_returns_mpeg_with_cors() {
    let (port, store) = start_test_gateway(Mode::Ok, ResponseEncoding::Binary).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/process-audio"))
        .header("Origin", "https://www.youtube.com")
        .multipart(form(b"webm-bytes", "en-GB", "Amy"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "audio/mpeg");
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    let body = resp.bytes().await.unwrap();
    assert_eq!(body.as_ref(), b"Amy|en-GB|hello from the video");

    assert!(store.keys().await.is_empty(), "transient objects cleaned up");
}

#[tokio::test]
async fn test_blank_fields_use_defaults() {
    let (port, _) = start_test_gateway(Mode::Ok, ResponseEncoding::Binary).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/process-audio"))
        .multipart(form(b"webm-bytes", "", ""))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.bytes().await.unwrap();
    assert!(body.starts_with(b"Matthew|en-US|"));
}

#[tokio::test]
async fn test_missing_audio_is_bad_request() {
    let (port, _) = start_test_gateway(Mode::Ok, ResponseEncoding::Binary).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/process-audio"))
        .multipart(reqwest::multipart::Form::new().text("voice", "Joanna"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_request");
    assert!(body["error"].as_str().unwrap().contains("No audio file provided"));
}

#[tokio::test]
async fn test_cors_preflight() {
    let (port, _) = start_test_gateway(Mode::Ok, ResponseEncoding::Binary).await;

    let resp = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("http://127.0.0.1:{port}/process-audio"),
        )
        .header("Origin", "https://www.youtube.com")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .send()
        .await
        .unwrap();

    assert!(resp.status().is_success());
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    assert_eq!(resp.headers()["access-control-max-age"], "300");
    let methods = resp.headers()["access-control-allow-methods"]
        .to_str()
        .unwrap()
        .to_string();
    assert!(methods.contains("POST"));
    assert!(methods.contains("OPTIONS"));
}

#[tokio::test]
async fn test_job_failure_round_trips_through_client() {
    let (port, store) = start_test_gateway(Mode::Fail("unsupported media"), ResponseEncoding::Binary).await;

    let client = HttpRemoteProcessor::new(
        format!("http://127.0.0.1:{port}/process-audio"),
        Duration::from_secs(10),
    )
    .unwrap();
    let batch = AudioBatch::from_chunks(0, &[AudioChunk::new(&b"abc"[..])]);
    let err = client
        .process(&batch, &VoiceSelection::default())
        .await
        .unwrap_err();

    assert!(matches!(err, VoxdubError::JobFailed(ref r) if r == "unsupported media"));
    assert!(store.keys().await.is_empty());
}

#[tokio::test]
async fn test_timeout_maps_to_gateway_timeout() {
    let (port, _) = start_test_gateway(Mode::Stuck, ResponseEncoding::Binary).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/process-audio"))
        .multipart(form(b"webm-bytes", "en-US", "Matthew"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "job_timed_out");

    let client = HttpRemoteProcessor::new(
        format!("http://127.0.0.1:{port}/process-audio"),
        Duration::from_secs(10),
    )
    .unwrap();
    let batch = AudioBatch::from_chunks(1, &[AudioChunk::new(&b"abc"[..])]);
    let err = client
        .process(&batch, &VoiceSelection::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VoxdubError::JobTimedOut { attempts: 3, waited_ms: 3000 }));
}

#[tokio::test]
async fn test_base64_encoding_decoded_by_client() {
    let (port, _) = start_test_gateway(Mode::Ok, ResponseEncoding::Base64).await;

    let client = HttpRemoteProcessor::new(
        format!("http://127.0.0.1:{port}/process-audio"),
        Duration::from_secs(10),
    )
    .unwrap();
    let batch = AudioBatch::from_chunks(0, &[AudioChunk::new(&b"abc"[..])]);
    let audio = client
        .process(&batch, &VoiceSelection::new("en-AU", "Olivia"))
        .await
        .unwrap();
    assert_eq!(audio.as_ref(), b"Olivia|en-AU|hello from the video");
}
