//! HTTP client for the gateway's `/process-audio` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use voxdub_core::error::{Result, VoxdubError};
use voxdub_core::processor::RemoteProcessor;
use voxdub_core::types::{AudioBatch, VoiceSelection};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    kind: Option<String>,
}

/// Submits batches as `multipart/form-data` (`audio`, `accent`, `voice`).
pub struct HttpRemoteProcessor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemoteProcessor {
    /// `timeout` bounds one request at the transport level.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoxdubError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Binary bodies pass through; `text/plain` bodies are base64.
fn decode_body(content_type: Option<&str>, body: Bytes) -> Result<Bytes> {
    let is_text = content_type.is_some_and(|ct| ct.starts_with("text/plain"));
    if !is_text {
        return Ok(body);
    }
    let text = std::str::from_utf8(&body)
        .map_err(|e| VoxdubError::Network(format!("invalid base64 response: {e}")))?;
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map(Bytes::from)
        .map_err(|e| VoxdubError::Network(format!("invalid base64 response: {e}")))
}

fn error_from_response(status: reqwest::StatusCode, body: &[u8]) -> VoxdubError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(err) => VoxdubError::from_remote(err.kind.as_deref(), err.error),
        Err(_) => VoxdubError::Network(format!("HTTP error! status: {}", status.as_u16())),
    }
}

#[async_trait]
impl RemoteProcessor for HttpRemoteProcessor {
    async fn process(&self, batch: &AudioBatch, selection: &VoiceSelection) -> Result<Bytes> {
        let audio = reqwest::multipart::Part::bytes(batch.data().to_vec())
            .file_name("audio.webm")
            .mime_str("audio/webm")
            .map_err(|e| VoxdubError::Network(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("audio", audio)
            .text("accent", selection.accent.clone())
            .text("voice", selection.voice.clone());

        debug!(seq = batch.seq(), endpoint = %self.endpoint, bytes = batch.len(), "Posting batch");

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Accept", "audio/mpeg")
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VoxdubError::Network("request timed out".into())
                } else {
                    VoxdubError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|e| VoxdubError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }
        decode_body(content_type.as_deref(), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_body_passes_through() {
        let body = Bytes::from_static(b"\xff\xfbmp3");
        let out = decode_body(Some("audio/mpeg"), body.clone()).unwrap();
        assert_eq!(out, body);
        assert_eq!(decode_body(None, body.clone()).unwrap(), body);
    }

    #[test]
    fn test_base64_body_is_decoded() {
        let out = decode_body(
            Some("text/plain; charset=utf-8"),
            Bytes::from_static(b"aGVsbG8=\n"),
        )
        .unwrap();
        assert_eq!(out.as_ref(), b"hello");

        let err = decode_body(Some("text/plain"), Bytes::from_static(b"%%%")).unwrap_err();
        assert!(matches!(err, VoxdubError::Network(_)));
    }

    #[test]
    fn test_error_body_mapping() {
        let status = reqwest::StatusCode::INTERNAL_SERVER_ERROR;
        let err = error_from_response(
            status,
            br#"{"error":"Transcription job failed: bad audio","kind":"job_failed"}"#,
        );
        assert!(matches!(err, VoxdubError::JobFailed(r) if r == "bad audio"));

        let err = error_from_response(status, br#"{"error":"bucket missing","kind":"storage"}"#);
        assert!(matches!(err, VoxdubError::Network(m) if m == "bucket missing"));

        let err = error_from_response(reqwest::StatusCode::BAD_GATEWAY, b"<html>");
        assert!(matches!(err, VoxdubError::Network(m) if m.contains("502")));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let client =
            HttpRemoteProcessor::new("http://127.0.0.1:1/process-audio", Duration::from_secs(2))
                .unwrap();
        let batch = AudioBatch::from_chunks(0, &[]);
        let err = client
            .process(&batch, &VoiceSelection::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");
    }
}
