//! HTTP handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use bytes::Bytes;
use serde_json::json;
use tracing::{Instrument, info, info_span, warn};

use voxdub_core::config::ResponseEncoding;
use voxdub_core::error::VoxdubError;
use voxdub_core::types::VoiceSelection;

use crate::state::GatewayState;

/// Error response: `{"error": message, "kind": kind}`.
pub struct ApiError(pub VoxdubError);

impl ApiError {
    /// Kind reported on the wire. Client-side kinds collapse to `internal`.
    pub fn wire_kind(&self) -> &'static str {
        match self.0.kind() {
            k @ ("invalid_request" | "job_failed" | "job_timed_out" | "storage"
            | "transcription" | "synthesis") => k,
            _ => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.0 {
            VoxdubError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            VoxdubError::JobTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<VoxdubError> for ApiError {
    fn from(e: VoxdubError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.0.to_string(),
            "kind": self.wire_kind(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Uploaded batch and voice selection from one multipart request.
#[derive(Debug)]
pub struct ProcessForm {
    pub audio: Bytes,
    pub selection: VoiceSelection,
}

fn invalid(e: impl std::fmt::Display) -> VoxdubError {
    VoxdubError::InvalidRequest(e.to_string())
}

/// Read `audio`, `accent`, and `voice`. Unknown fields are ignored.
pub async fn parse_form(mut multipart: Multipart) -> Result<ProcessForm, VoxdubError> {
    let mut audio = None;
    let mut accent = String::new();
    let mut voice = String::new();

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        match field.name() {
            Some("audio") => audio = Some(field.bytes().await.map_err(invalid)?),
            Some("accent") => accent = field.text().await.map_err(invalid)?,
            Some("voice") => voice = field.text().await.map_err(invalid)?,
            _ => {}
        }
    }

    let audio = audio
        .filter(|a| !a.is_empty())
        .ok_or_else(|| VoxdubError::InvalidRequest("No audio file provided".into()))?;
    Ok(ProcessForm {
        audio,
        selection: VoiceSelection::new(&accent, &voice),
    })
}

fn audio_response(encoding: ResponseEncoding, audio: Bytes) -> Response {
    match encoding {
        ResponseEncoding::Binary => {
            ([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response()
        }
        ResponseEncoding::Base64 => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&audio);
            ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], encoded).into_response()
        }
    }
}

/// `POST /process-audio`
pub async fn process_audio(
    State(state): State<Arc<GatewayState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let request_id = uuid::Uuid::new_v4();
    let span = info_span!("process_audio", %request_id);

    async move {
        let started = Instant::now();
        let form = parse_form(multipart).await?;
        info!(
            bytes = form.audio.len(),
            accent = %form.selection.accent,
            voice = %form.selection.voice,
            "Processing upload"
        );

        let result = state.orchestrator.run(form.audio, &form.selection).await;

        #[cfg(feature = "metrics")]
        crate::metrics::record_job(
            result.as_ref().err().map(|e| e.kind()),
            started.elapsed().as_secs_f64(),
        );

        match result {
            Ok(audio) => {
                info!(
                    out_bytes = audio.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Upload processed"
                );
                Ok(audio_response(state.encoding, audio))
            }
            Err(e) => {
                warn!(%e, kind = e.kind(), "Upload failed");
                Err(ApiError(e))
            }
        }
    }
    .instrument(span)
    .await
}

/// `GET /health`
pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "busy_jobs": state.orchestrator.active_jobs(),
        "uptime_secs": state.uptime_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let e = ApiError(VoxdubError::InvalidRequest("No audio file provided".into()));
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.wire_kind(), "invalid_request");

        let e = ApiError(VoxdubError::JobTimedOut { attempts: 30, waited_ms: 30_000 });
        assert_eq!(e.status(), StatusCode::GATEWAY_TIMEOUT);

        let e = ApiError(VoxdubError::JobFailed("bad".into()));
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.wire_kind(), "job_failed");

        let e = ApiError(VoxdubError::Network("x".into()));
        assert_eq!(e.wire_kind(), "internal");
    }

    #[test]
    fn test_base64_response_content_type() {
        let resp = audio_response(ResponseEncoding::Base64, Bytes::from_static(b"hello"));
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let resp = audio_response(ResponseEncoding::Binary, Bytes::from_static(b"hello"));
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "audio/mpeg");
    }
}
