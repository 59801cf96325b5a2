//! Prometheus metrics recording and endpoint.

use std::sync::OnceLock;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once per process.
pub fn install_prometheus_recorder() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(HANDLE.get_or_init(|| handle))
}

/// Record one finished job. `error_kind` is `None` on success.
pub fn record_job(error_kind: Option<&str>, duration_secs: f64) {
    let outcome = error_kind.unwrap_or("ok").to_string();
    let labels = [("outcome", outcome)];
    metrics::counter!("voxdub_jobs_total", &labels).increment(1);
    metrics::histogram!("voxdub_job_duration_seconds", &labels).record(duration_secs);
}

/// `GET /metrics`
pub async fn metrics_handler() -> Response {
    match HANDLE.get() {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
