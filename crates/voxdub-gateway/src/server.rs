//! Axum HTTP server.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::handlers;
use crate::state::GatewayState;

/// Permissive CORS: any origin, `POST`/`OPTIONS`, any headers, 5 minute
/// preflight cache.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers(Any)
        .max_age(Duration::from_secs(300))
}

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    let max_upload = state.config.max_upload_bytes();

    let mut app = Router::new()
        .route("/process-audio", post(handlers::process_audio))
        .route("/health", get(handlers::health));

    #[cfg(feature = "metrics")]
    {
        app = app.route("/metrics", get(crate::metrics::metrics_handler));
    }

    app = app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer())
            .layer(DefaultBodyLimit::max(max_upload)),
    );
    app.with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.server_bind();

    #[cfg(feature = "metrics")]
    crate::metrics::install_prometheus_recorder()?;

    let app = router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
