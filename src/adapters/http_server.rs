//! Axum server adapter: binds the listener, opens a request-scoped logging
//! span, and hands every request to the pipeline.
use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    response::Response,
};
use eyre::{Result, WrapErr};
use tracing::Instrument;

use crate::core::Pipeline;

/// Run the gateway HTTP server until a shutdown signal arrives.
pub async fn serve(listen_addr: &str, pipeline: Arc<Pipeline>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .wrap_err_with(|| format!("Failed to bind to {listen_addr}"))?;
    tracing::info!(
        addr = %listener.local_addr().wrap_err("Failed to read local address")?,
        "gateway listening"
    );

    let app = router(pipeline);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("HTTP server error")
}

/// Build the axum application: every path and method funnels into the
/// pipeline.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new().fallback(dispatch).with_state(pipeline)
}

async fn dispatch(State(pipeline): State<Arc<Pipeline>>, req: Request) -> Response {
    let span = tracing::info_span!(
        "request",
        http.method = %req.method(),
        http.path = %req.uri().path(),
        backend = tracing::field::Empty,
        http.status_code = tracing::field::Empty,
    );

    async move {
        let response = pipeline.dispatch(req).await;
        tracing::Span::current().record("http.status_code", u64::from(response.status().as_u16()));
        response
    }
    .instrument(span)
    .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
