// src/driver/push.rs
//! Push webhook: the source tool POSTs one JSON alert per request.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use super::ConnectorContext;

#[derive(Clone)]
struct PushState {
    ctx: ConnectorContext,
    // Serializes handling so items go through strictly one at a time.
    gate: Arc<Mutex<()>>,
}

/// `POST /alert` plus a `GET /health` probe.
pub fn router(ctx: ConnectorContext) -> Router {
    let state = PushState {
        ctx,
        gate: Arc::new(Mutex::new(())),
    };
    Router::new()
        .route("/alert", post(receive_alert))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn receive_alert(State(state): State<PushState>, body: Bytes) -> (StatusCode, String) {
    let item: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(connector = state.ctx.name(), error = %e, "invalid JSON in push");
            return (StatusCode::BAD_REQUEST, "Bad Request - invalid JSON".into());
        }
    };

    let _guard = state.gate.lock().await;
    let item = match state.ctx.enrich(item).await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(connector = state.ctx.name(), error = ?e, "push handler error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal Server Error: {e}"),
            );
        }
    };
    state.ctx.handle(item).await;
    (StatusCode::OK, "OK".into())
}

/// Serves `router` on `addr` until the process stops.
pub async fn serve(addr: SocketAddr, router: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "HTTP server listening on /alert");
    axum::serve(listener, router).await.context("HTTP server")?;
    Ok(())
}
