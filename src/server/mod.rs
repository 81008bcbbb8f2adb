//! HTTP surface: vendor webhooks and the health endpoint.
//!
//! Webhooks are verified against the adapter's HMAC-SHA256 secret before the
//! body is parsed. Status codes tell the vendor whether to redeliver: 401 for
//! a bad signature, 422 for a payload that will never parse, 500 when the
//! turn could not be persisted.

use crate::channels::{AdapterError, ChannelAdapter};
use crate::channels::base::validate_signature;
use crate::providers::resilient::ServiceGateway;
use crate::store::Store;
use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Max webhook payload size: 1 MB.
const WEBHOOK_MAX_BODY: usize = 1_048_576;

#[derive(Clone)]
pub struct ServerState {
    adapters: Arc<HashMap<&'static str, Arc<dyn ChannelAdapter>>>,
    store: Arc<Store>,
    gateway: Arc<ServiceGateway>,
}

impl ServerState {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<ServiceGateway>,
        adapters: Vec<Arc<dyn ChannelAdapter>>,
    ) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|a| {
                if a.webhook_secret().is_empty() {
                    warn!(
                        "{} webhook has no secret configured, signatures will not be checked",
                        a.name()
                    );
                }
                (a.name(), a)
            })
            .collect();
        Self {
            adapters: Arc::new(adapters),
            store,
            gateway,
        }
    }
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/webhooks/{channel}", post(webhook_handler))
        .route("/api/health", get(health_handler))
        .layer(DefaultBodyLimit::max(WEBHOOK_MAX_BODY))
        .with_state(state)
}

/// POST /webhooks/{channel}
async fn webhook_handler(
    State(state): State<ServerState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let Some(adapter) = state.adapters.get(channel.as_str()).cloned() else {
        debug!("webhook for unknown channel '{}'", channel);
        return StatusCode::NOT_FOUND.into_response();
    };

    let secret = adapter.webhook_secret();
    if !secret.is_empty() {
        let Some(signature) = headers
            .get(adapter.signature_header())
            .and_then(|v| v.to_str().ok())
        else {
            warn!("{} webhook: missing {} header", channel, adapter.signature_header());
            return StatusCode::UNAUTHORIZED.into_response();
        };
        if !validate_signature(secret, signature, &body) {
            warn!("{} webhook: invalid signature", channel);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    debug!("{} webhook: payload_len={}", channel, body.len());
    match adapter.handle_webhook(&body).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(AdapterError::Malformed(reason)) => {
            warn!("{} webhook: malformed payload: {}", channel, reason);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": reason })),
            )
                .into_response()
        }
        Err(AdapterError::Persistence(e)) => {
            error!("{} webhook: persistence failure, asking for redelivery: {:#}", channel, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "temporary failure" })),
            )
                .into_response()
        }
    }
}

/// GET /api/health
async fn health_handler(State(state): State<ServerState>) -> axum::response::Response {
    let breakers = state.gateway.breaker_snapshots();
    let degraded = breakers.iter().any(|b| b.state != "closed");
    match state.store.stats() {
        Ok(stats) => Json(json!({
            "status": if degraded { "degraded" } else { "ok" },
            "version": crate::VERSION,
            "store": stats,
            "breakers": breakers,
        }))
        .into_response(),
        Err(e) => {
            error!("health check cannot read the store: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "version": crate::VERSION })),
            )
                .into_response()
        }
    }
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    host: &str,
    port: u16,
    state: ServerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests;
