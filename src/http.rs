// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP Server for Health and Metrics Endpoints

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::metrics::HubMetrics;
use crate::presence::PresenceRegistry;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub metrics: HubMetrics,
    pub metrics_token: Option<String>,
    pub registry: Arc<PresenceRegistry>,
    pub started_at: Instant,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    online_users: usize,
}

/// Requires the bearer token on `/metrics` when one is configured.
async fn metrics_auth_middleware(
    State(state): State<HttpState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let is_authorized = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .is_some_and(|token| token == expected_token);

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "chat-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/metrics"]
    }))
}

async fn health_handler(State(state): State<HttpState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        online_users: state.registry.online_count(),
    })
}

async fn metrics_handler(State(state): State<HttpState>) -> Response {
    state
        .metrics
        .users_online
        .set(state.registry.online_count() as i64);

    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
