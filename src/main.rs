// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Hub Server
//!
//! Real-time one-to-one chat backend. Provides:
//! - WebSocket endpoint for presence, messaging, history and typing hints
//! - HTTP endpoints for health checks and Prometheus metrics
//! - Rate limiting and connection caps

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use chat_hub::config::HubConfig;
use chat_hub::directory::create_user_directory;
use chat_hub::handler::ConnectionDeps;
use chat_hub::http::{create_router, HttpState};
use chat_hub::hub::{ChatHub, HubDeps, HubSettings};
use chat_hub::metrics::HubMetrics;
use chat_hub::rate_limit::RateLimiter;
use chat_hub::server;
use chat_hub::storage::create_message_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_hub=info".parse()?),
        )
        .init();

    let config = HubConfig::from_env();
    let started_at = Instant::now();

    info!("Starting chat hub v{}", env!("CARGO_PKG_VERSION"));
    info!("Storage backend: {:?}", config.storage_backend);
    info!("Max connections: {}", config.max_connections);
    info!("History page size: {}", config.history_page_size);

    let database_path = config.database_path();
    let store = create_message_store(config.storage_backend, &database_path)
        .context("Failed to open message store")?;
    let directory = create_user_directory(config.storage_backend, &database_path)
        .context("Failed to open user directory")?;
    let metrics = HubMetrics::new().context("Failed to register metrics")?;

    let hub = Arc::new(ChatHub::new(HubDeps {
        settings: HubSettings::from(&config),
        ..HubDeps::new(store, directory, metrics.clone())
    }));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_min));

    if config.metrics_token.is_some() {
        info!("Metrics endpoint protected with bearer token");
    } else if !config.metrics_addr.ip().is_loopback() {
        warn!("Metrics exposed on non-localhost without auth token");
    }

    let http_state = HttpState {
        metrics: metrics.clone(),
        metrics_token: config.metrics_token.clone(),
        registry: hub.registry().clone(),
        started_at,
    };
    let http_listener = TcpListener::bind(config.metrics_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", config.metrics_addr))?;
    let metrics_addr = config.metrics_addr;
    tokio::spawn(async move {
        info!("HTTP server listening on {}", metrics_addr);
        if let Err(e) = axum::serve(http_listener, create_router(http_state)).await {
            tracing::error!("HTTP server stopped: {}", e);
        }
    });

    let cleanup_rate_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(600)).await;
            let removed = cleanup_rate_limiter.cleanup_inactive(Duration::from_secs(1800));
            if removed > 0 {
                info!("Cleaned up {} stale rate limiter entries", removed);
            }
        }
    });

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind WebSocket listener on {}", config.listen_addr))?;
    info!("WebSocket server listening on {}", config.listen_addr);

    let deps = ConnectionDeps {
        hub,
        rate_limiter,
        max_message_size: config.max_message_size,
        idle_timeout: config.idle_timeout(),
        outbound_buffer: config.outbound_buffer,
    };
    server::serve(listener, deps, config.max_connections).await;

    Ok(())
}
