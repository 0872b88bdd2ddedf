// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Prometheus Metrics for the chat hub.

use std::sync::Arc;

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Hub metrics.
#[derive(Clone)]
pub struct HubMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total WebSocket connections accepted.
    pub connections_total: IntCounter,
    /// Current active WebSocket connections.
    pub connections_active: IntGauge,
    /// Handshake failures, rejected identities, capacity rejections.
    pub connection_errors: IntCounter,
    /// Usernames currently in the presence registry.
    pub users_online: IntGauge,

    // Message metrics
    pub messages_persisted: IntCounter,
    /// Live deliveries handed to a recipient's connection.
    pub messages_delivered: IntCounter,
    pub persist_failures: IntCounter,

    // History metrics
    pub history_pages_served: IntCounter,
    pub read_receipts_marked: IntCounter,
    /// Read-flag updates that failed while a page was still delivered.
    pub read_receipt_failures: IntCounter,

    pub typing_relayed: IntCounter,
    pub rate_limited: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl HubMetrics {
    /// Creates a new metrics instance with all collectors registered.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections_total = counter(
            &registry,
            "hub_connections_total",
            "Total WebSocket connections accepted",
        )?;
        let connections_active = gauge(
            &registry,
            "hub_connections_active",
            "Current active WebSocket connections",
        )?;
        let connection_errors = counter(
            &registry,
            "hub_connection_errors_total",
            "Total connection errors",
        )?;
        let users_online = gauge(&registry, "hub_users_online", "Users currently online")?;

        let messages_persisted = counter(
            &registry,
            "hub_messages_persisted_total",
            "Total chat messages persisted",
        )?;
        let messages_delivered = counter(
            &registry,
            "hub_messages_delivered_total",
            "Total chat messages delivered live",
        )?;
        let persist_failures = counter(
            &registry,
            "hub_persist_failures_total",
            "Total messages that failed to persist",
        )?;

        let history_pages_served = counter(
            &registry,
            "hub_history_pages_total",
            "Total history pages served",
        )?;
        let read_receipts_marked = counter(
            &registry,
            "hub_read_receipts_total",
            "Total messages marked read",
        )?;
        let read_receipt_failures = counter(
            &registry,
            "hub_read_receipt_failures_total",
            "Total failed read-flag updates during history loads",
        )?;

        let typing_relayed = counter(
            &registry,
            "hub_typing_relayed_total",
            "Total typing notifications forwarded",
        )?;
        let rate_limited = counter(
            &registry,
            "hub_rate_limited_total",
            "Total commands rejected by the rate limiter",
        )?;

        Ok(HubMetrics {
            registry: Arc::new(registry),
            connections_total,
            connections_active,
            connection_errors,
            users_online,
            messages_persisted,
            messages_delivered,
            persist_failures,
            history_pages_served,
            read_receipts_marked,
            read_receipt_failures,
            typing_relayed,
            rate_limited,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
