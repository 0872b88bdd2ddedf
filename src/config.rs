// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Hub Configuration
//!
//! Configuration loaded from `HUB_*` environment variables. Values that fail
//! to parse keep their default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::storage::StorageBackend;

/// Default number of messages per history page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Hub server configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the WebSocket endpoint listens on.
    pub listen_addr: SocketAddr,
    /// Address of the health/metrics HTTP endpoint.
    pub metrics_addr: SocketAddr,
    /// Optional bearer token guarding `/metrics`.
    pub metrics_token: Option<String>,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Maximum chat message content length in bytes.
    pub max_content_len: usize,
    /// Messages per history page.
    pub history_page_size: usize,
    /// Commands per minute per user.
    pub rate_limit_per_min: u32,
    /// Capacity of each connection's outbound event channel.
    pub outbound_buffer: usize,
    /// Storage backend (memory or sqlite).
    pub storage_backend: StorageBackend,
    /// Data directory for the SQLite database.
    pub data_dir: PathBuf,
    /// Idle timeout in seconds.
    pub idle_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            metrics_token: None,
            max_connections: 1000,
            max_message_size: 64 * 1024,
            max_content_len: 4096,
            history_page_size: DEFAULT_PAGE_SIZE,
            rate_limit_per_min: 120,
            outbound_buffer: 64,
            storage_backend: StorageBackend::Sqlite,
            data_dir: PathBuf::from("./data"),
            idle_timeout_secs: 300,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(parsed) = val.trim().parse() {
            *target = parsed;
        }
    }
}

impl HubConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        env_parse("HUB_LISTEN_ADDR", &mut config.listen_addr);
        env_parse("HUB_METRICS_ADDR", &mut config.metrics_addr);
        env_parse("HUB_MAX_CONNECTIONS", &mut config.max_connections);
        env_parse("HUB_MAX_MESSAGE_SIZE", &mut config.max_message_size);
        env_parse("HUB_MAX_CONTENT_LEN", &mut config.max_content_len);
        env_parse("HUB_HISTORY_PAGE_SIZE", &mut config.history_page_size);
        env_parse("HUB_RATE_LIMIT", &mut config.rate_limit_per_min);
        env_parse("HUB_OUTBOUND_BUFFER", &mut config.outbound_buffer);
        env_parse("HUB_IDLE_TIMEOUT", &mut config.idle_timeout_secs);

        if let Ok(token) = std::env::var("HUB_METRICS_TOKEN") {
            if !token.is_empty() {
                config.metrics_token = Some(token);
            }
        }

        if let Ok(val) = std::env::var("HUB_STORAGE_BACKEND") {
            config.storage_backend = StorageBackend::from_name(&val);
        }

        if let Ok(val) = std::env::var("HUB_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }

        // Page size and outbound buffer must be at least 1.
        config.history_page_size = config.history_page_size.max(1);
        config.outbound_buffer = config.outbound_buffer.max(1);

        config
    }

    /// Returns the idle timeout as a Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("chat.db")
    }
}
