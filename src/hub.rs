// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Hub
//!
//! Transport-agnostic service composing the presence registry, message store,
//! user directory and clock. Its capability surface is split across modules:
//!
//! - `session`: `connect` / `disconnect`
//! - `routing`: `send`
//! - `history`: `load_history` / `load_page`
//! - `typing`: `notify_typing`
//! - `roster`: `online_view`

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{HubConfig, DEFAULT_PAGE_SIZE};
use crate::directory::UserDirectory;
use crate::metrics::HubMetrics;
use crate::presence::PresenceRegistry;
use crate::protocol::ServerEvent;
use crate::storage::MessageStore;

/// Tunables that shape hub behavior.
#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub page_size: usize,
    /// Maximum message content length in bytes.
    pub max_content_len: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            page_size: DEFAULT_PAGE_SIZE,
            max_content_len: 4096,
        }
    }
}

impl From<&HubConfig> for HubSettings {
    fn from(config: &HubConfig) -> Self {
        HubSettings {
            page_size: config.history_page_size,
            max_content_len: config.max_content_len,
        }
    }
}

/// Collaborators injected into a [`ChatHub`].
pub struct HubDeps {
    pub registry: Arc<PresenceRegistry>,
    pub store: Arc<dyn MessageStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub clock: Arc<dyn Clock>,
    pub metrics: HubMetrics,
    pub settings: HubSettings,
}

impl HubDeps {
    /// Deps with a fresh registry, the system clock and default settings.
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn UserDirectory>,
        metrics: HubMetrics,
    ) -> Self {
        HubDeps {
            registry: Arc::new(PresenceRegistry::new()),
            store,
            directory,
            clock: Arc::new(SystemClock),
            metrics,
            settings: HubSettings::default(),
        }
    }
}

pub struct ChatHub {
    pub(crate) registry: Arc<PresenceRegistry>,
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) directory: Arc<dyn UserDirectory>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: HubMetrics,
    pub(crate) settings: HubSettings,
}

impl ChatHub {
    pub fn new(deps: HubDeps) -> Self {
        ChatHub {
            registry: deps.registry,
            store: deps.store,
            directory: deps.directory,
            clock: deps.clock,
            metrics: deps.metrics,
            settings: deps.settings,
        }
    }

    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn metrics(&self) -> &HubMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> HubSettings {
        self.settings
    }

    /// Pushes `event` to every active session except `except`.
    pub(crate) fn broadcast_except(&self, except: uuid::Uuid, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for (_, entry) in self.registry.entries() {
            if entry.handle.id() != except && entry.handle.deliver(event.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    pub(crate) fn refresh_online_gauge(&self) {
        self.metrics
            .users_online
            .set(self.registry.online_count() as i64);
    }
}
