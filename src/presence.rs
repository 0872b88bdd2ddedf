// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Presence Registry
//!
//! Tracks which usernames currently hold an open connection, and the handle
//! used to push events to that connection. A username maps to at most one
//! handle: reconnecting replaces the handle in place.
//!
//! The map is a sharded `DashMap`, so upserts and removals for different
//! users do not contend on a single lock and a snapshot never observes a
//! half-written entry.

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerEvent;

/// Opaque reference used to deliver events to one open connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Creates a handle and the receiving end of its outbound channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            ConnectionHandle {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Short label for log lines.
    pub fn label(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    /// Best-effort push. Returns false if the connection is gone or its
    /// buffer is full; the event is dropped in both cases.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Identity and display metadata cached alongside the handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub user_id: String,
    pub full_name: Option<String>,
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub handle: ConnectionHandle,
    pub profile: Profile,
}

/// Result of [`PresenceRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The username was absent; this is its first live connection.
    Registered,
    /// The username was present; only its handle was swapped.
    Replaced,
}

/// Thread-safe registry of online users.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: DashMap<String, PresenceEntry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        PresenceRegistry {
            entries: DashMap::new(),
        }
    }

    /// Registers `username` or swaps its handle if already online.
    ///
    /// On replacement the stored profile is left untouched.
    pub fn upsert(&self, username: &str, handle: ConnectionHandle, profile: Profile) -> UpsertOutcome {
        match self.entries.entry(username.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().handle = handle;
                UpsertOutcome::Replaced
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PresenceEntry { handle, profile });
                UpsertOutcome::Registered
            }
        }
    }

    /// Removes `username`. Missing keys are a no-op.
    pub fn remove(&self, username: &str) -> bool {
        self.entries.remove(username).is_some()
    }

    /// Removes `username` only while its registered handle is `connection_id`.
    pub fn remove_if_current(&self, username: &str, connection_id: Uuid) -> bool {
        self.entries
            .remove_if(username, |_, entry| entry.handle.id == connection_id)
            .is_some()
    }

    pub fn lookup(&self, username: &str) -> Option<ConnectionHandle> {
        self.entries.get(username).map(|entry| entry.handle.clone())
    }

    pub fn profile(&self, username: &str) -> Option<Profile> {
        self.entries.get(username).map(|entry| entry.profile.clone())
    }

    /// Usernames currently online.
    pub fn snapshot(&self) -> HashSet<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Every online username with a copy of its entry.
    pub fn entries(&self) -> Vec<(String, PresenceEntry)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn online_count(&self) -> usize {
        self.entries.len()
    }
}
