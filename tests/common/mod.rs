// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for hub integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chat_hub::directory::{MemoryUserDirectory, User};
use chat_hub::metrics::HubMetrics;
use chat_hub::presence::ConnectionHandle;
use chat_hub::protocol::ServerEvent;
use chat_hub::rate_limit::RateLimiter;
use chat_hub::storage::{
    MemoryMessageStore, Message, MessageId, MessageStore, NewMessage, PageRequest,
};
use chat_hub::{ChatHub, HubDeps, Session, StoreError};
use tokio::sync::mpsc;

/// Directory with alice, bob and carol.
#[allow(dead_code)]
pub fn seeded_directory() -> Arc<MemoryUserDirectory> {
    Arc::new(MemoryUserDirectory::with_users([
        User::new("id-alice", "alice")
            .with_email("alice@example.com")
            .with_full_name("Alice Liddell"),
        User::new("id-bob", "bob").with_email("bob@example.com"),
        User::new("id-carol", "carol"),
    ]))
}

/// Builds a hub over `store` and the seeded directory.
#[allow(dead_code)]
pub fn create_test_hub(store: Arc<dyn MessageStore>) -> Arc<ChatHub> {
    let metrics = HubMetrics::new().unwrap();
    Arc::new(ChatHub::new(HubDeps::new(store, seeded_directory(), metrics)))
}

/// Creates a rate limiter for testing.
#[allow(dead_code)]
pub fn create_test_rate_limiter(max_per_minute: u32) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(max_per_minute))
}

#[allow(dead_code)]
pub async fn connect(hub: &ChatHub, login: &str) -> (Session, mpsc::Receiver<ServerEvent>) {
    let (handle, rx) = ConnectionHandle::channel(64);
    let session = hub.connect(login, handle, None).await.unwrap();
    (session, rx)
}

/// Everything currently queued on a session channel.
#[allow(dead_code)]
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// In-memory store whose writes can be switched to fail.
#[allow(dead_code)]
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryMessageStore,
    pub fail_insert: AtomicBool,
    pub fail_mark_read: AtomicBool,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_insert(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_mark_read(&self, fail: bool) {
        self.fail_mark_read.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("insert disabled".to_string()));
        }
        self.inner.insert(message).await
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        self.inner.get(id).await
    }

    async fn recent_between(
        &self,
        user_a: &str,
        user_b: &str,
        page: PageRequest,
    ) -> Result<Vec<Message>, StoreError> {
        self.inner.recent_between(user_a, user_b, page).await
    }

    async fn mark_read(&self, receiver_id: &str, ids: &[MessageId]) -> Result<usize, StoreError> {
        if self.fail_mark_read.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mark_read disabled".to_string()));
        }
        self.inner.mark_read(receiver_id, ids).await
    }

    async fn unread_counts(&self, receiver_id: &str) -> Result<HashMap<String, u64>, StoreError> {
        self.inner.unread_counts(receiver_id).await
    }

    async fn message_count(&self) -> Result<usize, StoreError> {
        self.inner.message_count().await
    }
}
