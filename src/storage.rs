// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Storage
//!
//! Durable storage for chat messages. Supports both in-memory (for testing)
//! and SQLite (for production). Every operation is async; the SQLite backend
//! runs its queries on the blocking thread pool.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::StoreError;

pub type MessageId = i64;

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Store-assigned id, increasing with insertion order.
    pub id: MessageId,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    /// UTC time assigned by the hub when the message was sent.
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

/// A message that has not been assigned an id yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One window of a conversation, counted from the most recent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page_number: usize,
    pub page_size: usize,
}

impl PageRequest {
    /// Page numbers below 1 are clamped to the first page.
    pub fn new(page_number: i64, page_size: usize) -> Self {
        PageRequest {
            page_number: page_number.max(1) as usize,
            page_size,
        }
    }

    /// Number of messages skipped before the window starts.
    pub fn offset(&self) -> usize {
        (self.page_number - 1).saturating_mul(self.page_size)
    }
}

/// Trait for message storage backends.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a message and returns it with its assigned id.
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn get(&self, id: MessageId) -> Result<Option<Message>, StoreError>;

    /// Returns one page of the conversation between `user_a` and `user_b`,
    /// in either direction, ordered newest first.
    async fn recent_between(
        &self,
        user_a: &str,
        user_b: &str,
        page: PageRequest,
    ) -> Result<Vec<Message>, StoreError>;

    /// Sets the read flag on every listed message addressed to `receiver_id`.
    /// Messages already read or addressed to someone else are left alone.
    /// Returns the number of messages that changed.
    async fn mark_read(&self, receiver_id: &str, ids: &[MessageId]) -> Result<usize, StoreError>;

    /// Unread messages addressed to `receiver_id`, counted per sender.
    async fn unread_counts(&self, receiver_id: &str) -> Result<HashMap<String, u64>, StoreError>;

    /// Total number of stored messages.
    async fn message_count(&self) -> Result<usize, StoreError>;
}

fn involves_pair(message: &Message, user_a: &str, user_b: &str) -> bool {
    (message.sender_id == user_a && message.receiver_id == user_b)
        || (message.sender_id == user_b && message.receiver_id == user_a)
}

// ============================================================================
// In-Memory Storage (for testing and development)
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    messages: Vec<Message>,
    next_id: MessageId,
}

/// In-memory message storage.
#[derive(Default)]
pub struct MemoryMessageStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("message store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("message store lock poisoned".to_string()))
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.write()?;
        inner.next_id += 1;
        let stored = Message {
            id: inner.next_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            created_at: message.created_at,
            is_read: false,
        };
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let inner = self.read()?;
        Ok(inner.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn recent_between(
        &self,
        user_a: &str,
        user_b: &str,
        page: PageRequest,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.read()?;
        let mut conversation: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| involves_pair(m, user_a, user_b))
            .cloned()
            .collect();
        conversation.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(conversation
            .into_iter()
            .skip(page.offset())
            .take(page.page_size)
            .collect())
    }

    async fn mark_read(&self, receiver_id: &str, ids: &[MessageId]) -> Result<usize, StoreError> {
        let mut inner = self.write()?;
        let mut changed = 0;
        for message in inner.messages.iter_mut() {
            if message.receiver_id == receiver_id && !message.is_read && ids.contains(&message.id) {
                message.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn unread_counts(&self, receiver_id: &str) -> Result<HashMap<String, u64>, StoreError> {
        let inner = self.read()?;
        let mut counts = HashMap::new();
        for message in inner
            .messages
            .iter()
            .filter(|m| m.receiver_id == receiver_id && !m.is_read)
        {
            *counts.entry(message.sender_id.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn message_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.messages.len())
    }
}

// ============================================================================
// SQLite Storage (for production)
// ============================================================================

/// Converts a UTC time to the microsecond column representation.
fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(column: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, micros))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        created_at: from_micros(4, row.get(4)?)?,
        is_read: row.get(5)?,
    })
}

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, created_at_us, is_read";

/// SQLite-backed persistent message storage.
pub struct SqliteMessageStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMessageStore {
    /// Opens or creates a SQLite database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL lets the user directory connection read while messages are written.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at_us INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_messages_pair
                ON messages(sender_id, receiver_id, created_at_us);
            CREATE INDEX IF NOT EXISTS idx_messages_unread
                ON messages(receiver_id, is_read);",
        )?;

        Ok(SqliteMessageStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory SQLite database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        run_blocking(self.conn.clone(), f).await
    }
}

/// Runs `f` against a shared SQLite connection on the blocking thread pool.
pub(crate) async fn run_blocking<T, F>(conn: Arc<Mutex<Connection>>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection poisoned".to_string()))?;
        f(&mut guard).map_err(StoreError::from)
    })
    .await?
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, created_at_us, is_read)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![
                    message.sender_id,
                    message.receiver_id,
                    message.content,
                    to_micros(message.created_at)
                ],
            )?;
            Ok(Message {
                id: conn.last_insert_rowid(),
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                content: message.content,
                created_at: message.created_at,
                is_read: false,
            })
        })
        .await
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE id = ?1",
                MESSAGE_COLUMNS
            ))?;
            let mut rows = stmt.query_map(params![id], message_from_row)?;
            let message = rows.next().transpose()?;
            Ok(message)
        })
        .await
    }

    async fn recent_between(
        &self,
        user_a: &str,
        user_b: &str,
        page: PageRequest,
    ) -> Result<Vec<Message>, StoreError> {
        // SQLite reads a negative OFFSET as 0, so an offset beyond i64 is past the end.
        let Ok(offset) = i64::try_from(page.offset()) else {
            return Ok(Vec::new());
        };
        let limit = i64::try_from(page.page_size).unwrap_or(i64::MAX);
        let user_a = user_a.to_string();
        let user_b = user_b.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at_us DESC, id DESC
                 LIMIT ?3 OFFSET ?4",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![user_a, user_b, limit, offset],
                message_from_row,
            )?;
            rows.collect()
        })
        .await
    }

    async fn mark_read(&self, receiver_id: &str, ids: &[MessageId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let receiver_id = receiver_id.to_string();
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut changed = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE messages SET is_read = 1
                     WHERE id = ?1 AND receiver_id = ?2 AND is_read = 0",
                )?;
                for id in &ids {
                    changed += stmt.execute(params![id, receiver_id])?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    async fn unread_counts(&self, receiver_id: &str) -> Result<HashMap<String, u64>, StoreError> {
        let receiver_id = receiver_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND is_read = 0
                 GROUP BY sender_id",
            )?;
            let rows = stmt.query_map(params![receiver_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?;
            rows.collect()
        })
        .await
    }

    async fn message_count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get::<_, i64>(0))
                .map(|count| count as usize)
        })
        .await
    }
}

// ============================================================================
// Storage Factory
// ============================================================================

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// In-memory storage (lost on restart).
    Memory,
    /// SQLite persistent storage.
    #[default]
    Sqlite,
}

impl StorageBackend {
    /// Parses a backend name; anything but "memory" selects SQLite.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            _ => StorageBackend::Sqlite,
        }
    }
}

/// Creates a message store for the given backend.
pub fn create_message_store(
    backend: StorageBackend,
    database_path: &Path,
) -> Result<Arc<dyn MessageStore>, StoreError> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryMessageStore::new())),
        StorageBackend::Sqlite => {
            if let Some(parent) = database_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
            Ok(Arc::new(SqliteMessageStore::open(database_path)?))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
