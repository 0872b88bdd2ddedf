// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! User Directory
//!
//! Read access to the identity store owned by the account service. The hub
//! never creates or edits users; `insert` exists so tests and local setups
//! can seed accounts.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreError;
use crate::storage::{run_blocking, StorageBackend};

/// A registered user as seen by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub profile_image: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        User {
            id: id.into(),
            username: username.into(),
            email: None,
            full_name: None,
            profile_image: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn with_profile_image(mut self, url: impl Into<String>) -> Self {
        self.profile_image = Some(url.into());
        self
    }
}

/// Identity lookups. Username and email matches are case-insensitive.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Every registered user, ordered by username.
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Resolves an authenticated login name: username first, then email.
    async fn resolve(&self, login: &str) -> Result<Option<User>, StoreError> {
        if let Some(user) = self.find_by_username(login).await? {
            return Ok(Some(user));
        }
        self.find_by_email(login).await
    }
}

// ============================================================================
// In-Memory Directory
// ============================================================================

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<Vec<User>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.insert(user);
        }
        directory
    }

    /// Adds a user, replacing any existing user with the same id.
    pub fn insert(&self, user: User) {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.retain(|u| u.id != user.id);
        users.push(user);
        users.sort_by(|a, b| a.username.to_lowercase().cmp(&b.username.to_lowercase()));
    }

    fn find(&self, predicate: impl Fn(&User) -> bool) -> Result<Option<User>, StoreError> {
        let users = self
            .users
            .read()
            .map_err(|_| StoreError::Unavailable("user directory lock poisoned".to_string()))?;
        Ok(users.iter().find(|u| predicate(u)).cloned())
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find(|u| u.username.eq_ignore_ascii_case(username))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find(|u| {
            u.email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email))
        })
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.find(|u| u.id == id)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let users = self
            .users
            .read()
            .map_err(|_| StoreError::Unavailable("user directory lock poisoned".to_string()))?;
        Ok(users.clone())
    }
}

// ============================================================================
// SQLite Directory
// ============================================================================

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        profile_image: row.get(4)?,
    })
}

const USER_COLUMNS: &str = "id, username, email, full_name, profile_image";

/// Reads the `users` table written by the account service.
pub struct SqliteUserDirectory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUserDirectory {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA busy_timeout=5000;
             CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                email TEXT COLLATE NOCASE,
                full_name TEXT,
                profile_image TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);",
        )?;

        Ok(SqliteUserDirectory {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    /// Inserts or replaces a user row.
    pub async fn insert(&self, user: User) -> Result<(), StoreError> {
        run_blocking(self.conn.clone(), move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO users (id, username, email, full_name, profile_image)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id,
                    user.username,
                    user.email,
                    user.full_name,
                    user.profile_image
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_where(&self, column: &'static str, value: &str) -> Result<Option<User>, StoreError> {
        let value = value.to_string();
        run_blocking(self.conn.clone(), move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column),
                params![value],
                user_from_row,
            )
            .optional()
        })
        .await
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_where("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_where("email", email).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.find_where("id", id).await
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        run_blocking(self.conn.clone(), |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users ORDER BY username COLLATE NOCASE",
                USER_COLUMNS
            ))?;
            let rows = stmt.query_map([], user_from_row)?;
            rows.collect()
        })
        .await
    }
}

/// Creates the user directory for the given backend.
pub fn create_user_directory(
    backend: StorageBackend,
    database_path: &Path,
) -> Result<Arc<dyn UserDirectory>, StoreError> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryUserDirectory::new())),
        StorageBackend::Sqlite => Ok(Arc::new(SqliteUserDirectory::open(database_path)?)),
    }
}
