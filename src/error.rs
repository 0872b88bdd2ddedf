// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types for the hub and its storage backends.

use thiserror::Error;

/// Failure inside a message store or user directory backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking worker running the query panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

/// Failure of a hub operation.
#[derive(Debug, Error)]
pub enum HubError {
    /// No resolvable identity. Fatal for the connection.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Unknown peer or recipient.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl HubError {
    /// Short machine-readable reason sent back to clients in failed acks.
    pub fn reason(&self) -> &'static str {
        match self {
            HubError::Unauthenticated(_) => "unauthenticated",
            HubError::NotFound(_) => "not_found",
            HubError::Validation(_) => "invalid",
            HubError::Persistence(_) => "persistence",
        }
    }
}
