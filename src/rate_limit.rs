// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Rate Limiting
//!
//! Token bucket per username over incoming commands.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Token bucket for a single user.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(max_tokens: u32) -> Self {
        TokenBucket {
            tokens: max_tokens as f64,
            max_tokens: max_tokens as f64,
            refill_rate: max_tokens as f64 / 60.0,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_update = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate limiter shared by all connections.
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    max_per_minute: u32,
}

impl RateLimiter {
    /// `max_per_minute` commands per user; the bucket starts full.
    pub fn new(max_per_minute: u32) -> Self {
        RateLimiter {
            buckets: DashMap::new(),
            max_per_minute,
        }
    }

    /// Returns true if the command is allowed.
    pub fn consume(&self, username: &str) -> bool {
        self.buckets
            .entry(username.to_string())
            .or_insert_with(|| TokenBucket::new(self.max_per_minute))
            .try_consume()
    }

    /// Drops buckets untouched for `max_idle`. Returns how many were removed.
    pub fn cleanup_inactive(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_update) < max_idle);
        before.saturating_sub(self.buckets.len())
    }

    pub fn tracked_users(&self) -> usize {
        self.buckets.len()
    }
}
