// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Online User View
//!
//! Per-viewer projection of the directory: every user with an online flag and
//! the number of unread messages that user sent to the viewer. Recomputed on
//! every presence change, never cached.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::directory::User;
use crate::error::HubError;
use crate::hub::ChatHub;
use crate::protocol::{OnlineUserDto, ServerEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineUser {
    pub user: User,
    pub is_online: bool,
    pub unread_count: u64,
}

/// Builds the view from a directory listing, a presence snapshot and the
/// viewer's unread counts keyed by sender id.
///
/// Online users come first; directory order is kept within each group.
pub fn build_view(
    users: Vec<User>,
    online: &HashSet<String>,
    unread: &HashMap<String, u64>,
) -> Vec<OnlineUser> {
    let mut view: Vec<OnlineUser> = users
        .into_iter()
        .map(|user| OnlineUser {
            is_online: online.contains(&user.username),
            unread_count: unread.get(&user.id).copied().unwrap_or(0),
            user,
        })
        .collect();
    view.sort_by_key(|entry| !entry.is_online);
    view
}

impl ChatHub {
    /// Computes the view as seen by `viewer_id`.
    pub async fn online_view(&self, viewer_id: &str) -> Result<Vec<OnlineUser>, HubError> {
        let users = self.directory.list_users().await?;
        let unread = self.store.unread_counts(viewer_id).await?;
        Ok(build_view(users, &self.registry.snapshot(), &unread))
    }

    /// Sends every active session the view computed for its own user.
    pub(crate) async fn broadcast_online_views(&self) {
        let users = match self.directory.list_users().await {
            Ok(users) => users,
            Err(e) => {
                warn!("Failed to list users for presence broadcast: {}", e);
                return;
            }
        };
        let online = self.registry.snapshot();

        for (username, entry) in self.registry.entries() {
            let unread = match self.store.unread_counts(&entry.profile.user_id).await {
                Ok(unread) => unread,
                Err(e) => {
                    warn!("[{}] Failed to count unread messages: {}", entry.handle.label(), e);
                    continue;
                }
            };
            let users: Vec<OnlineUserDto> = build_view(users.clone(), &online, &unread)
                .into_iter()
                .map(Into::into)
                .collect();

            if !entry.handle.deliver(ServerEvent::OnlineUsers { users }) {
                debug!(
                    "[{}] Dropped online view for {}: channel full or closed",
                    entry.handle.label(),
                    username
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Vec<User> {
        vec![
            User::new("id-a", "alice"),
            User::new("id-b", "bob"),
            User::new("id-c", "carol"),
            User::new("id-d", "dave"),
        ]
    }

    #[test]
    fn test_online_users_first_in_directory_order() {
        let online: HashSet<String> = ["dave", "bob"].iter().map(|s| s.to_string()).collect();
        let view = build_view(users(), &online, &HashMap::new());

        let names: Vec<_> = view.iter().map(|v| v.user.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "dave", "alice", "carol"]);
        assert!(view[0].is_online && view[1].is_online);
        assert!(!view[2].is_online && !view[3].is_online);
    }

    #[test]
    fn test_unread_counts_keyed_by_sender_id() {
        let unread: HashMap<String, u64> = [("id-c".to_string(), 4)].into_iter().collect();
        let view = build_view(users(), &HashSet::new(), &unread);

        for entry in view {
            let expected = if entry.user.id == "id-c" { 4 } else { 0 };
            assert_eq!(entry.unread_count, expected, "{}", entry.user.username);
        }
    }

    #[test]
    fn test_empty_directory() {
        assert!(build_view(Vec::new(), &HashSet::new(), &HashMap::new()).is_empty());
    }
}
